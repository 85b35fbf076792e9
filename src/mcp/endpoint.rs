//! Endpoint descriptors: where a server lives and how to authenticate.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::McpError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Wire protocols a client can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// One POST per request, whole-body JSON reply.
    Http,
    /// POST with a streamed reply that may be an event stream.
    HttpStream,
    /// Newline-delimited JSON over a child process's stdin/stdout.
    Pipe,
    /// Newline-delimited JSON over a TCP or Unix socket.
    Socket,
}

impl FromStr for TransportKind {
    type Err = McpError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" | "http_sse" | "http-sse" | "sse" => Ok(TransportKind::Http),
            "streamable_http" | "streamable-http" | "http_stream" | "stream" => {
                Ok(TransportKind::HttpStream)
            }
            "stdio" | "pipe" => Ok(TransportKind::Pipe),
            "socket" | "tcp" | "unix" | "websocket" => Ok(TransportKind::Socket),
            other => Err(McpError::config(format!("Unsupported MCP transport: {other}"))),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportKind::Http => "http",
            TransportKind::HttpStream => "streamable_http",
            TransportKind::Pipe => "stdio",
            TransportKind::Socket => "socket",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    #[default]
    None,
    Bearer,
    ApiKey,
    #[serde(rename = "oauth2")]
    OAuth2,
}

/// Credential applied to every outgoing request.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub kind: AuthKind,
    pub token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("kind", &self.kind)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn new(kind: AuthKind, token: impl Into<String>) -> Self {
        Self {
            kind,
            token: Some(token.into()),
        }
    }

    fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|token| !token.is_empty())
    }

    /// HTTP header carrying the credential, if any.
    pub fn header(&self) -> Option<(&'static str, String)> {
        let token = self.token()?;
        match self.kind {
            AuthKind::None => None,
            AuthKind::Bearer | AuthKind::OAuth2 => {
                Some(("Authorization", format!("Bearer {token}")))
            }
            AuthKind::ApiKey => Some(("X-API-Key", token.to_string())),
        }
    }

    /// Protocol-level equivalent of [`Credentials::header`] for transports
    /// without headers: the value placed under `params._meta`.
    pub fn meta_field(&self) -> Option<(&'static str, Value)> {
        let token = self.token()?;
        match self.kind {
            AuthKind::None => None,
            AuthKind::Bearer | AuthKind::OAuth2 => {
                Some(("authorization", json!(format!("Bearer {token}"))))
            }
            AuthKind::ApiKey => Some(("apiKey", json!(token))),
        }
    }
}

/// Credentials shared between a client and the transport it builds, so a
/// token update applies to the next request without reconnecting.
#[derive(Debug, Clone, Default)]
pub struct SharedCredentials(Arc<RwLock<Credentials>>);

impl SharedCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self(Arc::new(RwLock::new(credentials)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Credentials> {
        self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Credentials> {
        self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn replace(&self, credentials: Credentials) {
        *self.write() = credentials;
    }

    pub fn snapshot(&self) -> Credentials {
        self.read().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Everything needed to build a transport and drive a connection.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub name: String,
    pub kind: TransportKind,
    /// Base URL for HTTP kinds, `tcp://host:port` or `unix:///path` for sockets.
    pub address: Option<String>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub credentials: Credentials,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub client_info: ClientInfo,
}

impl EndpointConfig {
    fn with_kind(name: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            name: name.into(),
            kind,
            address: None,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            credentials: Credentials::default(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            client_info: ClientInfo::default(),
        }
    }

    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        let mut endpoint = Self::with_kind(name, TransportKind::Http);
        endpoint.address = Some(url.into());
        endpoint
    }

    pub fn http_stream(name: impl Into<String>, url: impl Into<String>) -> Self {
        let mut endpoint = Self::with_kind(name, TransportKind::HttpStream);
        endpoint.address = Some(url.into());
        endpoint
    }

    pub fn pipe(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        let mut endpoint = Self::with_kind(name, TransportKind::Pipe);
        endpoint.command = Some(command.into());
        endpoint.args = args;
        endpoint
    }

    pub fn socket(name: impl Into<String>, address: impl Into<String>) -> Self {
        let mut endpoint = Self::with_kind(name, TransportKind::Socket);
        endpoint.address = Some(address.into());
        endpoint
    }

    pub fn with_credentials(mut self, kind: AuthKind, token: impl Into<String>) -> Self {
        self.credentials = Credentials::new(kind, token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn require_address(&self) -> Result<&str, McpError> {
        self.address
            .as_deref()
            .filter(|address| !address.trim().is_empty())
            .ok_or_else(|| {
                McpError::config(format!("an address is required for {} transport", self.kind))
            })
    }

    pub fn require_command(&self) -> Result<&str, McpError> {
        self.command
            .as_deref()
            .filter(|command| !command.trim().is_empty())
            .ok_or_else(|| McpError::config("a command is required for stdio transport"))
    }
}
