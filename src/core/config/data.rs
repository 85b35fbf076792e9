use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::core::config::io::ConfigError;
use crate::mcp::endpoint::{
    AuthKind, Credentials, EndpointConfig, TransportKind, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT,
};

pub const DEFAULT_AI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_AI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_AI_KEY_ENV: &str = "OPENAI_API_KEY";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const ANTHROPIC_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const AI_PROVIDER_ENV: &str = "AI_PROVIDER";

/// Which chat API the AI route parser talks to.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    /// Any OpenAI-compatible `chat/completions` endpoint.
    #[default]
    OpenAi,
    /// Anthropic's `messages` endpoint.
    Anthropic,
}

impl AiProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            AiProvider::OpenAi => "openai",
            AiProvider::Anthropic => "anthropic",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            AiProvider::OpenAi => DEFAULT_AI_BASE_URL,
            AiProvider::Anthropic => ANTHROPIC_BASE_URL,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            AiProvider::OpenAi => DEFAULT_AI_MODEL,
            AiProvider::Anthropic => ANTHROPIC_MODEL,
        }
    }

    pub fn default_key_env(self) -> &'static str {
        match self {
            AiProvider::OpenAi => DEFAULT_AI_KEY_ENV,
            AiProvider::Anthropic => ANTHROPIC_KEY_ENV,
        }
    }

    fn base_url_env(self) -> &'static str {
        match self {
            AiProvider::OpenAi => "OPENAI_BASE_URL",
            AiProvider::Anthropic => "ANTHROPIC_BASE_URL",
        }
    }

    fn model_env(self) -> &'static str {
        match self {
            AiProvider::OpenAi => "OPENAI_MODEL",
            AiProvider::Anthropic => "ANTHROPIC_MODEL",
        }
    }
}

impl fmt::Display for AiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(AiProvider::OpenAi),
            "anthropic" | "claude" => Ok(AiProvider::Anthropic),
            other => Err(format!(
                "unknown AI provider '{other}' (expected openai or anthropic)"
            )),
        }
    }
}

/// One `[[mcp_servers]]` entry.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct McpServerConfig {
    pub id: String,
    /// `http`, `streamable_http`, `stdio` or `socket`. Inferred when unset.
    pub transport: Option<String>,
    pub base_url: Option<String>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub env: Option<HashMap<String, String>>,
    pub auth: Option<AuthKind>,
    /// Name of the environment variable holding the credential. The secret
    /// itself is never stored in the config file.
    pub auth_token_env: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SecurityConfig {
    /// Ask before dangerous tool calls (default on)
    pub enable_confirmation: Option<bool>,
    pub audit_log: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct AiConfig {
    /// `openai` or `anthropic`. Falls back to `$AI_PROVIDER`, then to
    /// whichever provider has a key.
    pub provider: Option<AiProvider>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub ai: AiConfig,
}

/// Resolved settings for the AI route parser.
#[derive(Clone, PartialEq)]
pub struct AiSettings {
    pub provider: AiProvider,
    pub base_url: String,
    pub model: String,
    pub api_key: String,
}

impl std::fmt::Debug for AiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiSettings")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

/// Guesses the HTTP flavour from a URL: `stream` selects the streaming
/// transport, anything else (including `sse`) plain HTTP.
pub fn infer_http_transport(url: &str) -> TransportKind {
    let lower = url.to_ascii_lowercase();
    if lower.contains("sse") {
        TransportKind::Http
    } else if lower.contains("stream") {
        TransportKind::HttpStream
    } else {
        TransportKind::Http
    }
}

impl McpServerConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn transport_kind(&self) -> Result<TransportKind, ConfigError> {
        if let Some(transport) = self.transport.as_deref() {
            return transport
                .parse()
                .map_err(|err| ConfigError::invalid(format!("server '{}': {err}", self.id)));
        }
        match (&self.base_url, &self.command) {
            (Some(url), _) => Ok(infer_http_transport(url)),
            (None, Some(_)) => Ok(TransportKind::Pipe),
            (None, None) => Err(ConfigError::invalid(format!(
                "server '{}' needs a base_url or a command",
                self.id
            ))),
        }
    }

    /// Converts this entry into an endpoint, resolving the credential
    /// through `lookup` (normally the process environment).
    pub fn to_endpoint<F>(&self, lookup: F) -> Result<EndpointConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.id.trim().is_empty() {
            return Err(ConfigError::invalid("MCP server id must not be empty"));
        }
        let kind = self.transport_kind()?;
        let missing = |field: &str| {
            ConfigError::invalid(format!(
                "server '{}' uses {kind} transport but has no {field}",
                self.id
            ))
        };

        let mut endpoint = match kind {
            TransportKind::Http => EndpointConfig::http(
                &self.id,
                self.base_url.clone().ok_or_else(|| missing("base_url"))?,
            ),
            TransportKind::HttpStream => EndpointConfig::http_stream(
                &self.id,
                self.base_url.clone().ok_or_else(|| missing("base_url"))?,
            ),
            TransportKind::Socket => EndpointConfig::socket(
                &self.id,
                self.base_url.clone().ok_or_else(|| missing("base_url"))?,
            ),
            TransportKind::Pipe => EndpointConfig::pipe(
                &self.id,
                self.command.clone().ok_or_else(|| missing("command"))?,
                self.args.clone().unwrap_or_default(),
            ),
        };
        endpoint.env = self.env.clone().unwrap_or_default();
        endpoint.credentials = self.credentials(&lookup)?;
        endpoint = endpoint
            .with_timeout(
                self.timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_TIMEOUT),
            )
            .with_retries(
                self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                self.retry_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_RETRY_DELAY),
            );
        Ok(endpoint)
    }

    fn credentials<F>(&self, lookup: &F) -> Result<Credentials, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = self.auth.unwrap_or_default();
        if kind == AuthKind::None {
            return Ok(Credentials::default());
        }
        let Some(var) = self.auth_token_env.as_deref() else {
            return Err(ConfigError::invalid(format!(
                "server '{}' sets auth but no auth_token_env",
                self.id
            )));
        };
        match lookup(var).filter(|token| !token.trim().is_empty()) {
            Some(token) => Ok(Credentials::new(kind, token)),
            None => Err(ConfigError::invalid(format!(
                "server '{}' expects a credential in ${var}, which is not set",
                self.id
            ))),
        }
    }
}

impl SecurityConfig {
    pub fn confirmation_enabled(&self) -> bool {
        self.enable_confirmation.unwrap_or(true)
    }
}

impl Config {
    pub fn get_server(&self, id: &str) -> Option<&McpServerConfig> {
        self.mcp_servers
            .iter()
            .find(|server| server.id.eq_ignore_ascii_case(id))
    }

    pub fn enabled_servers(&self) -> impl Iterator<Item = &McpServerConfig> {
        self.mcp_servers.iter().filter(|server| server.is_enabled())
    }

    /// Where audit entries are appended.
    pub fn audit_log_path(&self) -> PathBuf {
        self.security
            .audit_log
            .clone()
            .unwrap_or_else(Self::default_audit_log_path)
    }

    /// The configured provider, else `$AI_PROVIDER`, else Anthropic when
    /// only an Anthropic key is present, else OpenAI.
    pub fn ai_provider<F>(&self, lookup: F) -> AiProvider
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = self.ai.provider {
            return provider;
        }
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(value) = non_empty(AI_PROVIDER_ENV) {
            match value.parse::<AiProvider>() {
                Ok(provider) => return provider,
                Err(err) => warn!(var = AI_PROVIDER_ENV, "{err}; ignoring"),
            }
        }
        let openai_key = self.ai.api_key_env.is_some() || non_empty(DEFAULT_AI_KEY_ENV).is_some();
        if !openai_key && non_empty(ANTHROPIC_KEY_ENV).is_some() {
            AiProvider::Anthropic
        } else {
            AiProvider::OpenAi
        }
    }

    /// Name of the variable holding the AI key for `provider`.
    pub fn ai_key_env(&self, provider: AiProvider) -> String {
        self.ai
            .api_key_env
            .clone()
            .unwrap_or_else(|| provider.default_key_env().to_string())
    }

    /// Route parser settings, or `None` when no API key is available.
    pub fn ai_settings<F>(&self, lookup: F) -> Option<AiSettings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = self.ai_provider(&lookup);
        let api_key = lookup(&self.ai_key_env(provider)).filter(|key| !key.trim().is_empty())?;
        let base_url = self
            .ai
            .base_url
            .clone()
            .or_else(|| lookup(provider.base_url_env()))
            .unwrap_or_else(|| provider.default_base_url().to_string());
        let model = self
            .ai
            .model
            .clone()
            .or_else(|| lookup(provider.model_env()))
            .unwrap_or_else(|| provider.default_model().to_string());
        Some(AiSettings {
            provider,
            base_url,
            model,
            api_key,
        })
    }

    /// Effective AI base URL and model, each marked when it is a default.
    pub(crate) fn ai_endpoint_display<F>(
        &self,
        provider: AiProvider,
        lookup: F,
    ) -> (String, String)
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = self
            .ai
            .base_url
            .clone()
            .or_else(|| lookup(provider.base_url_env()))
            .unwrap_or_else(|| format!("{} (default)", provider.default_base_url()));
        let model = self
            .ai
            .model
            .clone()
            .or_else(|| lookup(provider.model_env()))
            .unwrap_or_else(|| format!("{} (default)", provider.default_model()));
        (base_url, model)
    }
}
