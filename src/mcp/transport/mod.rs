//! Wire transports behind a single request/response contract.
//!
//! Transports know only whether they are connected. Lifecycle state,
//! handshake and discovery live in [`crate::mcp::client::McpClient`].

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::mcp::endpoint::{Credentials, EndpointConfig, SharedCredentials, TransportKind};
use crate::mcp::error::McpError;

pub mod http;
pub(crate) mod line_duplex;
pub mod socket;
pub mod stdio;
pub mod streamable_http;

pub use http::HttpTransport;
pub use socket::SocketTransport;
pub use stdio::StdioTransport;
pub use streamable_http::StreamableHttpTransport;

#[async_trait]
/// Capability set every wire protocol provides.
pub trait McpTransport: Send {
    async fn connect(&mut self) -> Result<(), McpError>;

    /// Releases the underlying channel. Must succeed even if the remote end
    /// is unresponsive, and may be called repeatedly.
    async fn disconnect(&mut self);

    /// Sends one request and returns its `result`, or the raw reply when it
    /// carries neither `result` nor `error`.
    async fn send_request(&mut self, method: &str, params: Value) -> Result<Value, McpError>;

    /// Fire-and-forget message without a correlation id.
    async fn notify(&mut self, method: &str, params: Value) -> Result<(), McpError>;

    /// Server-initiated traffic. None of the bundled transports multiplex
    /// events over the request channel, so this yields nothing.
    async fn receive_event(&mut self) -> Option<Value> {
        None
    }

    fn is_connected(&self) -> bool;
}

/// Builds the concrete transport for an endpoint's kind.
pub fn create_transport(
    endpoint: &EndpointConfig,
    credentials: SharedCredentials,
) -> Result<Box<dyn McpTransport>, McpError> {
    let transport: Box<dyn McpTransport> = match endpoint.kind {
        TransportKind::Http => Box::new(HttpTransport::new(endpoint, credentials)?),
        TransportKind::HttpStream => Box::new(StreamableHttpTransport::new(endpoint, credentials)?),
        TransportKind::Pipe => Box::new(StdioTransport::new(endpoint, credentials)?),
        TransportKind::Socket => Box::new(SocketTransport::new(endpoint, credentials)?),
    };
    Ok(transport)
}

/// Places the credential under `params._meta` for header-less transports.
pub(crate) fn apply_meta_credentials(params: Value, credentials: &Credentials) -> Value {
    let Some((field, value)) = credentials.meta_field() else {
        return params;
    };

    let mut params = match params {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => return other,
    };
    let meta = params
        .entry("_meta")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(meta) = meta {
        meta.insert(field.to_string(), value);
    }
    Value::Object(params)
}
