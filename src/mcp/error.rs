//! Error taxonomy shared by transports and the generic client.

use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Which discovered catalog a lookup was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Tool,
    Resource,
    Prompt,
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CatalogKind::Tool => "tool",
            CatalogKind::Resource => "resource",
            CatalogKind::Prompt => "prompt",
        };
        f.write_str(label)
    }
}

/// Failures surfaced by an MCP connection.
#[derive(Debug, Clone)]
pub enum McpError {
    /// The transport is unreachable, the handshake failed, or the client is
    /// not in the `Ready` state. Recoverable by reconnecting.
    Connection(String),

    /// A well-formed response carried an `error` member.
    Protocol {
        code: Option<i64>,
        message: String,
        data: Option<Value>,
    },

    /// The referenced entry is absent from the discovered catalog.
    NotFound {
        kind: CatalogKind,
        name: String,
        /// Names known to the catalog at lookup time, for diagnostics.
        available: Vec<String>,
    },

    /// A request exceeded the configured endpoint timeout.
    Timeout(Duration),

    /// The endpoint description cannot produce a transport.
    Config(String),
}

/// JSON-RPC code used by servers to indicate an unsupported method.
pub const METHOD_NOT_FOUND: i64 = -32601;

impl McpError {
    pub fn connection(message: impl Into<String>) -> Self {
        McpError::Connection(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        McpError::Config(message.into())
    }

    /// Returns true when a server reports the JSON-RPC method-not-found code.
    pub fn is_method_not_found(&self) -> bool {
        matches!(
            self,
            McpError::Protocol {
                code: Some(METHOD_NOT_FOUND),
                ..
            }
        )
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, McpError::Connection(_) | McpError::Timeout(_))
    }
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpError::Connection(message) => write!(f, "Connection error: {message}"),
            McpError::Protocol { code, message, .. } => match code {
                Some(code) => write!(f, "Server error ({code}): {message}"),
                None => write!(f, "Server error: {message}"),
            },
            McpError::NotFound {
                kind,
                name,
                available,
            } => {
                if available.is_empty() {
                    write!(f, "{kind} '{name}' not found (none available)")
                } else {
                    write!(
                        f,
                        "{kind} '{name}' not found (available: {})",
                        available.join(", ")
                    )
                }
            }
            McpError::Timeout(after) => {
                write!(f, "Request timed out after {:.1}s", after.as_secs_f64())
            }
            McpError::Config(message) => write!(f, "Invalid endpoint configuration: {message}"),
        }
    }
}

impl StdError for McpError {}
