//! JSON-RPC 2.0 envelopes and MCP method names.
//!
//! Every transport serializes calls through [`RpcRequest`] and interprets
//! replies with [`interpret_response`], so method-level failures surface as
//! [`McpError::Protocol`] regardless of the wire in use.

use base64::Engine as _;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use super::endpoint::ClientInfo;
use super::error::McpError;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
pub const METHOD_RESOURCES_READ: &str = "resources/read";
pub const METHOD_PROMPTS_LIST: &str = "prompts/list";
pub const METHOD_PROMPTS_GET: &str = "prompts/get";

const REQUEST_ID_BYTES: usize = 16;

/// Outgoing request or notification envelope.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl RpcRequest {
    /// Builds a request carrying a fresh random correlation id.
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.to_string(),
            params,
            id: Some(new_request_id()),
        }
    }

    /// Builds a notification, which carries no id and expects no reply.
    pub fn notification(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.to_string(),
            params,
            id: None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn to_line(&self) -> Result<String, McpError> {
        serde_json::to_string(self)
            .map_err(|err| McpError::connection(format!("failed to encode request: {err}")))
    }
}

/// Unique per-request token, URL-safe so it survives any transport.
pub fn new_request_id() -> String {
    let mut bytes = [0_u8; REQUEST_ID_BYTES];
    if getrandom::fill(&mut bytes).is_err() {
        fallback_random_bytes(&mut bytes);
    }
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn fallback_random_bytes(out: &mut [u8]) {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let mut x = nanos ^ ((std::process::id() as u64) << 32) ^ 0x9E37_79B9_7F4A_7C15;
    for byte in out.iter_mut() {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        *byte = (x & 0xFF) as u8;
    }
}

/// Unwraps a response envelope.
///
/// `{result}` yields the result, `{error}` becomes [`McpError::Protocol`],
/// and any other shape is passed through untouched.
pub fn interpret_response(response: Value) -> Result<Value, McpError> {
    let Value::Object(mut envelope) = response else {
        return Ok(response);
    };

    if let Some(result) = envelope.remove("result") {
        return Ok(result);
    }

    if let Some(error) = envelope.remove("error") {
        return Err(protocol_error(error));
    }

    Ok(Value::Object(envelope))
}

fn protocol_error(error: Value) -> McpError {
    match error {
        Value::Object(mut fields) => {
            let code = fields.get("code").and_then(Value::as_i64);
            let message = match fields.remove("message") {
                Some(Value::String(message)) => message,
                Some(other) => other.to_string(),
                None => "Unknown error".to_string(),
            };
            McpError::Protocol {
                code,
                message,
                data: fields.remove("data"),
            }
        }
        Value::String(message) => McpError::Protocol {
            code: None,
            message,
            data: None,
        },
        other => McpError::Protocol {
            code: None,
            message: other.to_string(),
            data: None,
        },
    }
}

/// Correlation id of an incoming envelope, normalized to a string.
pub fn response_id(message: &Value) -> Option<String> {
    match message.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// True for envelopes that answer a request rather than notify or ask.
pub fn is_response(message: &Value) -> bool {
    message.get("method").is_none()
        && (message.get("result").is_some() || message.get("error").is_some())
}

pub fn initialize_params(client_info: &ClientInfo) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientInfo": {
            "name": client_info.name,
            "version": client_info.version,
        },
        "capabilities": {
            "experimental": {},
            "sampling": {},
        },
    })
}

/// Reports whether the handshake `capabilities` advertise `name`.
///
/// A capability counts as supported when its key is present and not null.
pub fn supports_capability(capabilities: Option<&Value>, name: &str) -> bool {
    capabilities
        .and_then(|caps| caps.get(name))
        .is_some_and(|value| !value.is_null())
}

/// Params for a paginated list call.
pub fn list_params(cursor: Option<&str>) -> Value {
    match cursor {
        Some(cursor) => json!({ "cursor": cursor }),
        None => Value::Object(Map::new()),
    }
}
