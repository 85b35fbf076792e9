//! Streaming HTTP transport and the event-stream decoding both HTTP
//! transports share.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::http::{content_type, map_reqwest_error, HttpSession};
use super::McpTransport;
use crate::mcp::endpoint::{EndpointConfig, SharedCredentials};
use crate::mcp::error::McpError;
use crate::mcp::protocol::{self, RpcRequest};

/// Splits an arbitrarily chunked byte stream into trimmed, non-empty lines.
#[derive(Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    /// Feeds a chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        split_lines(&complete)
    }

    /// Returns whatever trailing partial line remains.
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.pending);
        split_lines(&rest)
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    bytes
        .split(|b| *b == b'\n')
        .filter_map(|line| std::str::from_utf8(line).ok())
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

pub fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// Decodes one SSE line, returning the envelope when it answers a request.
fn response_from_line(line: &str) -> Option<Value> {
    let payload = sse_data_payload(line).filter(|payload| !payload.is_empty())?;
    match serde_json::from_str::<Value>(payload) {
        Ok(message) if protocol::is_response(&message) => Some(message),
        Ok(message) => {
            let method = message.get("method").and_then(Value::as_str).unwrap_or("-");
            debug!(method, "Ignoring server-initiated event");
            None
        }
        Err(err) => {
            debug!(error = %err, "Ignoring undecodable event payload");
            None
        }
    }
}

/// Reads an event stream until the first response envelope arrives.
pub(crate) async fn first_sse_response(
    response: reqwest::Response,
    timeout: Duration,
) -> Result<Value, McpError> {
    let mut stream = response.bytes_stream();
    let mut buffer = SseLineBuffer::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| map_reqwest_error(err, timeout))?;
        if let Some(message) = buffer.push(&chunk).iter().find_map(|l| response_from_line(l)) {
            return Ok(message);
        }
    }

    buffer
        .finish()
        .iter()
        .find_map(|line| response_from_line(line))
        .ok_or_else(|| McpError::connection("event stream ended without a response"))
}

/// POST with a streamed reply. JSON bodies are accumulated chunk by chunk;
/// event streams are consumed only until the matching response arrives.
pub struct StreamableHttpTransport {
    session: HttpSession,
}

impl StreamableHttpTransport {
    pub fn new(
        endpoint: &EndpointConfig,
        credentials: SharedCredentials,
    ) -> Result<Self, McpError> {
        Ok(Self {
            session: HttpSession::new(endpoint, credentials)?,
        })
    }
}

const STREAM_HEADERS: &[(&str, &str)] = &[("Cache-Control", "no-cache")];

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn connect(&mut self) -> Result<(), McpError> {
        self.session.open()
    }

    async fn disconnect(&mut self) {
        self.session.close();
    }

    async fn send_request(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        let request = RpcRequest::new(method, params);
        let timeout = self.session.timeout();
        let response = self.session.post(&request, STREAM_HEADERS).await?;

        if is_event_stream_content_type(&content_type(&response)) {
            let envelope = first_sse_response(response, timeout).await?;
            return protocol::interpret_response(envelope);
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| map_reqwest_error(err, timeout))?;
            body.extend_from_slice(&chunk);
        }
        let envelope = serde_json::from_slice::<Value>(&body)
            .map_err(|err| McpError::connection(format!("invalid JSON response: {err}")))?;
        protocol::interpret_response(envelope)
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<(), McpError> {
        let request = RpcRequest::notification(method, params);
        self.session.post(&request, STREAM_HEADERS).await.map(|_| ())
    }

    fn is_connected(&self) -> bool {
        self.session.is_open()
    }
}
