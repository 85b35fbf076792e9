use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::streamable_http::{first_sse_response, is_event_stream_content_type};
use super::McpTransport;
use crate::mcp::endpoint::{EndpointConfig, SharedCredentials};
use crate::mcp::error::McpError;
use crate::mcp::protocol::{self, RpcRequest};

pub(crate) const JSON_CONTENT_TYPE: &str = "application/json";
pub(crate) const JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
pub(crate) const SESSION_HEADER: &str = "mcp-session-id";
const HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const HTTP_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;

pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, McpError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECONDS).min(timeout))
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(HTTP_POOL_IDLE_TIMEOUT_SECONDS))
        .build()
        .map_err(|err| McpError::connection(format!("failed to build HTTP client: {err}")))
}

pub(crate) fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> McpError {
    if err.is_timeout() {
        McpError::Timeout(timeout)
    } else {
        McpError::connection(format!("HTTP request failed: {err}"))
    }
}

/// Per-connection HTTP state shared by both HTTP transports: the pooled
/// client, the endpoint URL, the live credentials and the server session.
pub(crate) struct HttpSession {
    server: String,
    url: String,
    timeout: Duration,
    credentials: SharedCredentials,
    client: Option<reqwest::Client>,
    session_id: Option<String>,
}

impl HttpSession {
    pub(crate) fn new(
        endpoint: &EndpointConfig,
        credentials: SharedCredentials,
    ) -> Result<Self, McpError> {
        let url = endpoint.require_address()?;
        reqwest::Url::parse(url)
            .map_err(|err| McpError::config(format!("invalid URL '{url}': {err}")))?;
        Ok(Self {
            server: endpoint.name.clone(),
            url: url.to_string(),
            timeout: endpoint.timeout,
            credentials,
            client: None,
            session_id: None,
        })
    }

    pub(crate) fn open(&mut self) -> Result<(), McpError> {
        if self.client.is_none() {
            self.client = Some(build_http_client(self.timeout)?);
        }
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        self.client = None;
        self.session_id = None;
    }

    pub(crate) fn is_open(&self) -> bool {
        self.client.is_some()
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POSTs one envelope and returns the successful response.
    ///
    /// Applies content negotiation, the current credential header and the
    /// session id, and remembers any session id the server hands back.
    pub(crate) async fn post(
        &mut self,
        request: &RpcRequest,
        extra_headers: &[(&str, &str)],
    ) -> Result<reqwest::Response, McpError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| McpError::connection("HTTP transport not connected"))?;

        debug!(
            server = %self.server,
            url = %self.url,
            method = %request.method,
            request_id = request.id().unwrap_or("-"),
            "Sending MCP HTTP request"
        );

        let mut builder = client
            .post(&self.url)
            .header("Content-Type", JSON_CONTENT_TYPE)
            .header("Accept", JSON_AND_SSE_ACCEPT)
            .body(request.to_line()?);
        for (name, value) in extra_headers {
            builder = builder.header(*name, *value);
        }
        let auth_header = self.credentials.read().header();
        if let Some((name, value)) = auth_header {
            builder = builder.header(name, value);
        }
        if let Some(session_id) = &self.session_id {
            builder = builder.header(SESSION_HEADER, session_id);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| map_reqwest_error(err, self.timeout))?;
        if !response.status().is_success() {
            return Err(McpError::connection(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            self.session_id = Some(session_id.to_string());
        }

        Ok(response)
    }

    #[cfg(test)]
    pub(crate) fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

pub(crate) fn content_type(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Request/response over HTTP: one POST per call, whole body read at once.
pub struct HttpTransport {
    session: HttpSession,
}

impl HttpTransport {
    pub fn new(
        endpoint: &EndpointConfig,
        credentials: SharedCredentials,
    ) -> Result<Self, McpError> {
        Ok(Self {
            session: HttpSession::new(endpoint, credentials)?,
        })
    }

    #[cfg(test)]
    pub(crate) fn session_id(&self) -> Option<&str> {
        self.session.session_id()
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn connect(&mut self) -> Result<(), McpError> {
        self.session.open()
    }

    async fn disconnect(&mut self) {
        self.session.close();
    }

    async fn send_request(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        let request = RpcRequest::new(method, params);
        let timeout = self.session.timeout();
        let response = self.session.post(&request, &[]).await?;
        let content_type = content_type(&response);

        let envelope = if is_event_stream_content_type(&content_type) {
            first_sse_response(response, timeout).await?
        } else {
            let body = response
                .bytes()
                .await
                .map_err(|err| map_reqwest_error(err, timeout))?;
            serde_json::from_slice::<Value>(&body)
                .map_err(|err| McpError::connection(format!("invalid JSON response: {err}")))?
        };

        protocol::interpret_response(envelope)
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<(), McpError> {
        let request = RpcRequest::notification(method, params);
        self.session.post(&request, &[]).await.map(|_| ())
    }

    fn is_connected(&self) -> bool {
        self.session.is_open()
    }
}
