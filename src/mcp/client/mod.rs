//! Generic MCP client: transport lifecycle, handshake, capability discovery
//! and the typed call surface.
//!
//! A client owns exactly one transport at a time. [`McpClient::connect`] is
//! the only place where whole-connection establishment is retried; calls
//! made on a `Ready` connection are never retried implicitly.

use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::mcp::endpoint::{AuthKind, Credentials, EndpointConfig, SharedCredentials};
use crate::mcp::error::{CatalogKind, McpError};
use crate::mcp::protocol::{
    self, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST,
    METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::mcp::registry::{
    parse_list_page, Catalog, CatalogEntry, PromptDescriptor, ResourceDescriptor, ToolDescriptor,
};
use crate::mcp::transport::{create_transport, McpTransport};
use crate::utils::url::{embedded_credential_params, redact_url};

/// Upper bound on `nextCursor` pages followed per catalog.
pub const MAX_DISCOVERY_PAGES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    DiscoveringCapabilities,
    Ready,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::DiscoveringCapabilities => "discovering capabilities",
            ConnectionState::Ready => "ready",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Builds a fresh transport for each connection attempt.
pub type TransportFactory = Box<
    dyn FnMut(&EndpointConfig, SharedCredentials) -> Result<Box<dyn McpTransport>, McpError>
        + Send,
>;

pub struct McpClient {
    endpoint: EndpointConfig,
    credentials: SharedCredentials,
    factory: TransportFactory,
    transport: Option<Box<dyn McpTransport>>,
    state: ConnectionState,
    server_info: Option<Value>,
    capabilities: Option<Value>,
    tools: Catalog<ToolDescriptor>,
    resources: Catalog<ResourceDescriptor>,
    prompts: Catalog<PromptDescriptor>,
    last_error: Option<McpError>,
    span: Span,
}

impl fmt::Debug for McpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpClient")
            .field("server", &self.endpoint.name)
            .field("kind", &self.endpoint.kind)
            .field("state", &self.state)
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Client using the built-in transport for the endpoint's kind.
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self::with_factory(endpoint, Box::new(create_transport))
    }

    pub fn with_factory(endpoint: EndpointConfig, factory: TransportFactory) -> Self {
        let span = tracing::info_span!("mcp_client", server = %endpoint.name);
        let credentials = SharedCredentials::new(endpoint.credentials.clone());
        Self {
            endpoint,
            credentials,
            factory,
            transport: None,
            state: ConnectionState::Disconnected,
            server_info: None,
            capabilities: None,
            tools: Catalog::default(),
            resources: Catalog::default(),
            prompts: Catalog::default(),
            last_error: None,
            span,
        }
    }

    /// Replaces the tracing span all of this client's work is recorded under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn name(&self) -> &str {
        &self.endpoint.name
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn last_error(&self) -> Option<&McpError> {
        self.last_error.as_ref()
    }

    /// `serverInfo` reported by the last successful handshake.
    pub fn server_info(&self) -> Option<&Value> {
        self.server_info.as_ref()
    }

    /// `capabilities` reported by the last successful handshake.
    pub fn capabilities(&self) -> Option<&Value> {
        self.capabilities.as_ref()
    }

    pub fn supports(&self, capability: &str) -> bool {
        protocol::supports_capability(self.capabilities.as_ref(), capability)
    }

    /// Establishes the connection, retrying whole attempts on failure.
    ///
    /// Makes one initial attempt plus up to `max_retries` more, sleeping
    /// `retry_delay * k` before retry `k`. `Ok` means the state is `Ready`
    /// with a complete discovery pass behind it; on `Err` the state is
    /// `Failed` and nothing is retried further.
    pub async fn connect(&mut self) -> Result<(), McpError> {
        let span = self.span.clone();
        async move {
            if self.is_ready() {
                return Ok(());
            }
            self.warn_on_url_credentials();

            let max_retries = self.endpoint.max_retries;
            let mut attempt: u32 = 0;
            loop {
                match self.establish().await {
                    Ok(()) => {
                        self.state = ConnectionState::Ready;
                        self.last_error = None;
                        info!(
                            tools = self.tools.len(),
                            resources = self.resources.len(),
                            prompts = self.prompts.len(),
                            "MCP connection ready"
                        );
                        return Ok(());
                    }
                    Err(err) => {
                        warn!(attempt = attempt + 1, error = %err, "MCP connection attempt failed");
                        self.abandon_attempt().await;
                        self.state = ConnectionState::Failed;
                        self.last_error = Some(err.clone());

                        if attempt >= max_retries {
                            error!(attempts = attempt + 1, "Giving up on MCP connection");
                            return Err(err);
                        }
                    }
                }

                attempt += 1;
                let delay = self.endpoint.retry_delay * attempt;
                self.state = ConnectionState::Reconnecting;
                info!(
                    retry = attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying MCP connection"
                );
                tokio::time::sleep(delay).await;
            }
        }
        .instrument(span)
        .await
    }

    async fn establish(&mut self) -> Result<(), McpError> {
        self.state = ConnectionState::Connecting;
        let mut transport = (self.factory)(&self.endpoint, self.credentials.clone())?;
        let connected = transport.connect().await;
        self.transport = Some(transport);
        connected?;

        self.state = ConnectionState::Handshaking;
        let handshake = self
            .request(
                METHOD_INITIALIZE,
                protocol::initialize_params(&self.endpoint.client_info),
            )
            .await?;
        let server_info = handshake.get("serverInfo").cloned();
        let capabilities = handshake
            .get("capabilities")
            .cloned()
            .unwrap_or_else(|| json!({}));
        debug!(server_info = ?server_info, capabilities = %capabilities, "MCP handshake complete");

        if let Some(transport) = self.transport.as_mut() {
            if let Err(err) = transport.notify(METHOD_INITIALIZED, json!({})).await {
                warn!(error = %err, "Failed to send initialized notification");
            }
        }

        self.state = ConnectionState::DiscoveringCapabilities;
        let supports = |name: &str| protocol::supports_capability(Some(&capabilities), name);
        let tools = if supports("tools") {
            self.discover::<ToolDescriptor>(METHOD_TOOLS_LIST, "tools").await?
        } else {
            Vec::new()
        };
        let resources = if supports("resources") {
            self.discover::<ResourceDescriptor>(METHOD_RESOURCES_LIST, "resources")
                .await?
        } else {
            Vec::new()
        };
        let prompts = if supports("prompts") {
            self.discover::<PromptDescriptor>(METHOD_PROMPTS_LIST, "prompts")
                .await?
        } else {
            Vec::new()
        };

        self.server_info = server_info;
        self.capabilities = Some(capabilities);
        self.tools.replace(tools);
        self.resources.replace(resources);
        self.prompts.replace(prompts);
        Ok(())
    }

    /// Fetches every page of one catalog. A server answering
    /// method-not-found simply has nothing of that kind.
    async fn discover<T: CatalogEntry>(
        &mut self,
        method: &str,
        field: &str,
    ) -> Result<Vec<T>, McpError> {
        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_DISCOVERY_PAGES {
            let page = match self
                .request(method, protocol::list_params(cursor.as_deref()))
                .await
            {
                Ok(page) => page,
                Err(err) if err.is_method_not_found() => {
                    debug!(method, "Server does not implement list method");
                    return Ok(entries);
                }
                Err(err) => return Err(err),
            };

            let (mut items, next_cursor) = parse_list_page::<T>(&page, field);
            entries.append(&mut items);
            match next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => return Ok(entries),
            }
        }

        warn!(method, pages = MAX_DISCOVERY_PAGES, "Stopped following list pagination");
        Ok(entries)
    }

    async fn abandon_attempt(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.disconnect().await;
        }
        self.clear_discovery();
    }

    fn clear_discovery(&mut self) {
        self.server_info = None;
        self.capabilities = None;
        self.tools.clear();
        self.resources.clear();
        self.prompts.clear();
    }

    fn warn_on_url_credentials(&self) {
        let Some(address) = self.endpoint.address.as_deref() else {
            return;
        };
        let params = embedded_credential_params(address);
        if !params.is_empty() {
            warn!(
                url = %redact_url(address),
                params = ?params,
                "Endpoint URL embeds credentials; configure them as auth instead"
            );
        }
    }

    /// Tears down the transport and forgets discovered catalogs. Idempotent.
    pub async fn disconnect(&mut self) {
        let span = self.span.clone();
        async move {
            if let Some(mut transport) = self.transport.take() {
                transport.disconnect().await;
                info!("MCP connection closed");
            }
            self.clear_discovery();
            self.state = ConnectionState::Disconnected;
        }
        .instrument(span)
        .await
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| McpError::connection("not connected"))?;
        transport.send_request(method, params).await
    }

    fn ensure_ready(&self) -> Result<(), McpError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(McpError::connection(format!(
                "not connected to '{}' (state: {})",
                self.endpoint.name, self.state
            )))
        }
    }

    /// Sends a call on a `Ready` connection. A transport that has lost its
    /// channel moves the client to `Disconnected`; the call is not retried.
    async fn dispatch(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        let span = self.span.clone();
        async move {
            let result = self.request(method, params).await;
            if let Err(err) = &result {
                let alive = self
                    .transport
                    .as_ref()
                    .is_some_and(|transport| transport.is_connected());
                if err.is_connection() && !alive {
                    warn!(method, error = %err, "MCP transport lost");
                    self.state = ConnectionState::Disconnected;
                }
                self.last_error = Some(err.clone());
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Invokes a discovered tool and returns its raw result unmodified.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.ensure_ready()?;
        if !self.tools.contains(name) {
            return Err(McpError::NotFound {
                kind: CatalogKind::Tool,
                name: name.to_string(),
                available: self.tools.keys(),
            });
        }
        self.dispatch(METHOD_TOOLS_CALL, json!({"name": name, "arguments": arguments}))
            .await
    }

    pub async fn get_resource(&mut self, uri: &str) -> Result<Value, McpError> {
        self.ensure_ready()?;
        if !self.resources.contains(uri) {
            return Err(McpError::NotFound {
                kind: CatalogKind::Resource,
                name: uri.to_string(),
                available: self.resources.keys(),
            });
        }
        self.dispatch(METHOD_RESOURCES_READ, json!({"uri": uri})).await
    }

    pub async fn get_prompt(
        &mut self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<Value, McpError> {
        self.ensure_ready()?;
        if !self.prompts.contains(name) {
            return Err(McpError::NotFound {
                kind: CatalogKind::Prompt,
                name: name.to_string(),
                available: self.prompts.keys(),
            });
        }
        let mut params = json!({"name": name});
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.dispatch(METHOD_PROMPTS_GET, params).await
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.snapshot()
    }

    pub fn list_resources(&self) -> Vec<ResourceDescriptor> {
        self.resources.snapshot()
    }

    pub fn list_prompts(&self) -> Vec<PromptDescriptor> {
        self.prompts.snapshot()
    }

    pub fn get_tool_info(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    pub fn get_resource_info(&self, uri: &str) -> Option<&ResourceDescriptor> {
        self.resources.get(uri)
    }

    pub fn get_prompt_info(&self, name: &str) -> Option<&PromptDescriptor> {
        self.prompts.get(name)
    }

    /// Swaps the credential used from the next request on. Does not
    /// reconnect.
    pub fn set_auth_token(&mut self, token: impl Into<String>, kind: AuthKind) {
        debug!(parent: &self.span, kind = ?kind, "Updating MCP credentials");
        let credentials = Credentials::new(kind, token);
        self.endpoint.credentials = credentials.clone();
        self.credentials.replace(credentials);
    }
}
