//! Permissioned tool invocation across many named MCP connections.
//!
//! Every [`ToolGateway::call_tool`] attempt is classified, validated against
//! the security policy, executed if allowed, and recorded as exactly one
//! audit entry whatever the outcome.

use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use tracing::{error, info, info_span, warn, Instrument, Span};

use crate::mcp::audit::{AuditEntry, AuditLogger, AuditStatus};
use crate::mcp::client::McpClient;
use crate::mcp::endpoint::EndpointConfig;
use crate::mcp::error::McpError;
use crate::mcp::permissions::{PermissionRecord, PermissionTier};
use crate::mcp::registry::ToolDescriptor;
use crate::mcp::security::{DenialReason, SecurityValidator, Verdict};

/// Failures surfaced by the gateway. Each variant is a distinct condition a
/// caller can branch on.
#[derive(Debug)]
pub enum GatewayError {
    AlreadyRegistered(String),

    /// The server could not be connected during registration.
    Registration { name: String, source: McpError },

    UnknownServer(String),

    UnknownTool { server: String, tool: String },

    PermissionDenied {
        server: String,
        tool: String,
        reason: DenialReason,
    },

    /// The call was allowed but the client or transport failed.
    Execution(McpError),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::AlreadyRegistered(name) => {
                write!(f, "Server '{name}' is already registered")
            }
            GatewayError::Registration { name, source } => {
                write!(f, "Failed to register server '{name}': {source}")
            }
            GatewayError::UnknownServer(name) => write!(f, "Server '{name}' not registered"),
            GatewayError::UnknownTool { server, tool } => {
                write!(f, "Tool '{tool}' not found on server '{server}'")
            }
            GatewayError::PermissionDenied {
                server,
                tool,
                reason,
            } => write!(f, "Permission denied for {server}.{tool}: {reason}"),
            GatewayError::Execution(source) => write!(f, "Tool execution failed: {source}"),
        }
    }
}

impl StdError for GatewayError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            GatewayError::Registration { source, .. } => Some(source),
            GatewayError::Execution(source) => Some(source),
            _ => None,
        }
    }
}

struct ManagedServer {
    client: McpClient,
    permissions: BTreeMap<String, PermissionRecord>,
}

/// What a single attempt produced, before it is audited.
struct CallOutcome {
    tier: PermissionTier,
    user_confirmed: bool,
    result: Result<Value, GatewayError>,
}

impl CallOutcome {
    fn failed(tier: PermissionTier, error: GatewayError) -> Self {
        Self {
            tier,
            user_confirmed: false,
            result: Err(error),
        }
    }

    fn audit_status(&self) -> (AuditStatus, String) {
        match &self.result {
            Ok(_) => (AuditStatus::Success, "Tool call completed".to_string()),
            Err(GatewayError::PermissionDenied {
                reason: DenialReason::UserDeclined,
                ..
            }) => (AuditStatus::Denied, "User denied confirmation".to_string()),
            Err(GatewayError::PermissionDenied { reason, .. }) => {
                (AuditStatus::Denied, reason.to_string())
            }
            Err(GatewayError::Execution(source)) => (AuditStatus::Error, source.to_string()),
            Err(other) => (AuditStatus::Error, other.to_string()),
        }
    }
}

pub struct ToolGateway {
    servers: BTreeMap<String, ManagedServer>,
    validator: SecurityValidator,
    audit: AuditLogger,
    span: Span,
}

impl ToolGateway {
    pub fn new(validator: SecurityValidator, audit: AuditLogger) -> Self {
        Self {
            servers: BTreeMap::new(),
            validator,
            audit,
            span: info_span!("tool_gateway"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Connects a new client for `endpoint` and registers it.
    pub async fn register_server(&mut self, endpoint: EndpointConfig) -> Result<(), GatewayError> {
        let span = info_span!(parent: &self.span, "mcp_client", server = %endpoint.name);
        let client = McpClient::new(endpoint).with_span(span);
        self.register_client(client).await
    }

    /// Connects `client`, classifies its tools, and starts managing it.
    /// A name that is already registered is refused without touching the
    /// existing connection.
    pub async fn register_client(&mut self, mut client: McpClient) -> Result<(), GatewayError> {
        let name = client.name().to_string();
        if self.servers.contains_key(&name) {
            warn!(parent: &self.span, server = %name, "Server already registered");
            return Err(GatewayError::AlreadyRegistered(name));
        }

        client
            .connect()
            .await
            .map_err(|source| GatewayError::Registration {
                name: name.clone(),
                source,
            })?;

        let permissions: BTreeMap<String, PermissionRecord> = client
            .list_tools()
            .iter()
            .map(|tool| {
                let record = PermissionRecord::classify(&name, &tool.name, tool.description());
                (tool.name.clone(), record)
            })
            .collect();

        info!(
            parent: &self.span,
            server = %name,
            tools = permissions.len(),
            "Registered MCP server"
        );
        self.servers.insert(
            name,
            ManagedServer {
                client,
                permissions,
            },
        );
        Ok(())
    }

    pub async fn unregister_server(&mut self, name: &str) -> Result<(), GatewayError> {
        let Some(mut managed) = self.servers.remove(name) else {
            return Err(GatewayError::UnknownServer(name.to_string()));
        };
        managed.client.disconnect().await;
        info!(parent: &self.span, server = %name, "Unregistered MCP server");
        Ok(())
    }

    pub async fn disconnect_all(&mut self) {
        let names: Vec<String> = self.servers.keys().cloned().collect();
        for name in names {
            // Only registered names are iterated, so this cannot fail.
            let _ = self.unregister_server(&name).await;
        }
        info!(parent: &self.span, "Disconnected from all servers");
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    pub fn client(&self, name: &str) -> Option<&McpClient> {
        self.servers.get(name).map(|managed| &managed.client)
    }

    /// Permission records of every registered server's tools.
    pub fn list_all_tools(&self) -> BTreeMap<String, Vec<PermissionRecord>> {
        self.servers
            .iter()
            .map(|(name, managed)| (name.clone(), managed.permissions.values().cloned().collect()))
            .collect()
    }

    pub fn server_capabilities(&self, name: &str) -> Result<Vec<PermissionRecord>, GatewayError> {
        self.servers
            .get(name)
            .map(|managed| managed.permissions.values().cloned().collect())
            .ok_or_else(|| GatewayError::UnknownServer(name.to_string()))
    }

    pub fn permission(&self, server: &str, tool: &str) -> Option<&PermissionRecord> {
        self.servers.get(server)?.permissions.get(tool)
    }

    pub fn has_tool(&self, server: &str, tool: &str) -> bool {
        self.permission(server, tool).is_some()
    }

    pub fn tool_descriptor(&self, server: &str, tool: &str) -> Option<&ToolDescriptor> {
        self.servers.get(server)?.client.get_tool_info(tool)
    }

    /// Most recent audit entries, newest first.
    pub fn audit_logs(&self, count: usize) -> io::Result<Vec<AuditEntry>> {
        self.audit.recent(count)
    }

    pub fn validator(&self) -> &SecurityValidator {
        &self.validator
    }

    pub fn audit_logger(&self) -> &AuditLogger {
        &self.audit
    }

    /// Validates and executes one tool call, then records it.
    ///
    /// With `skip_confirmation` set no prompt is shown: a dangerous call
    /// that would need one is denied instead.
    pub async fn call_tool(
        &mut self,
        server: &str,
        tool: &str,
        arguments: Value,
        skip_confirmation: bool,
    ) -> Result<Value, GatewayError> {
        let span = self.span.clone();
        async move {
            let outcome = self
                .execute(server, tool, &arguments, skip_confirmation)
                .await;
            self.record(server, tool, &arguments, &outcome);
            outcome.result
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &mut self,
        server: &str,
        tool: &str,
        arguments: &Value,
        skip_confirmation: bool,
    ) -> CallOutcome {
        let Some(managed) = self.servers.get(server) else {
            return CallOutcome::failed(
                PermissionTier::infer(tool),
                GatewayError::UnknownServer(server.to_string()),
            );
        };
        let Some(record) = managed.permissions.get(tool).cloned() else {
            return CallOutcome::failed(
                PermissionTier::infer(tool),
                GatewayError::UnknownTool {
                    server: server.to_string(),
                    tool: tool.to_string(),
                },
            );
        };

        let user_confirmed = match self
            .validator
            .validate(&record, arguments, skip_confirmation)
            .await
        {
            Verdict::Allowed { user_confirmed } => user_confirmed,
            Verdict::Denied(reason) => {
                warn!(server, tool, reason = %reason, "Tool call denied");
                return CallOutcome::failed(
                    record.tier,
                    GatewayError::PermissionDenied {
                        server: server.to_string(),
                        tool: tool.to_string(),
                        reason,
                    },
                );
            }
        };

        let Some(managed) = self.servers.get_mut(server) else {
            return CallOutcome::failed(
                record.tier,
                GatewayError::UnknownServer(server.to_string()),
            );
        };
        let result = managed
            .client
            .call_tool(tool, arguments.clone())
            .await
            .map_err(GatewayError::Execution);
        CallOutcome {
            tier: record.tier,
            user_confirmed,
            result,
        }
    }

    fn record(&self, server: &str, tool: &str, arguments: &Value, outcome: &CallOutcome) {
        let (status, message) = outcome.audit_status();
        let entry = AuditEntry::new(
            server,
            tool,
            outcome.tier,
            arguments,
            status,
            message,
            outcome.user_confirmed,
        );
        if let Err(err) = self.audit.append(&entry) {
            error!(
                path = %self.audit.path().display(),
                error = %err,
                "Failed to write audit entry"
            );
        }
    }
}
