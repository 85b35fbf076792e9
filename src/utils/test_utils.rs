//! Scripted in-memory MCP server for exercising clients and the gateway.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::mcp::client::{McpClient, TransportFactory};
use crate::mcp::endpoint::{EndpointConfig, SharedCredentials};
use crate::mcp::error::{McpError, METHOD_NOT_FOUND};
use crate::mcp::security::{ConfirmationRequest, ConfirmationResponse, Confirmer};
use crate::mcp::transport::McpTransport;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub params: Value,
    /// Auth header value in effect when the request was sent.
    pub auth: Option<String>,
}

#[derive(Debug, Default)]
struct LogInner {
    connect_attempts: usize,
    disconnects: usize,
    calls: Vec<RecordedCall>,
    notifications: Vec<String>,
}

/// Shared record of everything the fake server saw.
#[derive(Debug, Clone, Default)]
pub struct FakeLog(Arc<Mutex<LogInner>>);

impl FakeLog {
    fn with<R>(&self, f: impl FnOnce(&mut LogInner) -> R) -> R {
        let mut inner = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut inner)
    }

    pub fn connect_attempts(&self) -> usize {
        self.with(|inner| inner.connect_attempts)
    }

    pub fn disconnects(&self) -> usize {
        self.with(|inner| inner.disconnects)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.with(|inner| inner.calls.clone())
    }

    pub fn methods(&self) -> Vec<String> {
        self.with(|inner| inner.calls.iter().map(|call| call.method.clone()).collect())
    }

    pub fn notifications(&self) -> Vec<String> {
        self.with(|inner| inner.notifications.clone())
    }
}

fn tool_descriptor(name: &str) -> Value {
    json!({
        "name": name,
        "description": format!("{name} tool"),
        "inputSchema": {"type": "object"}
    })
}

/// Behaviour of the fake server; cloned into every transport it builds.
#[derive(Clone)]
pub struct FakeServer {
    capabilities: Value,
    /// Shared so a test can change the catalog between connects.
    tools: Arc<Mutex<Vec<Value>>>,
    resources: Vec<Value>,
    prompts: Vec<Value>,
    tool_results: HashMap<String, Result<Value, McpError>>,
    default_tool_result: Value,
    failing_connects: usize,
    fail_initialize: bool,
    unsupported: Vec<String>,
    log: FakeLog,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            capabilities: json!({"tools": {}}),
            tools: Arc::default(),
            resources: Vec::new(),
            prompts: Vec::new(),
            tool_results: HashMap::new(),
            default_tool_result: json!({"content": [{"type": "text", "text": "ok"}]}),
            failing_connects: 0,
            fail_initialize: false,
            unsupported: Vec::new(),
            log: FakeLog::default(),
        }
    }

    fn tools(&self) -> std::sync::MutexGuard<'_, Vec<Value>> {
        self.tools.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_tools(self, names: &[&str]) -> Self {
        self.tools().extend(names.iter().map(|name| tool_descriptor(name)));
        self
    }

    pub fn with_tool_descriptors(self, tools: Vec<Value>) -> Self {
        self.tools().extend(tools);
        self
    }

    /// Replaces the advertised tools for every later `tools/list`.
    pub fn set_tools(&self, names: &[&str]) {
        *self.tools() = names.iter().map(|name| tool_descriptor(name)).collect();
    }

    pub fn with_resources(mut self, resources: Vec<Value>) -> Self {
        self.capabilities["resources"] = json!({});
        self.resources = resources;
        self
    }

    pub fn with_prompts(mut self, prompts: Vec<Value>) -> Self {
        self.capabilities["prompts"] = json!({});
        self.prompts = prompts;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_tool_result(mut self, tool: &str, result: Result<Value, McpError>) -> Self {
        self.tool_results.insert(tool.to_string(), result);
        self
    }

    /// The first `count` connect attempts are refused.
    pub fn failing_connects(mut self, count: usize) -> Self {
        self.failing_connects = count;
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// Answers `method` with JSON-RPC method-not-found.
    pub fn without_method(mut self, method: &str) -> Self {
        self.unsupported.push(method.to_string());
        self
    }

    pub fn log(&self) -> FakeLog {
        self.log.clone()
    }

    pub fn factory(&self) -> TransportFactory {
        let server = self.clone();
        Box::new(move |_endpoint, credentials| {
            let transport: Box<dyn McpTransport> = Box::new(FakeTransport {
                server: server.clone(),
                credentials,
                connected: false,
            });
            Ok(transport)
        })
    }

    /// A client wired to this server that does not retry or wait.
    pub fn client(&self, name: &str) -> McpClient {
        let endpoint =
            EndpointConfig::http(name, "http://fake.invalid/mcp").with_retries(0, Duration::ZERO);
        McpClient::with_factory(endpoint, self.factory())
    }

    fn respond(&self, method: &str, params: &Value) -> Result<Value, McpError> {
        if self.unsupported.iter().any(|m| m == method) {
            return Err(McpError::Protocol {
                code: Some(METHOD_NOT_FOUND),
                message: "Method not found".to_string(),
                data: None,
            });
        }
        match method {
            "initialize" if self.fail_initialize => Err(McpError::Protocol {
                code: Some(-32603),
                message: "initialize rejected".to_string(),
                data: None,
            }),
            "initialize" => Ok(json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {"name": "fake", "version": "0.0.1"},
                "capabilities": self.capabilities,
            })),
            "tools/list" => Ok(json!({"tools": self.tools().clone()})),
            "resources/list" => Ok(json!({"resources": self.resources})),
            "prompts/list" => Ok(json!({"prompts": self.prompts})),
            "tools/call" => {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                self.tool_results
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| Ok(self.default_tool_result.clone()))
            }
            "resources/read" => Ok(json!({
                "contents": [{"uri": params["uri"], "text": "resource body"}]
            })),
            "prompts/get" => Ok(json!({
                "messages": [{"role": "user", "content": {"type": "text", "text": "prompt"}}]
            })),
            _ => Err(McpError::Protocol {
                code: Some(METHOD_NOT_FOUND),
                message: format!("Method not found: {method}"),
                data: None,
            }),
        }
    }
}

struct FakeTransport {
    server: FakeServer,
    credentials: SharedCredentials,
    connected: bool,
}

#[async_trait]
impl McpTransport for FakeTransport {
    async fn connect(&mut self) -> Result<(), McpError> {
        let attempt = self.server.log.with(|inner| {
            inner.connect_attempts += 1;
            inner.connect_attempts
        });
        if attempt <= self.server.failing_connects {
            return Err(McpError::connection("fake server refused connection"));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.server.log.with(|inner| inner.disconnects += 1);
    }

    async fn send_request(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        if !self.connected {
            return Err(McpError::connection("fake transport not connected"));
        }
        let auth = self.credentials.snapshot().header().map(|(_, value)| value);
        self.server.log.with(|inner| {
            inner.calls.push(RecordedCall {
                method: method.to_string(),
                params: params.clone(),
                auth,
            })
        });
        self.server.respond(method, &params)
    }

    async fn notify(&mut self, method: &str, _params: Value) -> Result<(), McpError> {
        self.server
            .log
            .with(|inner| inner.notifications.push(method.to_string()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[derive(Debug, Default)]
struct ScriptInner {
    answers: VecDeque<ConfirmationResponse>,
    requests: Vec<ConfirmationRequest>,
}

/// Confirmer that replays canned answers and records every prompt.
/// Answers `No` once the script runs out.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConfirmer(Arc<Mutex<ScriptInner>>);

impl ScriptedConfirmer {
    pub fn new(answers: &[ConfirmationResponse]) -> Self {
        Self(Arc::new(Mutex::new(ScriptInner {
            answers: answers.iter().copied().collect(),
            requests: Vec::new(),
        })))
    }

    fn with<R>(&self, f: impl FnOnce(&mut ScriptInner) -> R) -> R {
        let mut inner = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut inner)
    }

    pub fn prompts(&self) -> usize {
        self.with(|inner| inner.requests.len())
    }

    pub fn requests(&self) -> Vec<ConfirmationRequest> {
        self.with(|inner| inner.requests.clone())
    }
}

#[async_trait]
impl Confirmer for ScriptedConfirmer {
    async fn confirm(&self, request: &ConfirmationRequest) -> ConfirmationResponse {
        self.with(|inner| {
            inner.requests.push(request.clone());
            inner.answers.pop_front().unwrap_or(ConfirmationResponse::No)
        })
    }
}
