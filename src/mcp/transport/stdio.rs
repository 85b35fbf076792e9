use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::line_duplex::LineDuplex;
use super::{apply_meta_credentials, McpTransport};
use crate::mcp::endpoint::{EndpointConfig, SharedCredentials};
use crate::mcp::error::McpError;

const CHILD_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Newline-delimited JSON-RPC over a spawned server's stdin/stdout.
///
/// The transport owns the child process and kills it on disconnect or drop
/// without waiting for the server to shut down on its own.
pub struct StdioTransport {
    server: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    timeout: Duration,
    credentials: SharedCredentials,
    child: Option<Child>,
    duplex: Option<LineDuplex>,
}

impl StdioTransport {
    pub fn new(
        endpoint: &EndpointConfig,
        credentials: SharedCredentials,
    ) -> Result<Self, McpError> {
        Ok(Self {
            server: endpoint.name.clone(),
            command: endpoint.require_command()?.to_string(),
            args: endpoint.args.clone(),
            env: endpoint.env.clone(),
            timeout: endpoint.timeout,
            credentials,
            child: None,
            duplex: None,
        })
    }

    fn duplex(&mut self) -> Result<&mut LineDuplex, McpError> {
        self.duplex
            .as_mut()
            .ok_or_else(|| McpError::connection("stdio transport not connected"))
    }

    /// Process id of the running server, if any.
    pub fn child_id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

fn spawn_stderr_drain(server: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(server = %server, stderr = %line, "MCP server stderr");
        }
    });
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn connect(&mut self) -> Result<(), McpError> {
        if self.duplex.is_some() {
            return Ok(());
        }

        debug!(
            server = %self.server,
            command = %self.command,
            args = ?self.args,
            "Starting MCP stdio server"
        );
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                McpError::connection(format!("failed to start '{}': {err}", self.command))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::connection("unable to capture server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::connection("unable to capture server stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_drain(self.server.clone(), stderr);
        }

        let label = format!("stdio server '{}'", self.server);
        self.duplex = Some(LineDuplex::spawn(label, stdout, stdin, self.timeout));
        self.child = Some(child);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut duplex) = self.duplex.take() {
            duplex.shutdown().await;
        }
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.start_kill() {
                debug!(server = %self.server, error = %err, "MCP stdio server already exited");
            }
            match tokio::time::timeout(CHILD_REAP_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(server = %self.server, %status, "MCP stdio server stopped")
                }
                Ok(Err(err)) => {
                    warn!(server = %self.server, error = %err, "Failed to reap MCP stdio server")
                }
                Err(_) => warn!(server = %self.server, "MCP stdio server did not exit after kill"),
            }
        }
    }

    async fn send_request(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        let params = apply_meta_credentials(params, &self.credentials.snapshot());
        self.duplex()?.request(method, params).await
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<(), McpError> {
        self.duplex()?.notify(method, params).await
    }

    fn is_connected(&self) -> bool {
        self.duplex.as_ref().is_some_and(LineDuplex::is_alive)
    }
}
