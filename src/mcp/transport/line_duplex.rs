//! Newline-delimited JSON-RPC over any byte duplex.
//!
//! Used by the process-pipe and socket transports: requests are written one
//! per line, and a background reader routes replies to waiting callers by id.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::mcp::error::McpError;
use crate::mcp::protocol::{self, RpcRequest};

type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

fn lock(pending: &PendingReplies) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Value>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a pending entry if the waiting request is abandoned early.
struct PendingGuard {
    pending: PendingReplies,
    id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.id);
    }
}

pub(crate) struct LineDuplex {
    label: String,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    pending: PendingReplies,
    reader: JoinHandle<()>,
    timeout: Duration,
}

impl LineDuplex {
    /// Takes ownership of both halves and starts routing replies.
    pub(crate) fn spawn<R, W>(
        label: impl Into<String>,
        reader: R,
        writer: W,
        timeout: Duration,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let label = label.into();
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let reader = spawn_reader(label.clone(), reader, pending.clone());
        Self {
            label,
            writer: Box::new(writer),
            pending,
            reader,
            timeout,
        }
    }

    /// False once the peer has closed its output.
    pub(crate) fn is_alive(&self) -> bool {
        !self.reader.is_finished()
    }

    pub(crate) async fn request(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        if !self.is_alive() {
            return Err(McpError::connection(format!("{} is closed", self.label)));
        }

        let request = RpcRequest::new(method, params);
        let id = request.id().unwrap_or_default().to_string();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id.clone(), tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id: id.clone(),
        };

        debug!(transport = %self.label, method, request_id = %id, "Sending MCP request");
        self.write_line(&request).await?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(envelope)) => protocol::interpret_response(envelope),
            Ok(Err(_)) => Err(McpError::connection(format!(
                "{} closed before responding to {method}",
                self.label
            ))),
            Err(_) => {
                debug!(transport = %self.label, method, request_id = %id, "MCP request timed out");
                Err(McpError::Timeout(self.timeout))
            }
        }
    }

    pub(crate) async fn notify(&mut self, method: &str, params: Value) -> Result<(), McpError> {
        let notification = RpcRequest::notification(method, params);
        self.write_line(&notification).await
    }

    async fn write_line(&mut self, request: &RpcRequest) -> Result<(), McpError> {
        let mut line = request.to_line()?;
        line.push('\n');
        let writer = &mut self.writer;
        let write = async move {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(McpError::connection(format!(
                "failed to write to {}: {err}",
                self.label
            ))),
            Err(_) => Err(McpError::Timeout(self.timeout)),
        }
    }

    /// Stops the reader and fails every outstanding request.
    pub(crate) async fn shutdown(&mut self) {
        self.reader.abort();
        lock(&self.pending).clear();
        let _ = self.writer.shutdown().await;
    }
}

impl Drop for LineDuplex {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn spawn_reader<R>(label: String, reader: R, pending: PendingReplies) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let message = match serde_json::from_str::<Value>(line) {
                        Ok(message) => message,
                        Err(err) => {
                            debug!(transport = %label, error = %err, "Ignoring non-JSON line");
                            continue;
                        }
                    };
                    route(&label, &pending, message);
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(transport = %label, error = %err, "MCP reader failed");
                    break;
                }
            }
        }
        debug!(transport = %label, "MCP peer closed its output");
        lock(&pending).clear();
    })
}

fn route(label: &str, pending: &PendingReplies, message: Value) {
    if let Value::Array(batch) = message {
        for item in batch {
            route(label, pending, item);
        }
        return;
    }

    if !protocol::is_response(&message) {
        let method = message.get("method").and_then(Value::as_str).unwrap_or("-");
        debug!(transport = %label, method, "Ignoring server-initiated message");
        return;
    }

    let Some(id) = protocol::response_id(&message) else {
        debug!(transport = %label, "Ignoring response without id");
        return;
    };

    match lock(pending).remove(&id) {
        Some(tx) => {
            let _ = tx.send(message);
        }
        None => debug!(transport = %label, response_id = %id, "Ignoring unmatched response"),
    }
}
