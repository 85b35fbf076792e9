use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use super::line_duplex::LineDuplex;
use super::{apply_meta_credentials, McpTransport};
use crate::mcp::endpoint::{EndpointConfig, SharedCredentials};
use crate::mcp::error::McpError;

/// Where a socket endpoint lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
    Tcp(String),
    #[cfg(unix)]
    Unix(std::path::PathBuf),
}

impl SocketAddress {
    /// Accepts `tcp://host:port`, bare `host:port`, or `unix:///path`.
    pub fn parse(address: &str) -> Result<Self, McpError> {
        let address = address.trim();
        if let Some(path) = address.strip_prefix("unix://") {
            return unix_address(path);
        }
        if let Some(path) = address.strip_prefix("unix:") {
            return unix_address(path);
        }
        let host_port = address.strip_prefix("tcp://").unwrap_or(address);
        let host_port = host_port.trim_end_matches('/');
        if host_port.rsplit_once(':').is_none_or(|(host, port)| {
            host.is_empty() || port.parse::<u16>().is_err()
        }) {
            return Err(McpError::config(format!(
                "socket address must look like tcp://host:port, got '{address}'"
            )));
        }
        Ok(SocketAddress::Tcp(host_port.to_string()))
    }
}

#[cfg(unix)]
fn unix_address(path: &str) -> Result<SocketAddress, McpError> {
    if path.is_empty() {
        return Err(McpError::config("unix socket path is empty"));
    }
    Ok(SocketAddress::Unix(std::path::PathBuf::from(path)))
}

#[cfg(not(unix))]
fn unix_address(_path: &str) -> Result<SocketAddress, McpError> {
    Err(McpError::config("unix sockets are not supported on this platform"))
}

/// Newline-delimited JSON-RPC over a TCP or Unix stream socket.
pub struct SocketTransport {
    server: String,
    address: SocketAddress,
    timeout: Duration,
    credentials: SharedCredentials,
    duplex: Option<LineDuplex>,
}

impl SocketTransport {
    pub fn new(
        endpoint: &EndpointConfig,
        credentials: SharedCredentials,
    ) -> Result<Self, McpError> {
        Ok(Self {
            server: endpoint.name.clone(),
            address: SocketAddress::parse(endpoint.require_address()?)?,
            timeout: endpoint.timeout,
            credentials,
            duplex: None,
        })
    }

    fn duplex(&mut self) -> Result<&mut LineDuplex, McpError> {
        self.duplex
            .as_mut()
            .ok_or_else(|| McpError::connection("socket transport not connected"))
    }
}

/// Dials `address` and starts routing replies.
async fn open(
    address: SocketAddress,
    label: String,
    timeout: Duration,
) -> Result<LineDuplex, McpError> {
    match address {
        SocketAddress::Tcp(host_port) => {
            let stream = tokio::time::timeout(timeout, TcpStream::connect(host_port.as_str()))
                .await
                .map_err(|_| McpError::Timeout(timeout))?
                .map_err(|err| {
                    McpError::connection(format!("failed to connect to {host_port}: {err}"))
                })?;
            let (read, write) = stream.into_split();
            Ok(LineDuplex::spawn(label, read, write, timeout))
        }
        #[cfg(unix)]
        SocketAddress::Unix(path) => {
            let stream = tokio::time::timeout(timeout, tokio::net::UnixStream::connect(&path))
                .await
                .map_err(|_| McpError::Timeout(timeout))?
                .map_err(|err| {
                    McpError::connection(format!("failed to connect to {}: {err}", path.display()))
                })?;
            let (read, write) = stream.into_split();
            Ok(LineDuplex::spawn(label, read, write, timeout))
        }
    }
}

#[async_trait]
impl McpTransport for SocketTransport {
    async fn connect(&mut self) -> Result<(), McpError> {
        if self.duplex.is_none() {
            debug!(server = %self.server, address = ?self.address, "Opening MCP socket");
            let label = format!("socket server '{}'", self.server);
            let duplex = open(self.address.clone(), label, self.timeout).await?;
            self.duplex = Some(duplex);
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut duplex) = self.duplex.take() {
            duplex.shutdown().await;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::endpoint::AuthKind;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn parses_socket_addresses() {
        assert_eq!(
            SocketAddress::parse("tcp://127.0.0.1:7000").ok(),
            Some(SocketAddress::Tcp("127.0.0.1:7000".to_string()))
        );
        assert_eq!(
            SocketAddress::parse("localhost:9").ok(),
            Some(SocketAddress::Tcp("localhost:9".to_string()))
        );
        assert!(SocketAddress::parse("tcp://nohost").is_err());
        assert!(SocketAddress::parse("tcp://:80").is_err());
        #[cfg(unix)]
        assert_eq!(
            SocketAddress::parse("unix:///tmp/mcp.sock").ok(),
            Some(SocketAddress::Unix("/tmp/mcp.sock".into()))
        );
    }

    #[tokio::test]
    async fn sends_credentials_in_meta_and_reads_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            let line = lines.next_line().await.expect("read").expect("line");
            let request: Value = serde_json::from_str(&line).expect("json");
            let reply = json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "result": {"echo": request["params"]}
            });
            write
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .expect("write");
        });

        let endpoint = EndpointConfig::socket("sock", format!("tcp://{addr}"))
            .with_credentials(AuthKind::ApiKey, "abc123");
        let credentials = SharedCredentials::new(endpoint.credentials.clone());
        let mut transport = SocketTransport::new(&endpoint, credentials).expect("transport");
        transport.connect().await.expect("connect");
        assert!(transport.is_connected());

        let result = transport
            .send_request("tools/call", json!({"name": "ping"}))
            .await
            .expect("reply");
        assert_eq!(result["echo"]["name"], "ping");
        assert_eq!(result["echo"]["_meta"]["apiKey"], "abc123");

        server.await.expect("server");
        transport.disconnect().await;
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn connects_from_a_spawned_task() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let accept = tokio::spawn(async move { listener.accept().await.map(|(stream, _)| stream) });

        let endpoint = EndpointConfig::socket("sock", format!("tcp://{addr}"));
        let transport =
            SocketTransport::new(&endpoint, SharedCredentials::default()).expect("transport");
        let mut transport = tokio::spawn(async move {
            let mut transport = transport;
            transport.connect().await.map(|()| transport)
        })
        .await
        .expect("join")
        .expect("connect");

        assert!(transport.is_connected());
        assert!(transport.receive_event().await.is_none());
        let _peer = accept.await.expect("join").expect("accept");
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn refused_connection_is_a_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let endpoint = EndpointConfig::socket("sock", format!("tcp://{addr}"));
        let mut transport =
            SocketTransport::new(&endpoint, SharedCredentials::default()).expect("transport");
        let err = transport.connect().await.expect_err("refused");
        assert!(matches!(err, McpError::Connection(_)));
    }
}
