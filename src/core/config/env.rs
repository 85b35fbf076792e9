use std::collections::HashMap;
use tracing::info;

use crate::core::config::data::{infer_http_transport, Config, McpServerConfig};
use crate::mcp::endpoint::AuthKind;

pub const AMAP_SERVER_ID: &str = "amap";
pub const AMAP_SERVER_URL_ENV: &str = "AMAP_MCP_SERVER_URL";
pub const AMAP_SERVER_PATH_ENV: &str = "AMAP_MCP_SERVER_PATH";
pub const AMAP_API_KEY_ENV: &str = "AMAP_API_KEY";

/// Reads a variable from the process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

impl Config {
    /// Synthesizes the `amap` server from environment variables when the
    /// config file declares no servers. A URL wins over a command path.
    pub fn apply_env_fallbacks<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if !self.mcp_servers.is_empty() {
            return;
        }
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let has_key = non_empty(AMAP_API_KEY_ENV).is_some();

        if let Some(url) = non_empty(AMAP_SERVER_URL_ENV) {
            let transport = infer_http_transport(&url);
            info!(
                var = AMAP_SERVER_URL_ENV,
                transport = %transport,
                "Using MCP server from environment"
            );
            self.mcp_servers.push(McpServerConfig {
                id: AMAP_SERVER_ID.to_string(),
                transport: Some(transport.to_string()),
                base_url: Some(url),
                auth: has_key.then_some(AuthKind::ApiKey),
                auth_token_env: has_key.then(|| AMAP_API_KEY_ENV.to_string()),
                ..Default::default()
            });
        } else if let Some(command) = non_empty(AMAP_SERVER_PATH_ENV) {
            info!(var = AMAP_SERVER_PATH_ENV, "Using MCP server command from environment");
            let env = non_empty(AMAP_API_KEY_ENV)
                .map(|key| HashMap::from([(AMAP_API_KEY_ENV.to_string(), key)]));
            self.mcp_servers.push(McpServerConfig {
                id: AMAP_SERVER_ID.to_string(),
                transport: Some("stdio".to_string()),
                command: Some(command),
                env,
                ..Default::default()
            });
        }
    }
}
