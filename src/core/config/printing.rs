use crate::core::config::data::{path_display, Config};
use crate::core::config::env::AMAP_API_KEY_ENV;
use crate::mcp::redact::mask_optional;
use crate::utils::url::redact_url;

impl Config {
    /// Label/value pairs describing the effective configuration. Every
    /// credential is masked.
    pub fn summary<F>(&self, lookup: F) -> Vec<(String, String)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut lines = Vec::new();
        let provider = self.ai_provider(&lookup);
        let key_env = self.ai_key_env(provider);
        let key = mask_optional(lookup(&key_env).as_deref());
        let (base_url, model) = self.ai_endpoint_display(provider, &lookup);
        lines.push(("ai.provider".to_string(), provider.to_string()));
        lines.push((key_env, key));
        lines.push(("ai.base_url".to_string(), base_url));
        lines.push(("ai.model".to_string(), model));
        lines.push((
            AMAP_API_KEY_ENV.to_string(),
            mask_optional(lookup(AMAP_API_KEY_ENV).as_deref()),
        ));
        lines.push((
            "security.enable_confirmation".to_string(),
            if self.security.confirmation_enabled() {
                "on".to_string()
            } else {
                "off".to_string()
            },
        ));
        lines.push((
            "security.audit_log".to_string(),
            path_display(self.audit_log_path()),
        ));

        if self.mcp_servers.is_empty() {
            lines.push(("mcp_servers".to_string(), "(none configured)".to_string()));
        }
        for server in &self.mcp_servers {
            let transport = server
                .transport_kind()
                .map(|kind| kind.to_string())
                .unwrap_or_else(|_| "invalid".to_string());
            let target = server
                .base_url
                .as_deref()
                .map(redact_url)
                .or_else(|| server.command.clone())
                .unwrap_or_else(|| "(unset)".to_string());
            let mut value = format!("{transport} {target}");
            if let Some(var) = server.auth_token_env.as_deref() {
                value.push_str(&format!(
                    " (auth: ${var} = {})",
                    mask_optional(lookup(var).as_deref())
                ));
            }
            if !server.is_enabled() {
                value.push_str(" [disabled]");
            }
            lines.push((format!("mcp_servers.{}", server.id), value));
        }
        lines
    }

    pub fn print_summary<F>(&self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        println!("Current configuration:");
        for (label, value) in self.summary(lookup) {
            println!("  {label}: {value}");
        }
    }
}
