use super::data::{
    infer_http_transport, path_display, AiConfig, AiProvider, Config, McpServerConfig,
};
use super::io::ConfigError;
use crate::mcp::endpoint::{AuthKind, TransportKind};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn test_load_nonexistent_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nonexistent_config.toml");

    let config = Config::load_from_path(&config_path).expect("Failed to load config");

    assert!(config.mcp_servers.is_empty());
    assert!(config.security.confirmation_enabled());
}

#[test]
fn parses_full_config_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
[[mcp_servers]]
id = "amap"
transport = "http_sse"
base_url = "https://mcp.amap.com/sse"
auth = "api_key"
auth_token_env = "AMAP_API_KEY"
timeout_secs = 10
max_retries = 1
retry_delay_ms = 250

[[mcp_servers]]
id = "files"
command = "mcp-file-server"
args = ["--root", "/tmp"]
enabled = false

[security]
enable_confirmation = false
audit_log = "/var/tmp/audit.log"

[ai]
model = "qwen-plus"
"#,
    )
    .expect("write failed");

    let config = Config::load_from_path(&config_path).expect("Failed to load config");
    assert_eq!(config.mcp_servers.len(), 2);
    assert_eq!(config.mcp_servers[0].auth, Some(AuthKind::ApiKey));
    assert_eq!(config.enabled_servers().count(), 1);
    assert!(!config.security.confirmation_enabled());
    assert_eq!(config.audit_log_path(), PathBuf::from("/var/tmp/audit.log"));
    assert_eq!(config.ai.model.as_deref(), Some("qwen-plus"));
    assert!(config.get_server("AMAP").is_some());
}

#[test]
fn reports_parse_errors_with_path() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("broken.toml");
    fs::write(&config_path, "[[mcp_servers]\nid = ").expect("write failed");

    let err = Config::load_from_path(&config_path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("Failed to parse config at"));
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn save_then_load_round_trips() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nested").join("config.toml");

    let config = Config {
        mcp_servers: vec![McpServerConfig {
            id: "local".to_string(),
            transport: Some("socket".to_string()),
            base_url: Some("tcp://127.0.0.1:7000".to_string()),
            ..Default::default()
        }],
        ai: AiConfig {
            base_url: Some("https://llm.example.com/v1".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    config
        .save_to_path(&config_path)
        .expect("Failed to save config");

    let loaded = Config::load_from_path(&config_path).expect("Failed to load config");
    assert_eq!(loaded, config);
}

#[test]
fn server_converts_to_endpoint_with_env_credential() {
    let server = McpServerConfig {
        id: "amap".to_string(),
        base_url: Some("https://mcp.amap.com/sse".to_string()),
        auth: Some(AuthKind::ApiKey),
        auth_token_env: Some("AMAP_API_KEY".to_string()),
        timeout_secs: Some(5),
        max_retries: Some(2),
        retry_delay_ms: Some(100),
        ..Default::default()
    };

    let endpoint = server
        .to_endpoint(env_of(&[("AMAP_API_KEY", "amap-secret-123")]))
        .expect("endpoint");
    assert_eq!(endpoint.name, "amap");
    assert_eq!(endpoint.kind, TransportKind::Http);
    assert_eq!(endpoint.address.as_deref(), Some("https://mcp.amap.com/sse"));
    assert_eq!(endpoint.credentials.kind, AuthKind::ApiKey);
    assert_eq!(endpoint.credentials.token.as_deref(), Some("amap-secret-123"));
    assert_eq!(endpoint.timeout, Duration::from_secs(5));
    assert_eq!(endpoint.max_retries, 2);
    assert_eq!(endpoint.retry_delay, Duration::from_millis(100));
}

#[test]
fn endpoint_defaults_apply() {
    let server = McpServerConfig {
        id: "files".to_string(),
        command: Some("mcp-file-server".to_string()),
        args: Some(vec!["--root".to_string(), "/tmp".to_string()]),
        ..Default::default()
    };
    let endpoint = server.to_endpoint(env_of(&[])).expect("endpoint");
    assert_eq!(endpoint.kind, TransportKind::Pipe);
    assert_eq!(endpoint.args, vec!["--root", "/tmp"]);
    assert_eq!(endpoint.timeout, Duration::from_secs(30));
    assert_eq!(endpoint.max_retries, 3);
    assert_eq!(endpoint.retry_delay, Duration::from_secs(1));
    assert_eq!(endpoint.credentials.kind, AuthKind::None);
}

#[test]
fn invalid_server_entries_are_rejected() {
    let no_target = McpServerConfig {
        id: "empty".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        no_target.to_endpoint(env_of(&[])),
        Err(ConfigError::Invalid { .. })
    ));

    let stdio_without_command = McpServerConfig {
        id: "x".to_string(),
        transport: Some("stdio".to_string()),
        base_url: Some("http://localhost".to_string()),
        ..Default::default()
    };
    let err = stdio_without_command.to_endpoint(env_of(&[])).unwrap_err();
    assert!(err.to_string().contains("no command"), "{err}");

    let bad_transport = McpServerConfig {
        id: "x".to_string(),
        transport: Some("carrier-pigeon".to_string()),
        base_url: Some("http://localhost".to_string()),
        ..Default::default()
    };
    assert!(bad_transport.to_endpoint(env_of(&[])).is_err());

    let missing_secret = McpServerConfig {
        id: "x".to_string(),
        base_url: Some("http://localhost".to_string()),
        auth: Some(AuthKind::Bearer),
        auth_token_env: Some("MISSING_TOKEN".to_string()),
        ..Default::default()
    };
    let err = missing_secret.to_endpoint(env_of(&[])).unwrap_err();
    assert!(err.to_string().contains("$MISSING_TOKEN"), "{err}");
}

#[test]
fn infers_http_flavour_from_url() {
    assert_eq!(
        infer_http_transport("https://mcp.amap.com/sse?key=x"),
        TransportKind::Http
    );
    assert_eq!(
        infer_http_transport("https://mcp.amap.com/stream"),
        TransportKind::HttpStream
    );
    assert_eq!(
        infer_http_transport("http://localhost:3000"),
        TransportKind::Http
    );
}

#[test]
fn env_fallback_synthesizes_amap_server_from_url() {
    let mut config = Config::default();
    config.apply_env_fallbacks(env_of(&[
        ("AMAP_MCP_SERVER_URL", "https://mcp.amap.com/stream"),
        ("AMAP_API_KEY", "amap-secret-123"),
    ]));

    assert_eq!(config.mcp_servers.len(), 1);
    let server = &config.mcp_servers[0];
    assert_eq!(server.id, "amap");
    assert_eq!(server.transport.as_deref(), Some("streamable_http"));
    assert_eq!(server.auth, Some(AuthKind::ApiKey));
    assert_eq!(server.auth_token_env.as_deref(), Some("AMAP_API_KEY"));
}

#[test]
fn env_fallback_uses_command_path_and_passes_key_to_child() {
    let mut config = Config::default();
    config.apply_env_fallbacks(env_of(&[
        ("AMAP_MCP_SERVER_PATH", "/usr/local/bin/amap-mcp-server"),
        ("AMAP_API_KEY", "amap-secret-123"),
    ]));

    let endpoint = config.mcp_servers[0]
        .to_endpoint(env_of(&[]))
        .expect("endpoint");
    assert_eq!(endpoint.kind, TransportKind::Pipe);
    assert_eq!(
        endpoint.env.get("AMAP_API_KEY").map(String::as_str),
        Some("amap-secret-123")
    );
    assert_eq!(endpoint.credentials.kind, AuthKind::None);
}

#[test]
fn env_fallback_does_not_override_configured_servers() {
    let mut config = Config {
        mcp_servers: vec![McpServerConfig {
            id: "mine".to_string(),
            base_url: Some("http://localhost:3000".to_string()),
            ..Default::default()
        }],
        ..Default::default()
    };
    config.apply_env_fallbacks(env_of(&[("AMAP_MCP_SERVER_URL", "https://mcp.amap.com/sse")]));
    assert_eq!(config.mcp_servers.len(), 1);
    assert_eq!(config.mcp_servers[0].id, "mine");
}

#[test]
fn ai_settings_need_a_key() {
    let config = Config::default();
    assert!(config.ai_settings(env_of(&[])).is_none());

    let settings = config
        .ai_settings(env_of(&[
            ("OPENAI_API_KEY", "sk-abcdefghijkl"),
            ("OPENAI_MODEL", "deepseek-chat"),
        ]))
        .expect("settings");
    assert_eq!(settings.provider, AiProvider::OpenAi);
    assert_eq!(settings.base_url, "https://api.openai.com/v1");
    assert_eq!(settings.model, "deepseek-chat");
    assert!(!format!("{settings:?}").contains("sk-abcdefghijkl"));
}

#[test]
fn anthropic_is_chosen_by_env_or_by_its_key() {
    let config = Config::default();

    let settings = config
        .ai_settings(env_of(&[("ANTHROPIC_API_KEY", "sk-ant-abcdefgh")]))
        .expect("settings");
    assert_eq!(settings.provider, AiProvider::Anthropic);
    assert_eq!(settings.base_url, "https://api.anthropic.com/v1");
    assert_eq!(settings.model, "claude-3-5-sonnet-20241022");
    assert_eq!(settings.api_key, "sk-ant-abcdefgh");

    let both = env_of(&[
        ("OPENAI_API_KEY", "sk-openai"),
        ("ANTHROPIC_API_KEY", "sk-ant"),
    ]);
    assert_eq!(config.ai_provider(&both), AiProvider::OpenAi);

    let forced = env_of(&[
        ("AI_PROVIDER", "Claude"),
        ("OPENAI_API_KEY", "sk-openai"),
        ("ANTHROPIC_MODEL", "claude-3-haiku-20240307"),
    ]);
    assert_eq!(config.ai_provider(&forced), AiProvider::Anthropic);
    assert!(config.ai_settings(&forced).is_none());

    let unknown = env_of(&[("AI_PROVIDER", "gemini"), ("OPENAI_API_KEY", "sk-openai")]);
    assert_eq!(config.ai_provider(&unknown), AiProvider::OpenAi);
}

#[test]
fn configured_provider_wins_over_env() {
    let config: Config = toml::from_str(
        r#"
[ai]
provider = "anthropic"
api_key_env = "MY_CLAUDE_KEY"
"#,
    )
    .expect("parse");
    let lookup = env_of(&[("AI_PROVIDER", "openai"), ("MY_CLAUDE_KEY", "sk-ant-xyz")]);
    let settings = config.ai_settings(&lookup).expect("settings");
    assert_eq!(settings.provider, AiProvider::Anthropic);
    assert_eq!(settings.api_key, "sk-ant-xyz");
    assert!("OpenAI".parse::<AiProvider>().is_ok());
    assert!("bard".parse::<AiProvider>().is_err());
}

#[test]
fn summary_masks_every_secret() {
    let mut config = Config::default();
    config.apply_env_fallbacks(env_of(&[(
        "AMAP_MCP_SERVER_URL",
        "https://mcp.amap.com/sse?key=embedded-secret",
    )]));
    config.mcp_servers[0].auth_token_env = Some("AMAP_API_KEY".to_string());

    let summary = config.summary(env_of(&[
        ("OPENAI_API_KEY", "sk-abcdefghijkl"),
        ("AMAP_API_KEY", "short"),
    ]));
    let rendered: String = summary
        .iter()
        .map(|(label, value)| format!("{label}: {value}\n"))
        .collect();

    assert!(rendered.contains("OPENAI_API_KEY: sk-a...ijkl"), "{rendered}");
    assert!(rendered.contains("AMAP_API_KEY: ***"), "{rendered}");
    assert!(rendered.contains("key=***"), "{rendered}");
    assert!(!rendered.contains("embedded-secret"));
    assert!(!rendered.contains("sk-abcdefghijkl"));
}

#[test]
fn summary_reports_unset_values() {
    let summary = Config::default().summary(env_of(&[]));
    let lookup = |label: &str| {
        summary
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.clone())
    };
    assert_eq!(lookup("OPENAI_API_KEY").as_deref(), Some("Not set"));
    assert_eq!(lookup("mcp_servers").as_deref(), Some("(none configured)"));
    assert_eq!(
        lookup("security.enable_confirmation").as_deref(),
        Some("on")
    );
}

#[test]
#[cfg(unix)]
fn path_display_shortens_home() {
    if let Some(home) = std::env::var_os("HOME") {
        let path = PathBuf::from(home).join(".config").join("ai-navigator");
        assert_eq!(path_display(&path), "~/.config/ai-navigator");
    }
}
