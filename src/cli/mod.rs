//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

use std::error::Error;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::config::data::{DEFAULT_AI_BASE_URL, DEFAULT_AI_KEY_ENV, DEFAULT_AI_MODEL};
use crate::core::config::env::{AMAP_API_KEY_ENV, AMAP_SERVER_ID, AMAP_SERVER_URL_ENV};
use crate::core::config::{
    load_env_file, path_display, process_env, AiConfig, AiProvider, Config, McpServerConfig,
    SecurityConfig,
};
use crate::core::geocoding::McpLocationResolver;
use crate::core::navigation::{
    navigate, NavigationError, NavigationStep, RouteParser, StepReporter, SystemBrowserOpener,
};
use crate::core::ip_location::IpLocator;
use crate::core::route_parser::{ai_route_parser, PatternRouteParser};
use crate::mcp::audit::AuditLogger;
use crate::mcp::endpoint::AuthKind;
use crate::mcp::gateway::ToolGateway;
use crate::mcp::security::SecurityValidator;
use crate::utils::logging;

#[derive(Parser)]
#[command(name = "ai-navigator", version)]
#[command(about = "Natural-language navigation through a permissioned MCP tool gateway")]
#[command(
    long_about = "ai-navigator turns a request such as \"从北京到上海\" or \"from the airport to \
the station\" into a route, resolves both ends through geocoding tools on an MCP server, \
and opens the route in the browser.\n\n\
Environment Variables:\n\
  AMAP_MCP_SERVER_URL   MCP server URL, used when the config declares no servers\n\
  AMAP_MCP_SERVER_PATH  MCP server command (stdio), used when no URL is set\n\
  AMAP_API_KEY          Credential for the AMAP server\n\
  AI_PROVIDER           openai or anthropic (default: whichever key is set)\n\
  OPENAI_API_KEY        Enables AI route parsing (pattern parsing otherwise)\n\
  OPENAI_BASE_URL       Chat-completion base URL (default https://api.openai.com/v1)\n\
  OPENAI_MODEL          Chat-completion model (default gpt-3.5-turbo)\n\
  ANTHROPIC_API_KEY     Enables AI route parsing through Anthropic\n\
  ANTHROPIC_MODEL       Anthropic model (default claude-3-5-sonnet-20241022)\n\
  RUST_LOG              Log filter; overrides -v\n\n\
A .env file in the working directory is read first and never overrides\n\
variables that are already set."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to the config file (defaults to the platform config directory)
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Run dangerous tools without asking (critical tools stay blocked)
    #[arg(long, global = true)]
    pub no_confirm: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Plan a route and open it in the browser (default)
    Navigate {
        /// The request, e.g. "从天安门到首都机场"; read from stdin when omitted
        #[arg(trailing_var_arg = true)]
        request: Vec<String>,
    },
    /// List the tools every configured server offers, with their risk tier
    Tools,
    /// Call one tool through the gateway
    Call {
        server: String,
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, value_name = "JSON", default_value = "{}")]
        args: String,
        /// Never prompt; tools that need confirmation are refused
        #[arg(long)]
        batch: bool,
    },
    /// Show the most recent audit log entries, newest first
    Audit {
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
    /// Show the effective configuration with secrets masked
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a starter config file
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    logging::init(args.verbose);
    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    load_env_file();
    let config_path = args.config.unwrap_or_else(Config::get_config_path);
    let command = args.command.unwrap_or(Commands::Navigate {
        request: Vec::new(),
    });

    if let Commands::Config {
        action: Some(ConfigCommands::Init { force }),
    } = command
    {
        return init_config(&config_path, force);
    }

    let mut config = Config::load_from_path(&config_path)?;
    config.apply_env_fallbacks(process_env);
    debug!(
        path = %path_display(&config_path),
        servers = config.mcp_servers.len(),
        "Loaded configuration"
    );

    match command {
        Commands::Navigate { request } => run_navigation(&config, request, args.no_confirm).await,
        Commands::Tools => list_tools(&config, args.no_confirm).await,
        Commands::Call {
            server,
            tool,
            args: raw_arguments,
            batch,
        } => call_tool(&config, &server, &tool, &raw_arguments, batch, args.no_confirm).await,
        Commands::Audit { count } => show_audit(&config, count),
        Commands::Config { .. } => {
            println!("Config file: {}", path_display(&config_path));
            config.print_summary(process_env);
            Ok(())
        }
    }
}

fn build_gateway(config: &Config, no_confirm: bool) -> ToolGateway {
    let confirm = config.security.confirmation_enabled() && !no_confirm;
    ToolGateway::new(
        SecurityValidator::interactive(confirm),
        AuditLogger::new(config.audit_log_path()),
    )
}

/// Connects every enabled server, reporting each outcome. Servers that fail
/// to connect are skipped.
async fn connect_all(gateway: &mut ToolGateway, config: &Config) -> Result<(), Box<dyn Error>> {
    let mut servers = config.enabled_servers().peekable();
    if servers.peek().is_none() {
        return Err(no_servers_message().into());
    }
    for server in servers {
        let endpoint = server.to_endpoint(process_env)?;
        match gateway.register_server(endpoint).await {
            Ok(()) => println!("✓ Connected to '{}'", server.id),
            Err(err) => eprintln!("✗ {err}"),
        }
    }
    Ok(())
}

fn no_servers_message() -> String {
    format!(
        "No MCP server configured. Add [[mcp_servers]] to the config file or set {}.",
        AMAP_SERVER_URL_ENV
    )
}

struct ConsoleReporter;

impl StepReporter for ConsoleReporter {
    fn started(&mut self, step: NavigationStep) {
        println!(
            "[{}/{}] {}...",
            step.number(),
            NavigationStep::TOTAL,
            step.label()
        );
    }

    fn succeeded(&mut self, _step: NavigationStep, detail: &str) {
        println!("  ✓ {detail}");
    }

    fn failed(&mut self, _step: NavigationStep, error: &NavigationError) {
        eprintln!("  ✗ {error}");
    }
}

fn read_request(input: &mut impl BufRead) -> io::Result<String> {
    print!("Where do you want to go? ");
    io::stdout().flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn route_parser(config: &Config) -> Result<Box<dyn RouteParser>, NavigationError> {
    match config.ai_settings(process_env) {
        Some(settings) => {
            info!(
                provider = %settings.provider,
                model = %settings.model,
                "Using AI route parser"
            );
            ai_route_parser(settings)
        }
        None => {
            info!(
                provider = %config.ai_provider(process_env),
                "No AI key configured; using pattern route parser"
            );
            Ok(Box::new(PatternRouteParser))
        }
    }
}

async fn run_navigation(
    config: &Config,
    words: Vec<String>,
    no_confirm: bool,
) -> Result<(), Box<dyn Error>> {
    let request = if words.is_empty() {
        read_request(&mut io::stdin().lock())?
    } else {
        words.join(" ")
    };
    if request.is_empty() {
        return Err("No navigation request given".into());
    }

    let server = config
        .enabled_servers()
        .next()
        .ok_or_else(no_servers_message)?;
    let endpoint = server.to_endpoint(process_env)?;
    let parser = route_parser(config)?;

    let mut gateway = build_gateway(config, no_confirm);
    let result = {
        let mut resolver = McpLocationResolver::new(&mut gateway, endpoint);
        match IpLocator::new() {
            Ok(locator) => resolver = resolver.with_ip_locator(locator),
            Err(err) => warn!(error = %err, "IP location lookup unavailable"),
        }
        navigate(
            &request,
            parser.as_ref(),
            &mut resolver,
            &SystemBrowserOpener,
            &mut ConsoleReporter,
        )
        .await
    };
    gateway.disconnect_all().await;

    match result {
        Ok(outcome) => {
            println!("\n🗺️  {}", outcome.url);
            Ok(())
        }
        Err(err) => {
            debug!(error = %err, "Navigation aborted");
            Err(NavigationAborted.into())
        }
    }
}

/// Navigation stopped at a step the reporter has already printed; only the
/// exit status is left to set.
#[derive(Debug)]
pub struct NavigationAborted;

impl fmt::Display for NavigationAborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("navigation failed")
    }
}

impl Error for NavigationAborted {}

async fn list_tools(config: &Config, no_confirm: bool) -> Result<(), Box<dyn Error>> {
    let mut gateway = build_gateway(config, no_confirm);
    connect_all(&mut gateway, config).await?;

    for (server, records) in gateway.list_all_tools() {
        println!("\n{server} ({} tools)", records.len());
        for record in records {
            let marker = if record.requires_confirmation {
                " *"
            } else {
                ""
            };
            println!(
                "  [{:<9}] {}{marker}",
                record.tier.as_str(),
                record.tool_name
            );
            if !record.description.is_empty() {
                println!("              {}", record.description);
            }
        }
    }
    println!("\n* asks for confirmation before running");

    gateway.disconnect_all().await;
    Ok(())
}

fn parse_arguments(raw: &str) -> Result<Value, Box<dyn Error>> {
    let value: Value =
        serde_json::from_str(raw).map_err(|err| format!("--args is not valid JSON: {err}"))?;
    if !value.is_object() {
        return Err("--args must be a JSON object".into());
    }
    Ok(value)
}

async fn call_tool(
    config: &Config,
    server: &str,
    tool: &str,
    raw_arguments: &str,
    batch: bool,
    no_confirm: bool,
) -> Result<(), Box<dyn Error>> {
    let arguments = parse_arguments(raw_arguments)?;
    let server_config = config
        .get_server(server)
        .ok_or_else(|| format!("Server '{server}' is not configured"))?;

    let mut gateway = build_gateway(config, no_confirm);
    gateway
        .register_server(server_config.to_endpoint(process_env)?)
        .await?;
    let result = gateway
        .call_tool(&server_config.id, tool, arguments, batch)
        .await;
    gateway.disconnect_all().await;

    let result = result?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn show_audit(config: &Config, count: usize) -> Result<(), Box<dyn Error>> {
    let logger = AuditLogger::new(config.audit_log_path());
    let entries = logger.recent(count)?;
    if entries.is_empty() {
        println!("No audit entries in {}", path_display(logger.path()));
        return Ok(());
    }
    for entry in entries {
        let confirmed = if entry.user_confirmed {
            " (confirmed)"
        } else {
            ""
        };
        println!(
            "{} {:<7} {}.{} [{}] {}{confirmed}",
            entry.timestamp,
            entry.result_status.to_string(),
            entry.server_name,
            entry.tool_name,
            entry.permission_level.as_str(),
            entry.result_message
        );
    }
    Ok(())
}

/// Configuration written by `config init`: the AMAP server over HTTP with
/// its key taken from the environment.
fn starter_config() -> Config {
    Config {
        mcp_servers: vec![McpServerConfig {
            id: AMAP_SERVER_ID.to_string(),
            transport: Some("http".to_string()),
            base_url: Some("https://mcp.amap.com/sse".to_string()),
            auth: Some(AuthKind::ApiKey),
            auth_token_env: Some(AMAP_API_KEY_ENV.to_string()),
            ..Default::default()
        }],
        security: SecurityConfig {
            enable_confirmation: Some(true),
            audit_log: None,
        },
        ai: AiConfig {
            provider: Some(AiProvider::OpenAi),
            base_url: Some(DEFAULT_AI_BASE_URL.to_string()),
            model: Some(DEFAULT_AI_MODEL.to_string()),
            api_key_env: Some(DEFAULT_AI_KEY_ENV.to_string()),
        },
    }
}

fn init_config(path: &Path, force: bool) -> Result<(), Box<dyn Error>> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists; pass --force to replace it",
            path_display(path)
        )
        .into());
    }
    starter_config().save_to_path(path)?;
    println!("✓ Wrote {}", path_display(path));
    Ok(())
}
