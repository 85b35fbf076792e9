//! ai-navigator turns a natural-language route request into a map
//! navigation link, resolving locations through tools on MCP servers.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`mcp`] is a generic Model Context Protocol client (transports,
//!   handshake, discovery, retries, auth) plus the permissioned
//!   [`mcp::gateway::ToolGateway`] that gates every tool call by risk tier,
//!   asks for confirmation and writes a JSONL audit trail.
//! - [`core`] owns configuration and the navigation pipeline: route parsing,
//!   geocoding through the gateway, and building the navigation URL.
//! - [`api`] defines the chat-completion payloads used by the AI route parser.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod mcp;
pub mod utils;
