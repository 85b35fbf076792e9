//! Model Context Protocol client stack and the permissioned tool gateway.

pub mod audit;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod gateway;
pub mod permissions;
pub mod protocol;
pub mod redact;
pub mod registry;
pub mod security;
pub mod transport;

pub use client::{ConnectionState, McpClient};
pub use endpoint::{AuthKind, EndpointConfig, TransportKind};
pub use error::McpError;
pub use gateway::{GatewayError, ToolGateway};
pub use permissions::{PermissionRecord, PermissionTier};
