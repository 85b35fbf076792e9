pub mod data;
pub mod env;
pub mod io;
pub mod printing;

#[cfg(test)]
pub mod tests;

pub use data::{
    path_display, AiConfig, AiProvider, AiSettings, Config, McpServerConfig, SecurityConfig,
};
pub use env::process_env;
pub use io::{load_env_file, ConfigError};
