//! Diagnostic logging setup.
//!
//! Logs go to stderr so they never interleave with prompts and results on
//! stdout. `RUST_LOG` wins when set; otherwise `-v` flags pick the level.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Default filter directive for a given number of `-v` flags.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "ai_navigator=info,warn",
        _ => "ai_navigator=debug,info",
    }
}

fn build_filter(verbosity: u8, env_override: Option<&str>) -> EnvFilter {
    env_override
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive(verbosity)))
}

/// Installs the global subscriber. Later calls are ignored.
pub fn init(verbosity: u8) {
    INIT.call_once(|| {
        let env_override = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        let filter = build_filter(verbosity, env_override.as_deref());
        // Another subscriber may already be installed (tests, embedding).
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
