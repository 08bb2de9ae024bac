//! Tracing subscriber setup for the binary.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Install a global fmt subscriber. `RUST_LOG` takes precedence over
/// `default_level`.
pub fn init_logging(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("Invalid log level '{}': {}", default_level, e))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(())
}
