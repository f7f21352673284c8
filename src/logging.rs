//! Logging setup for the tether binary.
//!
//! `RUST_LOG` wins when set; otherwise `tether={level}` is used.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, TetherError};

/// Default filter directive for a log level.
pub fn default_directive(level: &str) -> String {
    format!("tether={},warn", level)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(level)))
        .map_err(|e| TetherError::Config(format!("Invalid log level {}: {}", level, e)))?;

    let (plain, structured) = if json {
        (None, Some(fmt::layer().json()))
    } else {
        (Some(fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .try_init()
        .map_err(|e| TetherError::Config(format!("Logging already initialized: {}", e)))
}
