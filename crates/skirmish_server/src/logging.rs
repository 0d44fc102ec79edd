//! Logging system setup and configuration
//!
//! Every shard runs on a named thread (`event-loop-<n>`), so thread names and ids are
//! always part of the output.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// # Arguments
/// * `level` - Default filter when `RUST_LOG` is not set (e.g. "info", "skirmish_runtime=debug")
/// * `json_format` - Emit one JSON object per event instead of human-readable lines
///
/// # Returns
/// * `Result<()>` - Fails if the filter is invalid or a subscriber is already installed
pub fn setup_logging(level: &str, json_format: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()
    };

    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
