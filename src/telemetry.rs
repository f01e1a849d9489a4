//! Tracing subscriber setup.
use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter; `RUST_LOG` is the fallback.
pub const LOG_ENV: &str = "CFLOW_LOG";

/// Install the global subscriber, writing compact lines to stderr so stdout
/// stays machine-readable.
pub fn init(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let directive = std::env::var(LOG_ENV)
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .filter(|value| !value.trim().is_empty());
    let env_filter = match directive {
        Some(value) => EnvFilter::try_new(&value)
            .map_err(|err| anyhow!("invalid log filter {value:?}: {err}"))?,
        None => EnvFilter::new(default_level),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_ansi(false)
        .try_init()
        .map_err(|err| anyhow!("telemetry error: {err}"))
}
