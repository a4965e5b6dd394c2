//! Tracing subscriber setup.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter for a verbosity level
///
/// `quiet` wins over `verbose`. Without flags only warnings are shown so
/// that skipped scopes and failed checks stay visible.
#[must_use]
pub const fn default_level(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber, writing to stderr
///
/// `RUST_LOG` overrides the level derived from the flags.
pub fn init(verbose: u8, quiet: bool, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose, quiet)));

    let result = if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
    } else {
        fmt()
            .compact()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init()
    };

    result.map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}
