//! Command implementations.

pub mod checks;
pub mod config;
pub mod run;

use crate::config::Config;
use crate::output::OutputFormat;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output format
    pub output_format: OutputFormat,

    /// Loaded configuration file
    pub config: Config,

    /// Log verbosity
    pub verbose: u8,

    /// Disable colors
    pub no_color: bool,
}
