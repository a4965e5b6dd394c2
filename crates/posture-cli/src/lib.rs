//! # posture-cli
//!
//! Command-line interface for the posture auditing engine.
//!
//! ## Features
//!
//! - **Audits**: run every registered check across accounts and regions of an
//!   inventory snapshot, with concurrency limits, timeouts and a run deadline
//! - **Check listing**: show what the check library contains
//! - **Multiple output formats**: pretty tables, JSON, JSON lines, CSV, YAML
//! - **Structured logging**: `-v`/`-q`, `RUST_LOG` and `--log-json`

pub mod cli;
pub mod config;
pub mod logging;
pub mod output;

pub use cli::run;
