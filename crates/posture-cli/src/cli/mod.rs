//! CLI argument parsing and command dispatch.

pub mod args;
pub mod commands;

use anyhow::Result;
use args::{Cli, Commands};
use clap::Parser;
use std::process::ExitCode;

use crate::config::Config;
use crate::logging;

/// Run the CLI application.
pub async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    logging::init(cli.verbose, cli.quiet, cli.log_json)?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Load configuration
    let config = Config::load()?;

    // Flag, then config file, then pretty
    let output_format = cli
        .output
        .or(config.output_format)
        .unwrap_or_default();

    let ctx = commands::Context {
        output_format,
        config,
        verbose: cli.verbose,
        no_color: cli.no_color,
    };

    // Dispatch to appropriate command
    match cli.command {
        Commands::Run(args) => commands::run::execute(ctx, args).await,
        Commands::Checks(args) => commands::checks::execute(ctx, args).map(|()| ExitCode::SUCCESS),
        Commands::Config(args) => commands::config::execute(ctx, args).map(|()| ExitCode::SUCCESS),
    }
}
