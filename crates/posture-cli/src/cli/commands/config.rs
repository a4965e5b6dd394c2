//! `posture config` - CLI configuration management.

use anyhow::Result;
use colored::Colorize;

use super::Context;
use crate::cli::args::{ConfigArgs, ConfigCommands};
use crate::config::Config;
use crate::output::OutputFormat;

pub fn execute(ctx: Context, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Show => show_config(&ctx),
        ConfigCommands::Set { key, value } => set_config(&key, &value),
        ConfigCommands::Path => show_path(),
    }
}

fn show_config(ctx: &Context) -> Result<()> {
    let config = &ctx.config;

    match ctx.output_format {
        OutputFormat::Json | OutputFormat::Jsonl => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(config)?);
        }
        OutputFormat::Pretty | OutputFormat::Csv => {
            let unset = || "(not set)".dimmed().to_string();

            println!("{}", "Current Configuration:".bold());
            println!();
            println!(
                "  {} {}",
                "output_format:".bold(),
                config.output_format.unwrap_or_default()
            );
            println!(
                "  {} {}",
                "inventory:".bold(),
                config
                    .inventory
                    .as_ref()
                    .map_or_else(unset, |p| p.display().to_string())
            );
            println!(
                "  {} {}",
                "max_concurrent_scopes:".bold(),
                config.max_concurrent_scopes.map_or_else(unset, |v| v.to_string())
            );
            println!(
                "  {} {}",
                "max_concurrent_checks:".bold(),
                config.max_concurrent_checks.map_or_else(unset, |v| v.to_string())
            );
            println!(
                "  {} {}",
                "check_timeout_secs:".bold(),
                config.check_timeout_secs.map_or_else(unset, |v| v.to_string())
            );
            println!(
                "  {} {}",
                "checks_per_second:".bold(),
                config.checks_per_second.map_or_else(unset, |v| v.to_string())
            );
        }
    }

    Ok(())
}

fn set_config(key: &str, value: &str) -> Result<()> {
    let mut config = Config::load()?;
    config.set(key, value)?;
    config.save()?;

    println!("{} {} set to {}.", "Success:".green().bold(), key, value.cyan());
    Ok(())
}

fn show_path() -> Result<()> {
    let path = Config::path()?;
    println!("{}", path.display());
    Ok(())
}
