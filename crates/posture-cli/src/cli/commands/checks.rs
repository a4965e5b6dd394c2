//! `posture checks` - list the check library.

use anyhow::Result;
use colored::Colorize;
use posture::{checks, CheckDescriptor, Provider};
use serde::Serialize;
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

use super::Context;
use crate::cli::args::ChecksArgs;
use crate::output::OutputFormat;

#[derive(Debug, Serialize, Tabled)]
struct CheckRow {
    #[tabled(rename = "Provider")]
    provider: Provider,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Check")]
    name: &'static str,
    #[tabled(rename = "Title")]
    title: &'static str,
}

impl From<&Arc<CheckDescriptor>> for CheckRow {
    fn from(check: &Arc<CheckDescriptor>) -> Self {
        Self {
            provider: check.provider(),
            service: check.service().to_string(),
            name: check.name(),
            title: check.title(),
        }
    }
}

pub fn execute(ctx: Context, args: ChecksArgs) -> Result<()> {
    let registry = checks::registry()?;
    let provider = args
        .provider
        .as_deref()
        .map(str::parse::<Provider>)
        .transpose()?;

    let rows: Vec<CheckRow> = registry
        .iter()
        .filter(|c| provider.map_or(true, |p| c.provider() == p))
        .filter(|c| args.services.is_empty() || args.services.iter().any(|s| s == c.service()))
        .map(CheckRow::from)
        .collect();

    match ctx.output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Jsonl => {
            for row in &rows {
                println!("{}", serde_json::to_string(row)?);
            }
        }
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&rows)?),
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            for row in &rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        OutputFormat::Pretty => {
            if rows.is_empty() {
                println!("{}", "No checks match.".yellow());
                return Ok(());
            }
            println!("{}", Table::new(&rows).with(Style::rounded()));
            println!();
            println!(
                "{}",
                format!("{} checks in {} services", rows.len(), registry.services().len()).dimmed()
            );
        }
    }

    Ok(())
}
