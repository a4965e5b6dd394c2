//! Output formatting for different formats.

use anyhow::Result;
use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use posture::{ComplianceStatus, NormalizedFinding, OutcomeStatus, RunResult, Severity};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::str::FromStr;
use tabled::{settings::Style, Table, Tabled};

/// Available output formats.
#[derive(Debug, Clone, Copy, Default, ValueEnum, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Pretty-printed tables with colors
    #[default]
    Pretty,
    /// One JSON document with the run summary and findings
    Json,
    /// Findings streamed as JSON lines while the run progresses
    Jsonl,
    /// CSV output, one row per finding
    Csv,
    /// YAML output
    Yaml,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "table" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            "csv" => Ok(Self::Csv),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => anyhow::bail!(
                "Unknown output format: {}\n\
                 Valid formats: pretty, json, jsonl, csv, yaml",
                s
            ),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
            Self::Jsonl => write!(f, "jsonl"),
            Self::Csv => write!(f, "csv"),
            Self::Yaml => write!(f, "yaml"),
        }
    }
}

/// Run summary plus the findings it produced
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub run: &'a RunResult,
    pub findings: &'a [NormalizedFinding],
}

/// Write a finished run in the given format
///
/// `Jsonl` only writes the summary, since its findings were streamed.
pub fn write_report<W: Write>(
    out: &mut W,
    format: OutputFormat,
    run: &RunResult,
    findings: &[NormalizedFinding],
) -> Result<()> {
    let report = Report { run, findings };
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
        OutputFormat::Yaml => serde_yaml::to_writer(&mut *out, &report)?,
        OutputFormat::Csv => write_csv(out, findings)?,
        OutputFormat::Jsonl => write_summary(out, run)?,
        OutputFormat::Pretty => write_pretty(out, run, findings)?,
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    account_id: &'a str,
    region: &'a str,
    service: &'a str,
    check: &'a str,
    status: ComplianceStatus,
    severity: Severity,
    resource_type: &'a str,
    resource_id: &'a str,
    title: &'a str,
    finding_id: &'a str,
}

fn write_csv<W: Write>(out: &mut W, findings: &[NormalizedFinding]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for finding in findings {
        let resource = finding.resources.first();
        writer.serialize(CsvRow {
            account_id: &finding.account_id,
            region: &finding.product_fields.asset_region,
            service: &finding.product_fields.service,
            check: finding.check(),
            status: finding.status(),
            severity: finding.severity(),
            resource_type: resource.map_or("", |r| r.resource_type.as_str()),
            resource_id: finding.resource_id(),
            title: &finding.title,
            finding_id: &finding.id,
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Tabled)]
struct FindingRow {
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Check")]
    check: String,
    #[tabled(rename = "Resource")]
    resource: String,
}

#[derive(Tabled)]
struct ErrorRow {
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Check")]
    check: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Error")]
    error: String,
}

fn status_label(status: ComplianceStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        ComplianceStatus::Passed => label.green(),
        ComplianceStatus::Failed => label.red().bold(),
        ComplianceStatus::Warning => label.yellow(),
        ComplianceStatus::NotAvailable => label.dimmed(),
    }
}

fn severity_label(severity: Severity) -> ColoredString {
    let label = severity.to_string();
    match severity {
        Severity::Critical => label.red().bold(),
        Severity::High => label.red(),
        Severity::Medium => label.yellow(),
        Severity::Low => label.cyan(),
        Severity::Informational => label.dimmed(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut short: String = text.chars().take(max.saturating_sub(3)).collect();
    short.push_str("...");
    short
}

fn write_pretty<W: Write>(out: &mut W, run: &RunResult, findings: &[NormalizedFinding]) -> Result<()> {
    // Failures first, then by severity
    let mut sorted: Vec<&NormalizedFinding> = findings.iter().collect();
    sorted.sort_by(|a, b| {
        b.is_failed()
            .cmp(&a.is_failed())
            .then_with(|| b.severity().cmp(&a.severity()))
    });

    if !sorted.is_empty() {
        writeln!(out, "{}", "Findings:".bold().underline())?;
        let rows: Vec<FindingRow> = sorted
            .iter()
            .map(|f| FindingRow {
                status: status_label(f.status()).to_string(),
                severity: severity_label(f.severity()).to_string(),
                region: f.product_fields.asset_region.clone(),
                check: f.check().to_string(),
                resource: truncate(f.resource_id(), 60),
            })
            .collect();
        writeln!(out, "{}", Table::new(&rows).with(Style::rounded()))?;
        writeln!(out)?;
    }

    let errors: Vec<ErrorRow> = run
        .check_errors()
        .map(|o| ErrorRow {
            scope: o.scope.to_string(),
            check: o.check.clone(),
            outcome: o.status.to_string(),
            error: truncate(o.error.as_deref().unwrap_or_default(), 60),
        })
        .collect();
    if !errors.is_empty() {
        writeln!(out, "{}", "Check errors:".bold().underline())?;
        writeln!(out, "{}", Table::new(&errors).with(Style::rounded()))?;
        writeln!(out)?;
    }

    if !run.skipped_scopes.is_empty() {
        writeln!(out, "{}", "Skipped scopes:".bold().underline())?;
        for skipped in &run.skipped_scopes {
            writeln!(
                out,
                "  {}/{}/{}  {}",
                skipped.provider,
                skipped.account_id,
                skipped.region.as_deref().unwrap_or("*"),
                skipped.reason.dimmed()
            )?;
        }
        writeln!(out)?;
    }

    write_summary(out, run)
}

fn write_summary<W: Write>(out: &mut W, run: &RunResult) -> Result<()> {
    let counts = &run.status_counts;
    writeln!(out, "{} {}", "Run:".bold(), run.run_id.dimmed())?;
    writeln!(
        out,
        "{} {} planned, {} completed, {} skipped",
        "Scopes:".bold(),
        run.scopes_planned,
        run.scopes_completed,
        run.skipped_scopes.len()
    )?;
    writeln!(
        out,
        "{} {} emitted ({} passed, {} failed), {} duplicates discarded",
        "Findings:".bold(),
        run.findings_emitted.to_string().cyan(),
        counts.passed.to_string().green(),
        counts.failed.to_string().red(),
        run.duplicates_discarded
    )?;

    let errors = run.outcomes_with(OutcomeStatus::Failed).count();
    let timeouts = run.outcomes_with(OutcomeStatus::TimedOut).count();
    if errors + timeouts > 0 {
        writeln!(
            out,
            "{} {} failed, {} timed out",
            "Check errors:".bold(),
            errors.to_string().red(),
            timeouts.to_string().yellow()
        )?;
    }
    if !run.normalization_errors.is_empty() {
        writeln!(
            out,
            "{} {} findings rejected",
            "Normalization:".bold(),
            run.normalization_errors.len().to_string().red()
        )?;
    }
    if run.cancelled {
        writeln!(out, "{}", "Run was cancelled before finishing.".yellow())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!("table".parse::<OutputFormat>().unwrap(), OutputFormat::Pretty);
        assert_eq!("NDJSON".parse::<OutputFormat>().unwrap(), OutputFormat::Jsonl);
        assert_eq!("yml".parse::<OutputFormat>().unwrap(), OutputFormat::Yaml);
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Jsonl.to_string(), "jsonl");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
