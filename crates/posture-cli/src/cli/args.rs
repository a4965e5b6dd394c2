//! Command-line argument definitions using clap.

use crate::output::OutputFormat;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Cloud security posture audits
///
/// Runs every registered check against each account and region of an
/// inventory snapshot and reports normalized findings.
#[derive(Parser, Debug)]
#[command(name = "posture")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, value_enum)]
    pub output: Option<OutputFormat>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Audit accounts and regions
    Run(RunArgs),

    /// List registered checks
    Checks(ChecksArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),
}

// ============================================================================
// Run command
// ============================================================================

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Inventory snapshot to audit
    #[arg(short, long, env = "POSTURE_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Run plan (TOML) with targets, filters and limits
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// AWS accounts to audit
    #[arg(long = "aws", value_delimiter = ',', value_name = "ACCOUNT")]
    pub aws_accounts: Vec<String>,

    /// Azure subscriptions to audit
    #[arg(long = "azure", value_delimiter = ',', value_name = "SUBSCRIPTION")]
    pub azure_subscriptions: Vec<String>,

    /// GCP projects to audit
    #[arg(long = "gcp", value_delimiter = ',', value_name = "PROJECT")]
    pub gcp_projects: Vec<String>,

    /// Regions for the accounts given on the command line ("all" for every region)
    #[arg(short, long = "region", value_delimiter = ',')]
    pub regions: Vec<String>,

    /// Partition override for the accounts given on the command line
    #[arg(long)]
    pub partition: Option<String>,

    /// Only run these services
    #[arg(short, long = "service", value_delimiter = ',')]
    pub services: Vec<String>,

    /// Only run these checks
    #[arg(short, long = "check", value_delimiter = ',')]
    pub checks: Vec<String>,

    /// Skip these services
    #[arg(long = "exclude-service", value_delimiter = ',')]
    pub exclude_services: Vec<String>,

    /// Skip these checks
    #[arg(long = "exclude-check", value_delimiter = ',')]
    pub exclude_checks: Vec<String>,

    /// Scopes audited at the same time
    #[arg(long)]
    pub max_scopes: Option<usize>,

    /// Checks running at the same time across all scopes
    #[arg(long)]
    pub max_checks: Option<usize>,

    /// Per-check timeout in seconds, fractions allowed
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    pub timeout: Option<Duration>,

    /// Whole-run deadline in seconds, fractions allowed
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    pub deadline: Option<Duration>,

    /// Maximum check starts per second
    #[arg(long, value_name = "PER_SEC")]
    pub rate: Option<u32>,

    /// Fixed run identifier
    #[arg(long)]
    pub run_id: Option<String>,
}

// ============================================================================
// Checks command
// ============================================================================

#[derive(Args, Debug)]
pub struct ChecksArgs {
    /// Only list checks for this provider
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Only list checks of these services
    #[arg(short, long = "service", value_delimiter = ',')]
    pub services: Vec<String>,
}

// ============================================================================
// Config command
// ============================================================================

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,

        /// Value to set
        value: String,
    },

    /// Show configuration file path
    Path,
}

/// Parse a positive number of seconds such as `30` or `0.25`
fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number of seconds"))?;
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(format!("'{value}' must be a positive number of seconds")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_lists_split_on_commas() {
        let cli = Cli::parse_from([
            "posture", "run", "--aws", "111,222", "-r", "us-east-1", "--region", "eu-west-1",
            "--exclude-check", "ec2_imdsv2_check",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.aws_accounts, ["111", "222"]);
        assert_eq!(args.regions, ["us-east-1", "eu-west-1"]);
        assert_eq!(args.exclude_checks, ["ec2_imdsv2_check"]);
    }

    #[test]
    fn test_timeouts_accept_fractional_seconds() {
        let cli = Cli::parse_from([
            "posture", "run", "--aws", "111", "--timeout", "0.25", "--deadline", "90",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.timeout, Some(Duration::from_millis(250)));
        assert_eq!(args.deadline, Some(Duration::from_secs(90)));

        assert!(Cli::try_parse_from(["posture", "run", "--timeout", "0"]).is_err());
        assert!(Cli::try_parse_from(["posture", "run", "--timeout", "soon"]).is_err());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["posture", "-v", "-q", "checks"]).is_err());
        let cli = Cli::parse_from(["posture", "-vv", "checks"]);
        assert_eq!(cli.verbose, 2);
    }
}

