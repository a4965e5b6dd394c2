//! `posture run` - audit accounts and regions of an inventory snapshot.

use anyhow::{Context as _, Result};
use colored::Colorize;
use posture::checks::{self, Inventory, InventoryResolver};
use posture::{
    CancelSignal, JsonLinesSink, MemorySink, OutputSink, Provider, ProviderTarget,
    RunConfig, Scheduler,
};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::Context;
use crate::cli::args::RunArgs;
use crate::config::Config;
use crate::output::{self, OutputFormat};

pub async fn execute(ctx: Context, args: RunArgs) -> Result<ExitCode> {
    let plan = args.plan.as_deref().map(load_plan).transpose()?;
    let config = build_run_config(&ctx.config, plan, &args)?;
    config.validate()?;

    let inventory_path = args
        .inventory
        .clone()
        .or_else(|| ctx.config.inventory.clone())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No inventory snapshot.\n\n\
                 Set it with one of:\n  \
                 1. --inventory <FILE>\n  \
                 2. POSTURE_INVENTORY environment variable\n  \
                 3. posture config set inventory <FILE>"
            )
        })?;
    let inventory = Inventory::from_path(&inventory_path)
        .with_context(|| format!("loading inventory {}", inventory_path.display()))?;

    let memory = Arc::new(MemorySink::new());
    let sink: Arc<dyn OutputSink> = if ctx.output_format == OutputFormat::Jsonl {
        Arc::new(JsonLinesSink::new(tokio::io::stdout()))
    } else {
        memory.clone()
    };

    let scheduler = Scheduler::builder(checks::registry()?)
        .resolver(InventoryResolver::new(inventory))
        .sink_arc(sink)
        .build()?;

    let cancel = CancelSignal::new();
    let interrupt = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling run");
            interrupt.cancel();
        }
    });

    info!(targets = config.targets.len(), "starting run");
    let result = scheduler.run_with_cancel(&config, cancel).await;
    ctrl_c.abort();
    let result = result?;

    let findings = memory.take();
    if ctx.output_format == OutputFormat::Jsonl {
        // Findings already went to stdout
        let mut stderr = std::io::stderr().lock();
        output::write_report(&mut stderr, OutputFormat::Jsonl, &result, &findings)?;
    } else {
        let mut stdout = std::io::stdout().lock();
        output::write_report(&mut stdout, ctx.output_format, &result, &findings)?;
    }

    let status = result.exit_status();
    if status.code() != 0 {
        eprintln!(
            "{} run finished with {:?} status",
            "Warning:".yellow().bold(),
            status
        );
    }
    Ok(ExitCode::from(u8::try_from(status.code()).unwrap_or(1)))
}

/// Read a TOML run plan
fn load_plan(path: &Path) -> Result<toml::Table> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading plan {}", path.display()))?;
    content
        .parse::<toml::Table>()
        .with_context(|| format!("parsing plan {}", path.display()))
}

/// Layer the config file, the run plan and command-line flags
///
/// Later layers win. Keys present in the plan replace the config file
/// defaults. Accounts given on the command line replace the plan's targets,
/// and non-empty filter lists replace the plan's lists.
pub fn build_run_config(
    config: &Config,
    plan: Option<toml::Table>,
    args: &RunArgs,
) -> Result<RunConfig> {
    let mut run = RunConfig::new();
    if let Some(max) = config.max_concurrent_scopes {
        run = run.max_concurrent_scopes(max);
    }
    if let Some(max) = config.max_concurrent_checks {
        run = run.max_concurrent_checks(max);
    }
    if let Some(secs) = config.check_timeout_secs {
        run = run.check_timeout(Duration::from_secs(secs));
    }
    run.checks_per_second = config.checks_per_second;

    if let Some(plan) = plan {
        let toml::Value::Table(mut layered) =
            toml::Value::try_from(&run).context("encoding defaults")?
        else {
            anyhow::bail!("run defaults did not encode as a table");
        };
        layered.extend(plan);
        run = toml::Value::Table(layered)
            .try_into()
            .context("invalid run plan")?;
    }

    let targets = command_line_targets(args);
    if !targets.is_empty() {
        run.targets = targets;
    }

    let filter = &mut run.filter;
    replace_if_set(&mut filter.services, &args.services);
    replace_if_set(&mut filter.checks, &args.checks);
    replace_if_set(&mut filter.exclude_services, &args.exclude_services);
    replace_if_set(&mut filter.exclude_checks, &args.exclude_checks);

    if let Some(max) = args.max_scopes {
        run.max_concurrent_scopes = max;
    }
    if let Some(max) = args.max_checks {
        run.max_concurrent_checks = max;
    }
    if let Some(timeout) = args.timeout {
        run = run.check_timeout(timeout);
    }
    if let Some(deadline) = args.deadline {
        run = run.deadline(deadline);
    }
    if let Some(rate) = args.rate {
        run.checks_per_second = Some(rate);
    }
    if let Some(run_id) = &args.run_id {
        run.run_id = Some(run_id.clone());
    }

    Ok(run)
}

fn command_line_targets(args: &RunArgs) -> Vec<ProviderTarget> {
    [
        (Provider::Aws, &args.aws_accounts),
        (Provider::Azure, &args.azure_subscriptions),
        (Provider::Gcp, &args.gcp_projects),
    ]
    .into_iter()
    .filter(|(_, accounts)| !accounts.is_empty())
    .map(|(provider, accounts)| {
        let mut target = ProviderTarget::new(provider);
        for account in accounts {
            target = target.account(account.clone());
        }
        if !args.regions.iter().any(|r| r.eq_ignore_ascii_case("all")) {
            for region in &args.regions {
                target = target.region(region.clone());
            }
        }
        if let Some(partition) = &args.partition {
            target = target.partition(partition.clone());
        }
        target
    })
    .collect()
}

fn replace_if_set(list: &mut Vec<String>, flags: &[String]) {
    if !flags.is_empty() {
        *list = flags.to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posture::RegionSelection;

    const PLAN: &str = r#"
max_concurrent_checks = 4
check_timeout_ms = 20000

[[targets]]
provider = "aws"
accounts = ["111122223333"]
regions = ["us-east-1", "eu-west-1"]

[filter]
services = ["cloudtrail"]
"#;

    fn plan() -> toml::Table {
        PLAN.parse().unwrap()
    }

    #[test]
    fn test_config_defaults_apply_without_plan() {
        let config = Config {
            max_concurrent_scopes: Some(2),
            check_timeout_secs: Some(60),
            ..Config::default()
        };
        let args = RunArgs {
            aws_accounts: vec!["111".into()],
            ..RunArgs::default()
        };

        let run = build_run_config(&config, None, &args).unwrap();
        assert_eq!(run.max_concurrent_scopes, 2);
        assert_eq!(run.check_timeout_duration(), Some(Duration::from_secs(60)));
        assert_eq!(run.targets.len(), 1);
        assert_eq!(run.targets[0].regions, RegionSelection::All);
        run.validate().unwrap();
    }

    #[test]
    fn test_plan_overrides_config() {
        let config = Config {
            max_concurrent_scopes: Some(2),
            max_concurrent_checks: Some(32),
            ..Config::default()
        };

        let run = build_run_config(&config, Some(plan()), &RunArgs::default()).unwrap();
        assert_eq!(run.max_concurrent_scopes, 2);
        assert_eq!(run.max_concurrent_checks, 4);
        assert_eq!(run.check_timeout_ms, Some(20_000));
        assert_eq!(run.filter.services, ["cloudtrail"]);
        assert_eq!(
            run.targets[0].regions,
            RegionSelection::Regions(vec!["us-east-1".into(), "eu-west-1".into()])
        );
    }

    #[test]
    fn test_flags_override_plan() {
        let args = RunArgs {
            azure_subscriptions: vec!["sub-1".into()],
            regions: vec!["eastus".into()],
            services: vec!["azure.virtual_machines".into()],
            max_checks: Some(1),
            deadline: Some(Duration::from_millis(300_250)),
            ..RunArgs::default()
        };

        let run = build_run_config(&Config::default(), Some(plan()), &args).unwrap();
        assert_eq!(run.targets.len(), 1);
        assert_eq!(run.targets[0].provider, Provider::Azure);
        assert_eq!(run.filter.services, ["azure.virtual_machines"]);
        assert_eq!(run.max_concurrent_checks, 1);
        assert_eq!(run.deadline_ms, Some(300_250));
        // Untouched plan values survive
        assert_eq!(run.check_timeout_ms, Some(20_000));
    }

    #[test]
    fn test_all_keyword_selects_every_region() {
        let args = RunArgs {
            aws_accounts: vec!["111".into(), "222".into()],
            regions: vec!["ALL".into()],
            partition: Some("aws-cn".into()),
            ..RunArgs::default()
        };
        let targets = command_line_targets(&args);
        assert_eq!(targets[0].accounts, ["111", "222"]);
        assert_eq!(targets[0].regions, RegionSelection::All);
        assert_eq!(targets[0].partition.as_deref(), Some("aws-cn"));
    }

    #[test]
    fn test_invalid_plan_is_rejected() {
        let bad: toml::Table = "max_concurrent_scopes = \"many\"".parse().unwrap();
        assert!(build_run_config(&Config::default(), Some(bad), &RunArgs::default()).is_err());
    }
}
