//! Run configuration types.

use posture_core::{PostureError, Provider, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of scopes audited at the same time
pub const DEFAULT_MAX_CONCURRENT_SCOPES: usize = 4;

/// Default number of checks executing at the same time across all scopes
pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 16;

/// Configuration for a single audit run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Providers, accounts and regions to audit
    pub targets: Vec<ProviderTarget>,

    /// Service and check selection
    pub filter: CheckFilter,

    /// Maximum scopes in flight
    pub max_concurrent_scopes: usize,

    /// Maximum checks in flight, shared by every scope
    pub max_concurrent_checks: usize,

    /// Per-check timeout in milliseconds
    pub check_timeout_ms: Option<u64>,

    /// Whole-run deadline in milliseconds; the run is cancelled when it elapses
    pub deadline_ms: Option<u64>,

    /// Upper bound on check starts per second
    pub checks_per_second: Option<u32>,

    /// Run identifier stamped on every finding; generated when absent
    pub run_id: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RunConfig {
    /// Create an empty configuration with default limits
    #[must_use]
    pub const fn new() -> Self {
        Self {
            targets: Vec::new(),
            filter: CheckFilter::new(),
            max_concurrent_scopes: DEFAULT_MAX_CONCURRENT_SCOPES,
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
            check_timeout_ms: None,
            deadline_ms: None,
            checks_per_second: None,
            run_id: None,
        }
    }

    /// Add a provider target
    #[must_use]
    pub fn target(mut self, target: ProviderTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Set the check filter
    #[must_use]
    pub fn filter(mut self, filter: CheckFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the scope concurrency limit
    #[must_use]
    pub fn max_concurrent_scopes(mut self, max: usize) -> Self {
        self.max_concurrent_scopes = max;
        self
    }

    /// Set the check concurrency limit
    #[must_use]
    pub fn max_concurrent_checks(mut self, max: usize) -> Self {
        self.max_concurrent_checks = max;
        self
    }

    /// Set the per-check timeout
    #[must_use]
    pub fn check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout_ms = Some(millis(timeout));
        self
    }

    /// Set the whole-run deadline
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = Some(millis(deadline));
        self
    }

    /// Limit how many checks may start per second
    #[must_use]
    pub fn checks_per_second(mut self, rate: u32) -> Self {
        self.checks_per_second = Some(rate);
        self
    }

    /// Use a fixed run identifier
    #[must_use]
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Per-check timeout as a duration
    #[must_use]
    pub fn check_timeout_duration(&self) -> Option<Duration> {
        self.check_timeout_ms.map(Duration::from_millis)
    }

    /// Run deadline as a duration
    #[must_use]
    pub fn deadline_duration(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Reject configurations the scheduler cannot run
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(PostureError::Config("no provider targets configured".into()));
        }
        if self.max_concurrent_scopes == 0 {
            return Err(PostureError::Config(
                "max_concurrent_scopes must be at least 1".into(),
            ));
        }
        if self.max_concurrent_checks == 0 {
            return Err(PostureError::Config(
                "max_concurrent_checks must be at least 1".into(),
            ));
        }
        if self.checks_per_second == Some(0) {
            return Err(PostureError::Config(
                "checks_per_second must be at least 1".into(),
            ));
        }
        if self.check_timeout_ms == Some(0) {
            return Err(PostureError::Config("check timeout must be non-zero".into()));
        }
        if self.deadline_ms == Some(0) {
            return Err(PostureError::Config("run deadline must be non-zero".into()));
        }
        for target in &self.targets {
            if target.accounts.iter().all(|a| a.trim().is_empty()) {
                return Err(PostureError::Config(format!(
                    "{} target has no accounts",
                    target.provider
                )));
            }
        }
        Ok(())
    }
}

/// Whole milliseconds, rounding a non-zero sub-millisecond remainder up
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

/// Accounts and regions to audit for one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTarget {
    /// Cloud provider
    pub provider: Provider,

    /// Accounts, subscriptions or projects
    pub accounts: Vec<String>,

    /// Region selection
    #[serde(default)]
    pub regions: RegionSelection,

    /// Partition override; derived from each region when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
}

impl ProviderTarget {
    /// Create a target for all regions of the provider
    #[must_use]
    pub const fn new(provider: Provider) -> Self {
        Self {
            provider,
            accounts: Vec::new(),
            regions: RegionSelection::All,
            partition: None,
        }
    }

    /// Add an account
    #[must_use]
    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.accounts.push(account.into());
        self
    }

    /// Restrict the target to one more explicit region
    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        match &mut self.regions {
            RegionSelection::All => self.regions = RegionSelection::Regions(vec![region.into()]),
            RegionSelection::Regions(regions) => regions.push(region.into()),
        }
        self
    }

    /// Audit every region the provider reports for the account
    #[must_use]
    pub fn all_regions(mut self) -> Self {
        self.regions = RegionSelection::All;
        self
    }

    /// Override the partition
    #[must_use]
    pub fn partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }
}

/// Which regions a target covers
///
/// Serialized as the keyword `"all"` or a list of region names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RegionSpec", into = "RegionSpec")]
pub enum RegionSelection {
    /// Every region the provider supports for the account
    #[default]
    All,
    /// An explicit list
    Regions(Vec<String>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RegionSpec {
    Keyword(String),
    List(Vec<String>),
}

impl TryFrom<RegionSpec> for RegionSelection {
    type Error = String;

    fn try_from(spec: RegionSpec) -> std::result::Result<Self, Self::Error> {
        let regions = match spec {
            RegionSpec::Keyword(keyword) => vec![keyword],
            RegionSpec::List(list) => list,
        };
        if regions.iter().any(|r| r.eq_ignore_ascii_case("all") || r == "*") {
            return Ok(Self::All);
        }
        let regions: Vec<String> = regions
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if regions.is_empty() {
            return Err("region list is empty; use \"all\" for every region".into());
        }
        Ok(Self::Regions(regions))
    }
}

impl From<RegionSelection> for RegionSpec {
    fn from(selection: RegionSelection) -> Self {
        match selection {
            RegionSelection::All => Self::Keyword("all".into()),
            RegionSelection::Regions(regions) => Self::List(regions),
        }
    }
}

/// Service and check selection for a run
///
/// Empty include lists select everything. When both include lists are set a
/// check runs if either its service or its own name is listed. Exclusions
/// always win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckFilter {
    /// Services to include
    pub services: Vec<String>,

    /// Checks to include
    pub checks: Vec<String>,

    /// Services to skip
    pub exclude_services: Vec<String>,

    /// Checks to skip
    pub exclude_checks: Vec<String>,
}

impl CheckFilter {
    /// Select every registered check
    #[must_use]
    pub const fn new() -> Self {
        Self {
            services: Vec::new(),
            checks: Vec::new(),
            exclude_services: Vec::new(),
            exclude_checks: Vec::new(),
        }
    }

    /// Include a service
    #[must_use]
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.services.push(service.into());
        self
    }

    /// Include a single check
    #[must_use]
    pub fn check(mut self, check: impl Into<String>) -> Self {
        self.checks.push(check.into());
        self
    }

    /// Exclude a service
    #[must_use]
    pub fn exclude_service(mut self, service: impl Into<String>) -> Self {
        self.exclude_services.push(service.into());
        self
    }

    /// Exclude a single check
    #[must_use]
    pub fn exclude_check(mut self, check: impl Into<String>) -> Self {
        self.exclude_checks.push(check.into());
        self
    }

    /// Returns true if the check passes the filter
    #[must_use]
    pub fn allows(&self, service: &str, check: &str) -> bool {
        if contains(&self.exclude_services, service) || contains(&self.exclude_checks, check) {
            return false;
        }
        match (self.services.is_empty(), self.checks.is_empty()) {
            (true, true) => true,
            (false, true) => contains(&self.services, service),
            (true, false) => contains(&self.checks, check),
            (false, false) => contains(&self.services, service) || contains(&self.checks, check),
        }
    }
}

fn contains(list: &[String], value: &str) -> bool {
    list.iter().any(|v| v == value)
}
