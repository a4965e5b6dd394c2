//! Run summary types.

use chrono::{DateTime, Utc};
use posture_core::{CheckError, ComplianceStatus, NormalizationError, Provider, Scope};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How a single check invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The check returned normally
    Completed,
    /// The check returned an error or panicked
    Failed,
    /// The check exceeded its timeout
    TimedOut,
    /// The run was cancelled before or while the check ran
    Cancelled,
}

impl OutcomeStatus {
    /// Returns true for failed and timed-out invocations
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed out",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Result of running one check against one scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Scope the check ran in
    pub scope: Scope,

    /// Service the check belongs to
    pub service: String,

    /// Check name
    pub check: String,

    /// How the invocation ended
    pub status: OutcomeStatus,

    /// Findings from this invocation that reached the sink
    pub findings: usize,

    /// Error detail for failed and timed-out invocations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock time spent in the check
    pub elapsed_ms: u64,
}

impl CheckOutcome {
    /// Returns true if the invocation failed or timed out
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.status.is_error()
    }
}

/// A scope the expander dropped before any check ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedScope {
    /// Provider
    pub provider: Provider,

    /// Account, subscription or project
    pub account_id: String,

    /// Region, when the rejection was region-specific
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Why it was dropped
    pub reason: String,
}

/// A raw finding the normalizer rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationFailure {
    /// Scope the finding came from
    pub scope: Scope,

    /// `service/check` that emitted it
    pub generator: String,

    /// Finding id, when it had one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finding_id: Option<String>,

    /// Why it was rejected
    pub reason: String,
}

/// Emitted findings by compliance status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// `PASSED`
    pub passed: usize,
    /// `FAILED`
    pub failed: usize,
    /// `WARNING`
    pub warning: usize,
    /// `NOT_AVAILABLE`
    pub not_available: usize,
}

impl StatusCounts {
    fn add(&mut self, status: ComplianceStatus) {
        match status {
            ComplianceStatus::Passed => self.passed += 1,
            ComplianceStatus::Failed => self.failed += 1,
            ComplianceStatus::Warning => self.warning += 1,
            ComplianceStatus::NotAvailable => self.not_available += 1,
        }
    }

    /// Sum of all statuses
    #[must_use]
    pub const fn total(&self) -> usize {
        self.passed + self.failed + self.warning + self.not_available
    }
}

/// Process exit status derived from a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every check completed
    Clean,
    /// At least one check failed or timed out, or a finding was rejected
    Errors,
    /// The run was cancelled before finishing, without errors
    Incomplete,
}

impl ExitStatus {
    /// Numeric process exit code
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::Errors => 1,
            Self::Incomplete => 2,
        }
    }
}

/// Summary of a completed run
///
/// Findings themselves go to the output sink; this only counts them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Run identifier stamped on every finding
    pub run_id: String,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished
    pub finished_at: DateTime<Utc>,

    /// Scopes the expander produced
    pub scopes_planned: usize,

    /// Scopes whose checks all reached a terminal outcome without cancellation
    pub scopes_completed: usize,

    /// Scopes dropped during expansion
    pub skipped_scopes: Vec<SkippedScope>,

    /// One outcome per (scope, check) pair, in scope then registration order
    pub outcomes: Vec<CheckOutcome>,

    /// Rejected raw findings
    pub normalization_errors: Vec<NormalizationFailure>,

    /// Findings handed to the sink successfully
    pub findings_emitted: usize,

    /// Emitted findings by compliance status
    pub status_counts: StatusCounts,

    /// Findings discarded as duplicates
    pub duplicates_discarded: usize,

    /// Findings the sink refused
    pub sink_failures: usize,

    /// Whether the run was cancelled
    pub cancelled: bool,
}

impl RunResult {
    /// Outcomes that failed or timed out
    pub fn check_errors(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.outcomes.iter().filter(|o| o.is_error())
    }

    /// Returns true if any check failed or timed out
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.check_errors().next().is_some()
    }

    /// Outcome for a given scope and check name
    #[must_use]
    pub fn outcome(&self, scope: &Scope, check: &str) -> Option<&CheckOutcome> {
        self.outcomes
            .iter()
            .find(|o| &o.scope == scope && o.check == check)
    }

    /// Outcomes with the given status
    pub fn outcomes_with(&self, status: OutcomeStatus) -> impl Iterator<Item = &CheckOutcome> {
        self.outcomes.iter().filter(move |o| o.status == status)
    }

    /// Run duration
    #[must_use]
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Exit status. Check and normalization errors outrank cancellation;
    /// failed compliance findings never count.
    #[must_use]
    pub fn exit_status(&self) -> ExitStatus {
        if self.has_errors() || !self.normalization_errors.is_empty() {
            ExitStatus::Errors
        } else if self.cancelled {
            ExitStatus::Incomplete
        } else {
            ExitStatus::Clean
        }
    }
}

#[derive(Default)]
struct RecorderState {
    scopes_planned: usize,
    scopes_completed: usize,
    skipped_scopes: Vec<SkippedScope>,
    outcomes: Vec<((usize, usize), CheckOutcome)>,
    normalization_errors: Vec<NormalizationFailure>,
    findings_emitted: usize,
    status_counts: StatusCounts,
    duplicates_discarded: usize,
    sink_failures: usize,
}

/// Thread-safe accumulator the scheduler and normalizer report into
pub(crate) struct RunRecorder {
    run_id: String,
    started_at: DateTime<Utc>,
    state: Mutex<RecorderState>,
}

impl RunRecorder {
    pub(crate) fn new(run_id: String) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            state: Mutex::default(),
        }
    }

    pub(crate) fn run_id(&self) -> &str {
        &self.run_id
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn scopes_planned(&self, count: usize) {
        self.lock().scopes_planned = count;
    }

    pub(crate) fn scope_completed(&self) {
        self.lock().scopes_completed += 1;
    }

    pub(crate) fn skipped_scope(&self, skipped: SkippedScope) {
        self.lock().skipped_scopes.push(skipped);
    }

    /// `order` is (scope index, check index) and fixes the position in the summary
    pub(crate) fn outcome(&self, order: (usize, usize), outcome: CheckOutcome) {
        self.lock().outcomes.push((order, outcome));
    }

    pub(crate) fn emitted(&self, status: ComplianceStatus) {
        let mut state = self.lock();
        state.findings_emitted += 1;
        state.status_counts.add(status);
    }

    pub(crate) fn duplicate(&self) {
        self.lock().duplicates_discarded += 1;
    }

    pub(crate) fn rejected(
        &self,
        scope: &Scope,
        generator: &str,
        finding_id: Option<String>,
        error: NormalizationError,
    ) {
        self.lock().normalization_errors.push(NormalizationFailure {
            scope: scope.clone(),
            generator: generator.to_string(),
            finding_id,
            reason: error.to_string(),
        });
    }

    pub(crate) fn sink_failed(&self) {
        self.lock().sink_failures += 1;
    }

    pub(crate) fn finish(&self, cancelled: bool) -> RunResult {
        let mut state = std::mem::take(&mut *self.lock());
        state.outcomes.sort_by_key(|(order, _)| *order);

        RunResult {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            scopes_planned: state.scopes_planned,
            scopes_completed: state.scopes_completed,
            skipped_scopes: state.skipped_scopes,
            outcomes: state.outcomes.into_iter().map(|(_, o)| o).collect(),
            normalization_errors: state.normalization_errors,
            findings_emitted: state.findings_emitted,
            status_counts: state.status_counts,
            duplicates_discarded: state.duplicates_discarded,
            sink_failures: state.sink_failures,
            cancelled,
        }
    }
}

/// Build an outcome record for a check invocation
pub(crate) fn outcome_for(
    scope: &Scope,
    service: &str,
    check: &str,
    status: OutcomeStatus,
    findings: usize,
    error: Option<&CheckError>,
    elapsed: Duration,
) -> CheckOutcome {
    CheckOutcome {
        scope: scope.clone(),
        service: service.to_string(),
        check: check.to_string(),
        status,
        findings,
        error: error.map(ToString::to_string),
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
    }
}
