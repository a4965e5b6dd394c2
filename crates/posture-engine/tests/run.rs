//! End-to-end scheduler runs against in-process checks.
//!
//! These tests cover:
//! - fault isolation between checks in one scope
//! - partial findings from checks that fail midway
//! - single-flight cache sharing between checks
//! - cancellation, deadlines and per-check timeouts
//! - run-wide deduplication and the concurrency limit

use async_trait::async_trait;
use posture_core::{CheckError, ComplianceStatus, Provider, RawFinding, Resource, Scope};
use posture_engine::{
    CacheKey, CancelSignal, ChannelSink, Check, CheckContext, CheckRegistry, ExitStatus,
    FindingEmitter, MemorySink, OutcomeStatus, Parameters, ProviderTarget, RunConfig, Scheduler,
    StaticResolver,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

type CheckResult = Result<(), CheckError>;

fn finding(id: impl Into<String>, resource: impl Into<String>) -> RawFinding {
    RawFinding::new(id)
        .status(ComplianceStatus::Passed)
        .resource(Resource::new("Other", resource))
}

/// Emits one passing finding per scope
struct AlwaysPasses;

#[async_trait]
impl Check for AlwaysPasses {
    fn name(&self) -> &'static str {
        "a_always_passes"
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn parameters(&self) -> Parameters {
        Parameters::without_credential()
    }

    async fn run(&self, ctx: &CheckContext, findings: &mut FindingEmitter) -> CheckResult {
        findings
            .emit(finding(format!("{}/{}/a", ctx.account_id(), ctx.region()), "resource-1"))
            .await;
        Ok(())
    }
}

/// Emits `emit_before_failing` findings, then fails
struct FailsAfter {
    name: &'static str,
    emit_before_failing: usize,
}

#[async_trait]
impl Check for FailsAfter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn parameters(&self) -> Parameters {
        Parameters::without_credential()
    }

    async fn run(&self, ctx: &CheckContext, findings: &mut FindingEmitter) -> CheckResult {
        for i in 0..self.emit_before_failing {
            findings
                .emit(finding(format!("{}/{}/{i}", ctx.region(), self.name), format!("r-{i}")))
                .await;
        }
        Err(CheckError::InvalidResource("item is missing its identifier".into()))
    }
}

fn scheduler(registry: CheckRegistry, sink: Arc<MemorySink>) -> Scheduler {
    Scheduler::builder(registry)
        .resolver(StaticResolver::new())
        .sink_arc(sink)
        .build()
        .unwrap()
}

fn single_scope() -> RunConfig {
    RunConfig::new().target(ProviderTarget::new(Provider::Aws).account("111").region("us-east-1"))
}

fn scope() -> Scope {
    Scope::new(Provider::Aws, "111", "us-east-1")
}

#[tokio::test]
async fn run_isolates_failing_check() {
    let mut registry = CheckRegistry::builder();
    registry.register("x", AlwaysPasses).unwrap();
    registry
        .register(
            "x",
            FailsAfter {
                name: "b_fails_first",
                emit_before_failing: 0,
            },
        )
        .unwrap();
    let sink = Arc::new(MemorySink::new());

    let result = scheduler(registry.build(), Arc::clone(&sink))
        .run(&single_scope())
        .await
        .unwrap();

    let a = result.outcome(&scope(), "a_always_passes").unwrap();
    assert_eq!(a.status, OutcomeStatus::Completed);
    assert_eq!(a.findings, 1);

    let b = result.outcome(&scope(), "b_fails_first").unwrap();
    assert_eq!(b.status, OutcomeStatus::Failed);
    assert_eq!(b.findings, 0);
    assert!(b.error.as_deref().unwrap().contains("missing its identifier"));

    assert_eq!(result.findings_emitted, 1);
    assert_eq!(result.check_errors().count(), 1);
    assert_eq!(sink.findings()[0].check(), "a_always_passes");
    assert_eq!(result.exit_status(), ExitStatus::Errors);
}

#[tokio::test]
async fn run_keeps_findings_emitted_before_failure() {
    let mut registry = CheckRegistry::builder();
    registry
        .register(
            "x",
            FailsAfter {
                name: "partial",
                emit_before_failing: 3,
            },
        )
        .unwrap();
    registry.register("x", AlwaysPasses).unwrap();
    let sink = Arc::new(MemorySink::new());

    let result = scheduler(registry.build(), Arc::clone(&sink))
        .run(&single_scope())
        .await
        .unwrap();

    let partial = result.outcome(&scope(), "partial").unwrap();
    assert_eq!(partial.status, OutcomeStatus::Failed);
    assert_eq!(partial.findings, 3);

    let partial_ids: Vec<_> = sink
        .findings()
        .into_iter()
        .filter(|f| f.check() == "partial")
        .map(|f| f.id)
        .collect();
    assert_eq!(
        partial_ids,
        ["us-east-1/partial/0", "us-east-1/partial/1", "us-east-1/partial/2"]
    );

    // The later check in the same scope still ran
    assert_eq!(
        result.outcome(&scope(), "a_always_passes").unwrap().status,
        OutcomeStatus::Completed
    );
}

#[tokio::test]
async fn run_records_one_outcome_per_scope_and_check() {
    let mut registry = CheckRegistry::builder();
    registry.register("x", AlwaysPasses).unwrap();
    registry
        .register(
            "y",
            FailsAfter {
                name: "flaky",
                emit_before_failing: 1,
            },
        )
        .unwrap();
    let sink = Arc::new(MemorySink::new());

    let config = RunConfig::new().target(
        ProviderTarget::new(Provider::Aws)
            .account("111")
            .account("222")
            .region("us-east-1")
            .region("us-west-2"),
    );
    let result = scheduler(registry.build(), sink).run(&config).await.unwrap();

    assert_eq!(result.scopes_planned, 4);
    assert_eq!(result.outcomes.len(), 8);
    for outcome in &result.outcomes {
        // Either findings without error, or a recorded error
        assert!(outcome.status == OutcomeStatus::Completed || outcome.error.is_some());
    }
    let order: Vec<_> = result
        .outcomes
        .iter()
        .map(|o| format!("{}:{}", o.scope, o.check))
        .collect();
    assert_eq!(order[0], "aws/111/us-east-1:a_always_passes");
    assert_eq!(order[1], "aws/111/us-east-1:flaky");
    assert_eq!(order[7], "aws/222/us-west-2:flaky");
}

const LIST_X: CacheKey<Vec<String>> = CacheKey::new("list-x");

/// Reads the shared listing and emits one finding per item
struct ListReader {
    name: &'static str,
    fetches: Arc<AtomicUsize>,
}

#[async_trait]
impl Check for ListReader {
    fn name(&self) -> &'static str {
        self.name
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn parameters(&self) -> Parameters {
        Parameters::without_credential()
    }

    async fn run(&self, ctx: &CheckContext, findings: &mut FindingEmitter) -> CheckResult {
        let fetches = Arc::clone(&self.fetches);
        let items = ctx
            .cache()
            .get_or_compute(&LIST_X, || async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(vec!["x-1".to_string(), "x-2".to_string(), "x-3".to_string()])
            })
            .await?;

        for item in items.iter() {
            findings
                .emit(finding(format!("{}/{item}", self.name), item.clone()))
                .await;
        }
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_shares_cached_listing_between_checks() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let mut registry = CheckRegistry::builder();
    for name in ["reader_one", "reader_two"] {
        registry
            .register(
                "x",
                ListReader {
                    name,
                    fetches: Arc::clone(&fetches),
                },
            )
            .unwrap();
    }
    let sink = Arc::new(MemorySink::new());

    let result = scheduler(registry.build(), Arc::clone(&sink))
        .run(&single_scope())
        .await
        .unwrap();

    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(result.findings_emitted, 6);
    for check in ["reader_one", "reader_two"] {
        assert_eq!(result.outcome(&scope(), check).unwrap().findings, 3);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_uses_fresh_cache_per_scope() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let mut registry = CheckRegistry::builder();
    registry
        .register(
            "x",
            ListReader {
                name: "reader",
                fetches: Arc::clone(&fetches),
            },
        )
        .unwrap();

    let config = RunConfig::new().target(
        ProviderTarget::new(Provider::Aws)
            .account("111")
            .region("us-east-1")
            .region("eu-west-1"),
    );
    let result = scheduler(registry.build(), Arc::new(MemorySink::new()))
        .run(&config)
        .await
        .unwrap();

    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    // Same finding ids in both regions, but the run-wide dedup keeps one each
    assert_eq!(result.findings_emitted, 3);
    assert_eq!(result.duplicates_discarded, 3);
}

/// Emits one finding, and cancels the run once `cancel_at` invocations have finished
struct CancelsRun {
    signal: CancelSignal,
    seen: AtomicUsize,
    cancel_at: usize,
}

#[async_trait]
impl Check for CancelsRun {
    fn name(&self) -> &'static str {
        "cancels_run"
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn parameters(&self) -> Parameters {
        Parameters::without_credential()
    }

    async fn run(&self, ctx: &CheckContext, findings: &mut FindingEmitter) -> CheckResult {
        findings.emit(finding(ctx.scope().to_string(), ctx.region())).await;
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.cancel_at {
            self.signal.cancel();
        }
        Ok(())
    }
}

#[tokio::test]
async fn run_cancelled_after_two_scopes_keeps_their_findings() {
    let signal = CancelSignal::new();
    let mut registry = CheckRegistry::builder();
    registry
        .register(
            "x",
            CancelsRun {
                signal: signal.clone(),
                seen: AtomicUsize::new(0),
                cancel_at: 2,
            },
        )
        .unwrap();
    let sink = Arc::new(MemorySink::new());

    let config = RunConfig::new()
        .target(
            ProviderTarget::new(Provider::Aws)
                .account("111")
                .account("222")
                .region("us-east-1")
                .region("us-west-2"),
        )
        .max_concurrent_scopes(1);
    let result = scheduler(registry.build(), Arc::clone(&sink))
        .run_with_cancel(&config, signal)
        .await
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.scopes_planned, 4);
    assert_eq!(result.scopes_completed, 2);
    assert_eq!(result.outcomes_with(OutcomeStatus::Completed).count(), 2);
    assert_eq!(result.outcomes_with(OutcomeStatus::Cancelled).count(), 2);

    let ids: Vec<_> = sink.findings().into_iter().map(|f| f.id).collect();
    assert_eq!(ids, ["aws/111/us-east-1", "aws/111/us-west-2"]);
    assert_eq!(result.exit_status(), ExitStatus::Incomplete);
}

/// Sleeps far longer than any test timeout
struct Hangs;

#[async_trait]
impl Check for Hangs {
    fn name(&self) -> &'static str {
        "hangs"
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn parameters(&self) -> Parameters {
        Parameters::without_credential()
    }

    async fn run(&self, ctx: &CheckContext, findings: &mut FindingEmitter) -> CheckResult {
        findings.emit(finding("before-hang", ctx.region())).await;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn run_times_out_slow_check() {
    let mut registry = CheckRegistry::builder();
    registry.register("x", Hangs).unwrap();
    registry.register("x", AlwaysPasses).unwrap();
    let sink = Arc::new(MemorySink::new());

    let config = single_scope().check_timeout(Duration::from_secs(5));
    let result = scheduler(registry.build(), Arc::clone(&sink))
        .run(&config)
        .await
        .unwrap();

    let hung = result.outcome(&scope(), "hangs").unwrap();
    assert_eq!(hung.status, OutcomeStatus::TimedOut);
    assert_eq!(hung.findings, 1);
    assert_eq!(
        result.outcome(&scope(), "a_always_passes").unwrap().status,
        OutcomeStatus::Completed
    );
    assert_eq!(sink.len(), 2);
    assert!(!result.cancelled);
    assert_eq!(result.exit_status(), ExitStatus::Errors);
}

#[tokio::test(start_paused = true)]
async fn run_deadline_cancels_in_flight_checks() {
    let mut registry = CheckRegistry::builder();
    registry.register("x", Hangs).unwrap();
    let sink = Arc::new(MemorySink::new());

    let config = single_scope().deadline(Duration::from_secs(10));
    let result = scheduler(registry.build(), Arc::clone(&sink))
        .run(&config)
        .await
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(
        result.outcome(&scope(), "hangs").unwrap().status,
        OutcomeStatus::Cancelled
    );
    // Emitted before the deadline, so it was delivered
    assert_eq!(sink.len(), 1);
    assert_eq!(result.exit_status(), ExitStatus::Incomplete);
}

/// Tracks how many invocations overlap
struct Gauge {
    name: &'static str,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Check for Gauge {
    fn name(&self) -> &'static str {
        self.name
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn parameters(&self) -> Parameters {
        Parameters::none()
    }

    async fn run(&self, _ctx: &CheckContext, _findings: &mut FindingEmitter) -> CheckResult {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_respects_check_concurrency_limit() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut registry = CheckRegistry::builder();
    for name in ["g1", "g2", "g3", "g4", "g5", "g6"] {
        registry
            .register(
                "x",
                Gauge {
                    name,
                    current: Arc::clone(&current),
                    peak: Arc::clone(&peak),
                },
            )
            .unwrap();
    }

    let config = single_scope()
        .target(ProviderTarget::new(Provider::Aws).account("222").region("us-east-1"))
        .max_concurrent_checks(2);
    let result = scheduler(registry.build(), Arc::new(MemorySink::new()))
        .run(&config)
        .await
        .unwrap();

    assert_eq!(result.outcomes_with(OutcomeStatus::Completed).count(), 12);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

/// Needs a credential the static resolver does not hand out
struct NeedsCredential;

#[async_trait]
impl Check for NeedsCredential {
    fn name(&self) -> &'static str {
        "needs_credential"
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    async fn run(&self, _ctx: &CheckContext, _findings: &mut FindingEmitter) -> CheckResult {
        unreachable!("scheduler checks parameters before running");
    }
}

#[tokio::test]
async fn run_fails_check_with_unmet_parameters() {
    let mut registry = CheckRegistry::builder();
    registry.register("x", NeedsCredential).unwrap();

    let result = scheduler(registry.build(), Arc::new(MemorySink::new()))
        .run(&single_scope())
        .await
        .unwrap();

    let outcome = result.outcome(&scope(), "needs_credential").unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(
        outcome.error.as_deref(),
        Some("no aws credential available for this scope")
    );
}

#[tokio::test]
async fn run_skips_disabled_regions_without_failing() {
    let mut registry = CheckRegistry::builder();
    registry.register("x", AlwaysPasses).unwrap();
    let scheduler = Scheduler::builder(registry.build())
        .resolver(StaticResolver::new().disable(Provider::Aws, "111", "ap-east-1"))
        .sink(MemorySink::new())
        .build()
        .unwrap();

    let config = RunConfig::new().target(
        ProviderTarget::new(Provider::Aws)
            .account("111")
            .region("us-east-1")
            .region("ap-east-1"),
    );
    let result = scheduler.run(&config).await.unwrap();

    assert_eq!(result.scopes_planned, 1);
    assert_eq!(result.skipped_scopes.len(), 1);
    assert_eq!(result.exit_status(), ExitStatus::Clean);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_streams_findings_through_channel_sink() {
    let mut registry = CheckRegistry::builder();
    registry
        .register(
            "x",
            FailsAfter {
                name: "streamed",
                emit_before_failing: 5,
            },
        )
        .unwrap();
    let (sink, stream) = ChannelSink::bounded(1);
    let scheduler = Scheduler::builder(registry.build())
        .resolver(StaticResolver::new())
        .sink(sink)
        .build()
        .unwrap();

    let consumer = tokio::spawn(async move { stream.map(|f| f.id).collect::<Vec<_>>().await });
    let result = scheduler.run(&single_scope()).await.unwrap();
    drop(scheduler);

    let ids = consumer.await.unwrap();
    assert_eq!(ids.len(), 5);
    assert_eq!(ids[0], "us-east-1/streamed/0");
    assert_eq!(result.findings_emitted, 5);
}

#[tokio::test(start_paused = true)]
async fn run_counts_only_delivered_findings_when_sink_stalls() {
    let mut registry = CheckRegistry::builder();
    registry
        .register(
            "x",
            FailsAfter {
                name: "stalled",
                emit_before_failing: 3,
            },
        )
        .unwrap();
    // Nobody reads the stream, so the second finding never fits
    let (sink, stream) = ChannelSink::bounded(1);
    let scheduler = Scheduler::builder(registry.build())
        .resolver(StaticResolver::new())
        .sink(sink)
        .build()
        .unwrap();

    let config = single_scope().check_timeout(Duration::from_secs(1));
    let result = scheduler.run(&config).await.unwrap();
    drop(scheduler);

    let outcome = result.outcome(&scope(), "stalled").unwrap();
    assert_eq!(outcome.status, OutcomeStatus::TimedOut);
    assert_eq!(outcome.findings, 1);
    assert_eq!(result.findings_emitted, 1);
    assert_eq!(result.duplicates_discarded, 0);

    let received: Vec<_> = stream.map(|f| f.id).collect().await;
    assert_eq!(received, ["us-east-1/stalled/0"]);
}
