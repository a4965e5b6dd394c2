//! Run scheduler.
//!
//! A run expands its targets into scopes, then executes every applicable
//! check in every scope as its own task. Two semaphores bound the work: one
//! for scopes in flight and one for checks in flight across all scopes. Each
//! check runs inside a spawned task, so a panic is caught at the task
//! boundary and recorded like any other check error.

use crate::cancel::CancelSignal;
use crate::config::RunConfig;
use crate::context::{CheckContext, ExecutionScope};
use crate::emit::FindingEmitter;
use crate::normalize::{FindingOrigin, Normalizer};
use crate::registry::{CheckDescriptor, CheckRegistry};
use crate::result::{outcome_for, OutcomeStatus, RunRecorder, RunResult};
use crate::scope::{PlannedScope, ScopeExpander, ScopeResolver};
use crate::sink::OutputSink;
use futures_util::future::join_all;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use posture_core::{CheckError, PostureError, Result};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

/// Executes checks from a registry across the scopes of a run
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    registry: Arc<CheckRegistry>,
    resolver: Arc<dyn ScopeResolver>,
    sink: Arc<dyn OutputSink>,
}

/// Limits and shared state for one run
struct RunLimits {
    scopes: Arc<Semaphore>,
    checks: Arc<Semaphore>,
    rate: Option<DefaultDirectRateLimiter>,
    timeout: Option<Duration>,
}

/// How one check invocation ended, before it is recorded
enum UnitEnd {
    Finished(std::result::Result<(), CheckError>),
    TimedOut(Duration),
    Cancelled,
}

impl Scheduler {
    /// Create a builder over a frozen registry
    #[must_use]
    pub fn builder(registry: CheckRegistry) -> SchedulerBuilder {
        SchedulerBuilder::new(registry)
    }

    /// The registry checks are drawn from
    #[must_use]
    pub fn registry(&self) -> &CheckRegistry {
        &self.inner.registry
    }

    /// Run every applicable check against every scope the config expands to
    pub async fn run(&self, config: &RunConfig) -> Result<RunResult> {
        self.run_with_cancel(config, CancelSignal::new()).await
    }

    /// Run with an external cancellation signal.
    ///
    /// When the signal fires no new checks start. Checks already running are
    /// interrupted at their next await point and recorded as cancelled;
    /// findings they emitted before that stay delivered.
    pub async fn run_with_cancel(&self, config: &RunConfig, cancel: CancelSignal) -> Result<RunResult> {
        config.validate()?;
        let run_id = config
            .run_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let recorder = Arc::new(RunRecorder::new(run_id.clone()));
        let normalizer = Arc::new(Normalizer::new(
            Arc::clone(&self.inner.sink),
            Arc::clone(&recorder),
        ));
        let deadline = config
            .deadline_duration()
            .map(|deadline| cancel.cancel_after(deadline));

        info!(run_id = %run_id, checks = self.inner.registry.len(), "starting run");

        let plan = ScopeExpander::new(self.inner.resolver.as_ref())
            .expand(&config.targets)
            .await;
        recorder.scopes_planned(plan.scopes.len());
        for skipped in plan.skipped {
            recorder.skipped_scope(skipped);
        }

        let limits = Arc::new(RunLimits {
            scopes: Arc::new(Semaphore::new(config.max_concurrent_scopes)),
            checks: Arc::new(Semaphore::new(config.max_concurrent_checks)),
            rate: rate_limiter(config.checks_per_second)?,
            timeout: config.check_timeout_duration(),
        });

        let handles: Vec<_> = plan
            .scopes
            .into_iter()
            .enumerate()
            .map(|(index, planned)| {
                let checks = self
                    .inner
                    .registry
                    .resolve(planned.scope.provider, &config.filter);
                let job = ScopeJob {
                    index,
                    planned,
                    checks,
                    limits: Arc::clone(&limits),
                    normalizer: Arc::clone(&normalizer),
                    recorder: Arc::clone(&recorder),
                    cancel: cancel.clone(),
                };
                tokio::spawn(job.run())
            })
            .collect();

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                error!(error = %e, "scope task aborted");
            }
        }

        if let Some(deadline) = deadline {
            deadline.abort();
        }
        if let Err(e) = self.inner.sink.flush().await {
            warn!(error = %e, "sink flush failed");
            recorder.sink_failed();
        }

        let result = recorder.finish(cancel.is_cancelled());
        info!(
            run_id = %result.run_id,
            scopes = result.scopes_planned,
            skipped = result.skipped_scopes.len(),
            findings = result.findings_emitted,
            failed = result.status_counts.failed,
            check_errors = result.check_errors().count(),
            duplicates = result.duplicates_discarded,
            cancelled = result.cancelled,
            "run finished"
        );
        Ok(result)
    }
}

fn rate_limiter(per_second: Option<u32>) -> Result<Option<DefaultDirectRateLimiter>> {
    per_second
        .map(|rate| {
            NonZeroU32::new(rate)
                .map(|rate| RateLimiter::direct(Quota::per_second(rate)))
                .ok_or_else(|| PostureError::Config("checks_per_second must be at least 1".into()))
        })
        .transpose()
}

/// All checks for one scope
struct ScopeJob {
    index: usize,
    planned: PlannedScope,
    checks: Vec<Arc<CheckDescriptor>>,
    limits: Arc<RunLimits>,
    normalizer: Arc<Normalizer>,
    recorder: Arc<RunRecorder>,
    cancel: CancelSignal,
}

impl ScopeJob {
    async fn run(self) {
        let scope = self.planned.scope.clone();

        let permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.limits.scopes).acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            debug!(scope = %scope, "scope cancelled before it started");
            for (index, check) in self.checks.iter().enumerate() {
                self.recorder.outcome(
                    (self.index, index),
                    outcome_for(
                        &scope,
                        check.service(),
                        check.name(),
                        OutcomeStatus::Cancelled,
                        0,
                        None,
                        Duration::ZERO,
                    ),
                );
            }
            return;
        };

        info!(scope = %scope, checks = self.checks.len(), "auditing scope");
        let started = Instant::now();
        let exec = Arc::new(ExecutionScope::new(scope.clone(), self.planned.credential));

        let units: Vec<_> = self
            .checks
            .iter()
            .map(|check| {
                let produced = Arc::new(AtomicUsize::new(0));
                let unit = CheckUnit {
                    check: Arc::clone(check),
                    exec: Arc::clone(&exec),
                    limits: Arc::clone(&self.limits),
                    normalizer: Arc::clone(&self.normalizer),
                    cancel: self.cancel.clone(),
                    produced: Arc::clone(&produced),
                };
                (produced, tokio::spawn(unit.run()))
            })
            .collect();

        let mut cancelled = false;
        for (index, (check, (produced, handle))) in self.checks.iter().zip(units).enumerate() {
            let (end, elapsed) = match handle.await {
                Ok(finished) => finished,
                Err(e) => (UnitEnd::Finished(Err(panic_error(e))), Duration::ZERO),
            };
            let findings = produced.load(Ordering::Relaxed);

            let (status, error) = match end {
                UnitEnd::Finished(Ok(())) => (OutcomeStatus::Completed, None),
                UnitEnd::Finished(Err(e)) => {
                    warn!(
                        scope = %scope,
                        check = check.name(),
                        findings,
                        error = %e,
                        "check failed"
                    );
                    (OutcomeStatus::Failed, Some(e))
                }
                UnitEnd::TimedOut(limit) => {
                    warn!(scope = %scope, check = check.name(), findings, ?limit, "check timed out");
                    (OutcomeStatus::TimedOut, Some(CheckError::Timeout(limit)))
                }
                UnitEnd::Cancelled => {
                    cancelled = true;
                    (OutcomeStatus::Cancelled, None)
                }
            };

            self.recorder.outcome(
                (self.index, index),
                outcome_for(
                    &scope,
                    check.service(),
                    check.name(),
                    status,
                    findings,
                    error.as_ref(),
                    elapsed,
                ),
            );
        }

        let cache = exec.cache().stats();
        if cancelled {
            info!(scope = %scope, elapsed = ?started.elapsed(), "scope interrupted by cancellation");
        } else {
            self.recorder.scope_completed();
            info!(
                scope = %scope,
                elapsed = ?started.elapsed(),
                cache_hits = cache.hits,
                cache_computes = cache.computes,
                "scope finished"
            );
        }
    }
}

/// One check against one scope
struct CheckUnit {
    check: Arc<CheckDescriptor>,
    exec: Arc<ExecutionScope>,
    limits: Arc<RunLimits>,
    normalizer: Arc<Normalizer>,
    cancel: CancelSignal,
    produced: Arc<AtomicUsize>,
}

impl CheckUnit {
    async fn run(self) -> (UnitEnd, Duration) {
        let permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.limits.checks).acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            return (UnitEnd::Cancelled, Duration::ZERO);
        };

        if let Some(rate) = &self.limits.rate {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return (UnitEnd::Cancelled, Duration::ZERO),
                () = rate.until_ready() => {}
            }
        }

        if let Some(e) = self.check.parameters().unmet(&self.exec) {
            return (UnitEnd::Finished(Err(e)), Duration::ZERO);
        }

        let scope = self.exec.scope().clone();
        let origin = Arc::new(FindingOrigin {
            service: self.check.service().to_string(),
            check: self.check.name().to_string(),
            title: self.check.title().to_string(),
            scope,
        });
        let ctx = CheckContext::new(Arc::clone(&self.exec));
        let mut emitter = FindingEmitter::new(
            Arc::clone(&self.normalizer),
            origin,
            Arc::clone(&self.produced),
        );

        debug!(scope = %self.exec.scope(), check = self.check.name(), "running check");
        let started = Instant::now();
        let body = self.check.check().run(&ctx, &mut emitter);
        let end = tokio::select! {
            biased;
            () = self.cancel.cancelled() => UnitEnd::Cancelled,
            end = with_timeout(self.limits.timeout, body) => end,
        };
        (end, started.elapsed())
    }
}

async fn with_timeout<F>(limit: Option<Duration>, body: F) -> UnitEnd
where
    F: std::future::Future<Output = std::result::Result<(), CheckError>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, body).await {
            Ok(result) => UnitEnd::Finished(result),
            Err(_) => UnitEnd::TimedOut(limit),
        },
        None => UnitEnd::Finished(body.await),
    }
}

fn panic_error(e: JoinError) -> CheckError {
    if !e.is_panic() {
        return CheckError::Failed(format!("check task aborted: {e}"));
    }
    let payload = e.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    CheckError::Panicked(message)
}

/// Builder for configuring a [`Scheduler`]
pub struct SchedulerBuilder {
    registry: CheckRegistry,
    resolver: Option<Arc<dyn ScopeResolver>>,
    sink: Option<Arc<dyn OutputSink>>,
}

impl SchedulerBuilder {
    /// Create a builder over a frozen registry
    #[must_use]
    pub fn new(registry: CheckRegistry) -> Self {
        Self {
            registry,
            resolver: None,
            sink: None,
        }
    }

    /// Set the scope resolver
    #[must_use]
    pub fn resolver(self, resolver: impl ScopeResolver + 'static) -> Self {
        self.resolver_arc(Arc::new(resolver))
    }

    /// Set an already shared scope resolver
    #[must_use]
    pub fn resolver_arc(mut self, resolver: Arc<dyn ScopeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the output sink
    #[must_use]
    pub fn sink(self, sink: impl OutputSink + 'static) -> Self {
        self.sink_arc(Arc::new(sink))
    }

    /// Set an already shared output sink
    #[must_use]
    pub fn sink_arc(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the scheduler
    pub fn build(self) -> Result<Scheduler> {
        let resolver = self
            .resolver
            .ok_or_else(|| PostureError::Config("scheduler needs a scope resolver".into()))?;
        let sink = self
            .sink
            .ok_or_else(|| PostureError::Config("scheduler needs an output sink".into()))?;

        Ok(Scheduler {
            inner: Arc::new(SchedulerInner {
                registry: Arc::new(self.registry),
                resolver,
                sink,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderTarget;
    use crate::registry::Check;
    use crate::scope::StaticResolver;
    use crate::sink::MemorySink;
    use async_trait::async_trait;
    use posture_core::{ComplianceStatus, Provider, RawFinding, Resource};

    struct Passing;

    #[async_trait]
    impl Check for Passing {
        fn name(&self) -> &'static str {
            "passing"
        }

        fn provider(&self) -> Provider {
            Provider::Aws
        }

        fn parameters(&self) -> crate::registry::Parameters {
            crate::registry::Parameters::without_credential()
        }

        async fn run(
            &self,
            ctx: &CheckContext,
            findings: &mut FindingEmitter,
        ) -> std::result::Result<(), CheckError> {
            findings
                .emit(
                    RawFinding::new(format!("{}/passing", ctx.region()))
                        .status(ComplianceStatus::Passed)
                        .resource(Resource::new("AwsAccount", ctx.account_id())),
                )
                .await;
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Check for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn provider(&self) -> Provider {
            Provider::Aws
        }

        fn parameters(&self) -> crate::registry::Parameters {
            crate::registry::Parameters::none()
        }

        async fn run(
            &self,
            _ctx: &CheckContext,
            _findings: &mut FindingEmitter,
        ) -> std::result::Result<(), CheckError> {
            panic!("index out of bounds");
        }
    }

    fn scheduler(sink: Arc<MemorySink>) -> Scheduler {
        let mut registry = CheckRegistry::builder();
        registry.register("x", Passing).unwrap();
        registry.register("x", Panicking).unwrap();
        Scheduler::builder(registry.build())
            .resolver(StaticResolver::new())
            .sink_arc(sink)
            .build()
            .unwrap()
    }

    fn config() -> RunConfig {
        RunConfig::new()
            .target(ProviderTarget::new(Provider::Aws).account("111").region("us-east-1"))
            .run_id("run-test")
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let sink = Arc::new(MemorySink::new());
        let result = scheduler(Arc::clone(&sink)).run(&config()).await.unwrap();

        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(result.outcomes[0].status, OutcomeStatus::Completed);
        assert_eq!(result.outcomes[1].status, OutcomeStatus::Failed);
        assert!(result.outcomes[1]
            .error
            .as_deref()
            .unwrap()
            .contains("index out of bounds"));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.findings()[0].product_fields.run_id, "run-test");
        assert_eq!(result.scopes_completed, 1);
    }

    #[tokio::test]
    async fn test_missing_resolver_is_a_config_error() {
        let result = Scheduler::builder(CheckRegistry::default())
            .sink(MemorySink::new())
            .build();
        assert!(matches!(result, Err(PostureError::Config(_))));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let sink = Arc::new(MemorySink::new());
        let err = scheduler(sink).run(&RunConfig::new()).await.unwrap_err();
        assert!(matches!(err, PostureError::Config(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let sink = Arc::new(MemorySink::new());
        let cancel = CancelSignal::new();
        cancel.cancel();

        let result = scheduler(Arc::clone(&sink))
            .run_with_cancel(&config(), cancel)
            .await
            .unwrap();
        assert!(result.cancelled);
        assert!(result
            .outcomes
            .iter()
            .all(|o| o.status == OutcomeStatus::Cancelled));
        assert!(sink.is_empty());
        assert_eq!(result.exit_status(), crate::result::ExitStatus::Incomplete);
    }

    #[test]
    fn test_rate_limiter() {
        assert!(rate_limiter(None).unwrap().is_none());
        assert!(rate_limiter(Some(5)).unwrap().is_some());
        assert!(rate_limiter(Some(0)).is_err());
    }
}
