//! Execution core for posture audits.
//!
//! This crate holds the [`CheckRegistry`] checks register into, the per-scope
//! [`RunCache`], the [`ScopeExpander`] and the [`Scheduler`] that runs every
//! check against every scope with fault isolation, plus the normalizer that
//! deduplicates findings on their way to an [`OutputSink`].
//!
//! ```no_run
//! use posture_core::Provider;
//! use posture_engine::{CheckRegistry, MemorySink, ProviderTarget, RunConfig, Scheduler, StaticResolver};
//!
//! # async fn example() -> posture_core::Result<()> {
//! let registry = CheckRegistry::builder().build();
//! let scheduler = Scheduler::builder(registry)
//!     .resolver(StaticResolver::new())
//!     .sink(MemorySink::new())
//!     .build()?;
//!
//! let config = RunConfig::new()
//!     .target(ProviderTarget::new(Provider::Aws).account("111122223333").region("us-east-1"));
//! let result = scheduler.run(&config).await?;
//! println!("{} findings", result.findings_emitted);
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/posture-engine/0.4.0")]

mod cache;
mod cancel;
mod config;
mod context;
mod emit;
mod normalize;
mod registry;
mod result;
mod scheduler;
mod scope;
mod sink;

pub use cache::{CacheKey, CacheStats, RunCache};
pub use cancel::CancelSignal;
pub use config::*;
pub use context::{CheckContext, Credential, ExecutionScope};
pub use emit::FindingEmitter;
pub use normalize::{normalize, product_arn, DedupKey, DedupSet, Disposition, FindingOrigin, Normalizer, PRODUCT_NAME};
pub use posture_core::{CheckError, PostureError, Result};
pub use registry::{Check, CheckDescriptor, CheckRegistry, CheckRegistryBuilder, Parameters};
pub use result::{
    CheckOutcome, ExitStatus, NormalizationFailure, OutcomeStatus, RunResult, SkippedScope,
    StatusCounts,
};
pub use scheduler::{Scheduler, SchedulerBuilder};
pub use scope::{PlannedScope, ScopeExpander, ScopePlan, ScopeRejection, ScopeResolver, StaticResolver};
pub use sink::{ChannelSink, JsonLinesSink, MemorySink, OutputSink, SinkError};
