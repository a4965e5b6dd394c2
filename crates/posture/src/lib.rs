//! Concurrent cloud security posture auditing.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use posture::{checks, MemorySink, Provider, ProviderTarget, RunConfig, Scheduler};
//!
//! #[tokio::main]
//! async fn main() -> posture::Result<()> {
//!     let inventory = checks::Inventory::from_path("inventory.json")?;
//!
//!     let scheduler = Scheduler::builder(checks::registry()?)
//!         .resolver(checks::InventoryResolver::new(inventory))
//!         .sink(MemorySink::new())
//!         .build()?;
//!
//!     let config = RunConfig::new()
//!         .target(ProviderTarget::new(Provider::Aws).account("111122223333").all_regions());
//!
//!     let result = scheduler.run(&config).await?;
//!     println!("{} findings, {} check errors", result.findings_emitted, result.check_errors().count());
//!     std::process::exit(result.exit_status().code());
//! }
//! ```
//!
//! # Features
//!
//! - `default` - AWS and Azure checks
//! - `aws` - AWS check library
//! - `azure` - Azure check library

#![doc(html_root_url = "https://docs.rs/posture/0.4.0")]

// Re-export core types
pub use posture_core::*;

// Re-export the engine
pub use posture_engine::{
    normalize, product_arn, CacheKey, CacheStats, CancelSignal, ChannelSink, Check, CheckContext,
    CheckDescriptor, CheckFilter, CheckOutcome, CheckRegistry, CheckRegistryBuilder, Credential,
    DedupKey, DedupSet, Disposition, ExecutionScope, ExitStatus, FindingEmitter, FindingOrigin,
    JsonLinesSink, MemorySink, NormalizationFailure, Normalizer, OutcomeStatus, OutputSink,
    Parameters, PlannedScope, ProviderTarget, RegionSelection, RunCache, RunConfig, RunResult,
    Scheduler, SchedulerBuilder, ScopeExpander, ScopePlan, ScopeRejection, ScopeResolver,
    SinkError, SkippedScope, StaticResolver, StatusCounts, PRODUCT_NAME,
};

// Check library
pub use posture_checks as checks;

// Re-export runtime for convenience
pub use serde;
pub use serde_json;
pub use tokio;
