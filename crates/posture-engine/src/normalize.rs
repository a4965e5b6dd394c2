//! Finding validation, enrichment and run-wide deduplication.

use crate::result::RunRecorder;
use crate::sink::OutputSink;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use posture_core::{
    Compliance, NormalizationError, NormalizedFinding, ProductFields, Provider, RawFinding,
    Scope, SeverityInfo, Workflow, DEFAULT_FINDING_TYPE, SCHEMA_VERSION,
};
use std::collections::hash_map::RandomState;
use std::collections::HashSet;
use std::hash::BuildHasher;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Product name written into every finding
pub const PRODUCT_NAME: &str = "Posture";

/// Confidence assigned to findings produced by configuration checks
const CONFIDENCE: u8 = 99;

const DEDUP_SHARDS: usize = 16;

/// Where a raw finding came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingOrigin {
    /// Scope the check ran in
    pub scope: Scope,
    /// Service the check is registered under
    pub service: String,
    /// Check name
    pub check: String,
    /// Default title for findings that carry none
    pub title: String,
}

impl FindingOrigin {
    /// `service/check`
    #[must_use]
    pub fn generator_id(&self) -> String {
        format!("{}/{}", self.service, self.check)
    }
}

/// Identity used to detect duplicate findings within a run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    generator: String,
    finding_id: String,
    resource_id: String,
}

impl DedupKey {
    /// Key for a normalized finding
    #[must_use]
    pub fn of(finding: &NormalizedFinding) -> Self {
        Self {
            generator: finding.generator_id.clone(),
            finding_id: finding.id.clone(),
            resource_id: finding.resource_id().to_string(),
        }
    }
}

/// Concurrent seen-set, sharded so that workers rarely contend
#[derive(Debug)]
pub struct DedupSet {
    shards: Vec<Mutex<HashSet<DedupKey>>>,
    hasher: RandomState,
}

impl Default for DedupSet {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..DEDUP_SHARDS).map(|_| Mutex::default()).collect(),
            hasher: RandomState::new(),
        }
    }

    /// Insert the key; returns false if it was already present
    pub fn insert(&self, key: DedupKey) -> bool {
        self.shard(&key)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key)
    }

    fn shard(&self, key: &DedupKey) -> &Mutex<HashSet<DedupKey>> {
        // Truncation is fine, only the low bits pick a shard.
        #[allow(clippy::cast_possible_truncation)]
        let index = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[index]
    }

    /// Remove a key; returns true if it was present
    pub fn remove(&self, key: &DedupKey) -> bool {
        self.shard(key)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Number of distinct keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Returns true if no key has been inserted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A dedup key held until the sink confirms delivery
///
/// Dropping it unconfirmed (the sink failed, or the submitting future was
/// cancelled mid-delivery) releases the key so the finding is not counted as
/// seen.
struct Reservation<'a> {
    seen: &'a DedupSet,
    key: Option<DedupKey>,
}

impl<'a> Reservation<'a> {
    fn take(seen: &'a DedupSet, key: DedupKey) -> Option<Self> {
        seen.insert(key.clone()).then_some(Self {
            seen,
            key: Some(key),
        })
    }

    fn confirm(mut self) {
        self.key = None;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.seen.remove(&key);
        }
    }
}

/// What happened to a submitted raw finding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Delivered to the sink
    Emitted,
    /// Dropped as a duplicate
    Duplicate,
    /// Failed validation
    Rejected(NormalizationError),
    /// Valid, but the sink refused it
    SinkFailed,
}

/// Validate a raw finding and fill in system-assigned fields.
///
/// Id, status and a resource with a non-empty id are required. Severity
/// defaults to informational, title to the check title and the resource
/// region/partition to the scope's.
pub fn normalize(
    raw: RawFinding,
    origin: &FindingOrigin,
    run_id: &str,
) -> Result<NormalizedFinding, NormalizationError> {
    let id = raw
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or(NormalizationError::MissingId)?;
    let status = raw.status.ok_or(NormalizationError::MissingStatus)?;
    let mut resource = raw
        .resource
        .filter(|r| !r.id.trim().is_empty())
        .ok_or(NormalizationError::MissingResource)?;

    let scope = &origin.scope;
    resource
        .partition
        .get_or_insert_with(|| scope.partition.clone());
    resource.region.get_or_insert_with(|| scope.region.clone());

    let now = Utc::now();
    let observed = raw.observed_at.unwrap_or(now);
    let title = raw.title.unwrap_or_else(|| origin.title.clone());
    let types = if raw.types.is_empty() {
        vec![DEFAULT_FINDING_TYPE.to_string()]
    } else {
        raw.types
    };
    let asset_details = raw
        .asset_details
        .and_then(|details| serde_json::to_vec(&details).ok())
        .map(|bytes| STANDARD.encode(bytes));
    let (asset_class, asset_service, asset_component) = match raw.asset {
        Some(asset) => (Some(asset.class), Some(asset.service), Some(asset.component)),
        None => (None, None, None),
    };

    Ok(NormalizedFinding {
        schema_version: SCHEMA_VERSION.to_string(),
        id,
        product_arn: product_arn(scope),
        generator_id: origin.generator_id(),
        account_id: scope.account_id.clone(),
        types,
        first_observed_at: observed,
        created_at: observed,
        updated_at: now,
        severity: SeverityInfo {
            label: raw.severity.unwrap_or_default(),
        },
        confidence: CONFIDENCE,
        description: raw.description.unwrap_or_else(|| title.clone()),
        title,
        remediation: raw.remediation,
        product_fields: ProductFields {
            product_name: PRODUCT_NAME.to_string(),
            provider: scope.provider.display_name().to_string(),
            provider_type: "CSP".to_string(),
            provider_account_id: scope.account_id.clone(),
            asset_region: resource.region.clone().unwrap_or_default(),
            asset_details,
            asset_class,
            asset_service,
            asset_component,
            service: origin.service.clone(),
            check: origin.check.clone(),
            run_id: raw.run_id.unwrap_or_else(|| run_id.to_string()),
        },
        resources: vec![resource],
        compliance: Compliance {
            status,
            related_requirements: raw.related_requirements,
        },
        workflow: Workflow {
            status: status.workflow_status(),
        },
        record_state: status.record_state(),
    })
}

/// Product identity for findings produced in a scope
#[must_use]
pub fn product_arn(scope: &Scope) -> String {
    match scope.provider {
        Provider::Aws => format!(
            "arn:{}:securityhub:{}:{}:product/{}/default",
            scope.partition, scope.region, scope.account_id, scope.account_id
        ),
        Provider::Azure | Provider::Gcp => format!(
            "{}:{}:{}:product/{}/default",
            scope.provider, scope.partition, scope.account_id, PRODUCT_NAME.to_lowercase()
        ),
    }
}

/// Validates, deduplicates and forwards findings from every running check
pub struct Normalizer {
    run_id: String,
    seen: DedupSet,
    sink: Arc<dyn OutputSink>,
    recorder: Arc<RunRecorder>,
}

impl Normalizer {
    pub(crate) fn new(sink: Arc<dyn OutputSink>, recorder: Arc<RunRecorder>) -> Self {
        Self {
            run_id: recorder.run_id().to_string(),
            seen: DedupSet::new(),
            sink,
            recorder,
        }
    }

    /// Run identifier stamped on findings
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Normalize one raw finding and hand it to the sink unless it was seen before
    pub async fn submit(&self, origin: &FindingOrigin, raw: RawFinding) -> Disposition {
        let raw_id = raw.id.clone();
        let finding = match normalize(raw, origin, &self.run_id) {
            Ok(finding) => finding,
            Err(e) => {
                warn!(
                    scope = %origin.scope,
                    check = %origin.check,
                    finding = raw_id.as_deref().unwrap_or(""),
                    error = %e,
                    "rejected malformed finding"
                );
                self.recorder
                    .rejected(&origin.scope, &origin.generator_id(), raw_id, e);
                return Disposition::Rejected(e);
            }
        };

        let Some(reservation) = Reservation::take(&self.seen, DedupKey::of(&finding)) else {
            warn!(
                scope = %origin.scope,
                check = %origin.check,
                finding = %finding.id,
                resource = finding.resource_id(),
                "duplicate finding discarded"
            );
            self.recorder.duplicate();
            return Disposition::Duplicate;
        };

        let status = finding.status();
        debug!(check = %origin.check, finding = %finding.id, %status, "emitting finding");
        match self.sink.accept(finding).await {
            Ok(()) => {
                reservation.confirm();
                self.recorder.emitted(status);
                Disposition::Emitted
            }
            Err(e) => {
                drop(reservation);
                warn!(check = %origin.check, error = %e, "sink refused finding");
                self.recorder.sink_failed();
                Disposition::SinkFailed
            }
        }
    }
}
