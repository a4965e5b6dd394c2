use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version stamped on every normalized finding
pub const SCHEMA_VERSION: &str = "2018-10-08";

/// Default finding type for configuration checks
pub const DEFAULT_FINDING_TYPE: &str = "Software and Configuration Checks";

/// Severity label of a finding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// No issue, informational only
    #[default]
    Informational,
    /// Low impact
    Low,
    /// Medium impact
    Medium,
    /// High impact
    High,
    /// Critical impact
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Informational => write!(f, "INFORMATIONAL"),
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Outcome of evaluating one resource against one control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    /// Resource satisfies the control
    Passed,
    /// Resource violates the control
    Failed,
    /// Control could not be fully evaluated
    Warning,
    /// Control does not apply or data was unavailable
    NotAvailable,
}

impl ComplianceStatus {
    /// Workflow status paired with this compliance status
    #[must_use]
    pub const fn workflow_status(&self) -> WorkflowStatus {
        match self {
            Self::Passed => WorkflowStatus::Resolved,
            Self::Failed | Self::Warning | Self::NotAvailable => WorkflowStatus::New,
        }
    }

    /// Record state paired with this compliance status
    #[must_use]
    pub const fn record_state(&self) -> RecordState {
        match self {
            Self::Passed => RecordState::Archived,
            Self::Failed | Self::Warning | Self::NotAvailable => RecordState::Active,
        }
    }
}

impl std::fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "PASSED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Warning => write!(f, "WARNING"),
            Self::NotAvailable => write!(f, "NOT_AVAILABLE"),
        }
    }
}

/// Triage state of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Open finding
    New,
    /// Finding no longer applies
    Resolved,
}

/// Whether a finding is live or archived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    /// Live finding
    Active,
    /// Archived finding
    Archived,
}

/// Resource a finding refers to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    /// Resource type (e.g. `AwsCloudTrailTrail`)
    #[serde(rename = "Type")]
    pub resource_type: String,

    /// Provider-scoped resource identifier (ARN, Azure resource id)
    pub id: String,

    /// Partition, filled from the scope when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,

    /// Region, filled from the scope when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Type-specific resource details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Resource {
    /// Create a resource reference
    #[must_use]
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            partition: None,
            region: None,
            details: None,
        }
    }

    /// Set the region explicitly (for resources living outside the scope region)
    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Attach type-specific details
    #[must_use]
    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Remediation guidance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Remediation {
    /// Recommended action
    pub recommendation: Recommendation,
}

/// Recommendation text and documentation link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Recommendation {
    /// What to do
    pub text: String,

    /// Where to read more
    pub url: String,
}

/// Asset classification of the audited resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Broad asset class (e.g. `Compute`, `Management & Governance`)
    pub class: String,
    /// Provider service name (e.g. `AWS CloudTrail`)
    pub service: String,
    /// Component within the service (e.g. `Trail`)
    pub component: String,
}

impl Asset {
    /// Create an asset classification
    #[must_use]
    pub fn new(
        class: impl Into<String>,
        service: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        Self {
            class: class.into(),
            service: service.into(),
            component: component.into(),
        }
    }
}

/// A finding as produced by a check, before validation.
///
/// Every field is optional so that malformed output can be represented and
/// rejected by the normalizer rather than failing the check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFinding {
    /// Provider-scoped finding identity
    #[serde(default)]
    pub id: Option<String>,

    /// Compliance status
    #[serde(default)]
    pub status: Option<ComplianceStatus>,

    /// Severity label
    #[serde(default)]
    pub severity: Option<Severity>,

    /// Audited resource
    #[serde(default)]
    pub resource: Option<Resource>,

    /// Control title
    #[serde(default)]
    pub title: Option<String>,

    /// Resource-specific description
    #[serde(default)]
    pub description: Option<String>,

    /// Remediation guidance
    #[serde(default)]
    pub remediation: Option<Remediation>,

    /// Finding types
    #[serde(default)]
    pub types: Vec<String>,

    /// Compliance framework controls this check maps to
    #[serde(default)]
    pub related_requirements: Vec<String>,

    /// Asset classification
    #[serde(default)]
    pub asset: Option<Asset>,

    /// Raw resource snapshot, encoded into the product fields
    #[serde(default)]
    pub asset_details: Option<Value>,

    /// When the resource was observed; filled by the normalizer when absent
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,

    /// Run identifier; filled by the normalizer when absent
    #[serde(default)]
    pub run_id: Option<String>,
}

impl RawFinding {
    /// Start a finding with the given identity
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Set the compliance status
    #[must_use]
    pub fn status(mut self, status: ComplianceStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the severity
    #[must_use]
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Set the audited resource
    #[must_use]
    pub fn resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Set the title
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the description
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set remediation guidance
    #[must_use]
    pub fn remediation(mut self, text: impl Into<String>, url: impl Into<String>) -> Self {
        self.remediation = Some(Remediation {
            recommendation: Recommendation {
                text: text.into(),
                url: url.into(),
            },
        });
        self
    }

    /// Add a finding type
    #[must_use]
    pub fn finding_type(mut self, finding_type: impl Into<String>) -> Self {
        self.types.push(finding_type.into());
        self
    }

    /// Add related compliance requirements
    #[must_use]
    pub fn requirements<I, S>(mut self, requirements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related_requirements
            .extend(requirements.into_iter().map(Into::into));
        self
    }

    /// Set the asset classification
    #[must_use]
    pub fn asset(mut self, asset: Asset) -> Self {
        self.asset = Some(asset);
        self
    }

    /// Attach the raw resource snapshot
    #[must_use]
    pub fn asset_details(mut self, details: Value) -> Self {
        self.asset_details = Some(details);
        self
    }

    /// Set the observation timestamp
    #[must_use]
    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = Some(at);
        self
    }
}

/// Severity wrapper matching the `{"Label": ...}` wire shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SeverityInfo {
    /// Severity label
    pub label: Severity,
}

/// Compliance block of a normalized finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Compliance {
    /// Compliance status
    pub status: ComplianceStatus,

    /// Related framework controls
    #[serde(default)]
    pub related_requirements: Vec<String>,
}

/// Workflow block of a normalized finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Workflow {
    /// Workflow status
    pub status: WorkflowStatus,
}

/// Product metadata attached to every normalized finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProductFields {
    /// Producing tool
    pub product_name: String,

    /// Provider display name
    pub provider: String,

    /// Provider type (always `CSP` for cloud checks)
    pub provider_type: String,

    /// Account, subscription or project the resource belongs to
    pub provider_account_id: String,

    /// Region the resource was audited in
    pub asset_region: String,

    /// Base64-encoded JSON snapshot of the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_details: Option<String>,

    /// Asset class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_class: Option<String>,

    /// Asset service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_service: Option<String>,

    /// Asset component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_component: Option<String>,

    /// Service the producing check is registered under
    pub service: String,

    /// Name of the producing check
    pub check: String,

    /// Run that produced the finding
    pub run_id: String,
}

/// A validated finding ready for output.
///
/// Unique per (check, finding id, resource id) within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NormalizedFinding {
    /// Finding schema version
    pub schema_version: String,

    /// Provider-scoped finding identity
    pub id: String,

    /// Product identity for the scope
    pub product_arn: String,

    /// Generator (`service/check`)
    pub generator_id: String,

    /// Account, subscription or project id
    pub account_id: String,

    /// Finding types
    pub types: Vec<String>,

    /// First observation time
    pub first_observed_at: DateTime<Utc>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last update time
    pub updated_at: DateTime<Utc>,

    /// Severity
    pub severity: SeverityInfo,

    /// Confidence score (0-100)
    pub confidence: u8,

    /// Control title
    pub title: String,

    /// Resource-specific description
    pub description: String,

    /// Remediation guidance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<Remediation>,

    /// Product metadata
    pub product_fields: ProductFields,

    /// Audited resources
    pub resources: Vec<Resource>,

    /// Compliance evaluation
    pub compliance: Compliance,

    /// Workflow state
    pub workflow: Workflow,

    /// Record state
    pub record_state: RecordState,
}

impl NormalizedFinding {
    /// Compliance status
    #[must_use]
    pub const fn status(&self) -> ComplianceStatus {
        self.compliance.status
    }

    /// Severity label
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity.label
    }

    /// Id of the primary resource
    #[must_use]
    pub fn resource_id(&self) -> &str {
        self.resources.first().map_or("", |r| r.id.as_str())
    }

    /// Name of the producing check
    #[must_use]
    pub fn check(&self) -> &str {
        &self.product_fields.check
    }

    /// Returns true if the resource failed the control
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.compliance.status == ComplianceStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_pairing() {
        assert_eq!(ComplianceStatus::Passed.workflow_status(), WorkflowStatus::Resolved);
        assert_eq!(ComplianceStatus::Passed.record_state(), RecordState::Archived);
        assert_eq!(ComplianceStatus::Failed.workflow_status(), WorkflowStatus::New);
        assert_eq!(ComplianceStatus::Failed.record_state(), RecordState::Active);
    }

    #[test]
    fn test_wire_labels() {
        assert_eq!(
            serde_json::to_string(&Severity::Informational).unwrap(),
            "\"INFORMATIONAL\""
        );
        assert_eq!(
            serde_json::to_string(&ComplianceStatus::NotAvailable).unwrap(),
            "\"NOT_AVAILABLE\""
        );
        let resource = Resource::new("AwsEc2Instance", "i-0abc");
        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["Type"], "AwsEc2Instance");
        assert_eq!(json["Id"], "i-0abc");
        assert!(json.get("Region").is_none());
    }

    #[test]
    fn test_builder() {
        let finding = RawFinding::new("arn:aws:ec2:us-east-1:111:instance/i-1/ec2-imdsv2-check")
            .status(ComplianceStatus::Failed)
            .severity(Severity::Medium)
            .resource(Resource::new("AwsEc2Instance", "arn:aws:ec2:us-east-1:111:instance/i-1"))
            .requirements(["NIST CSF V1.1 PR.AC-4", "AICPA TSC CC6.3"])
            .remediation("Require IMDSv2", "https://docs.aws.amazon.com/");

        assert_eq!(finding.status, Some(ComplianceStatus::Failed));
        assert_eq!(finding.related_requirements.len(), 2);
        assert!(finding.run_id.is_none());
        assert_eq!(
            finding.remediation.unwrap().recommendation.text,
            "Require IMDSv2"
        );
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Informational);
    }
}
