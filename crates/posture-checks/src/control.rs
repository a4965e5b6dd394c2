//! Static control metadata shared by the passing and failing findings of a check.

use posture_core::{Asset, ComplianceStatus, RawFinding, Resource, Severity};
use serde::Serialize;
use serde_json::Value;

/// Finding type used by the AWS checks
pub(crate) const AWS_BEST_PRACTICES: &str =
    "Software and Configuration Checks/AWS Security Best Practices";

/// Finding type used by the Azure checks
pub(crate) const CONFIGURATION_CHECKS: &str = "Software and Configuration Checks";

/// Everything about a control that does not depend on the audited resource
#[derive(Debug)]
pub(crate) struct Control {
    /// Suffix appended to the resource id to form the finding id
    pub slug: &'static str,
    /// Finding title, prefixed with the control number
    pub title: &'static str,
    /// Severity of a failing finding; passing findings are informational
    pub severity: Severity,
    /// Finding type
    pub finding_type: &'static str,
    /// Remediation text
    pub remediation: &'static str,
    /// Remediation documentation link
    pub url: &'static str,
    /// Related framework controls
    pub requirements: &'static [&'static str],
}

impl Control {
    /// Start a finding for `resource`, identified as `{finding_prefix}/{slug}`
    pub fn finding(&self, finding_prefix: &str, resource: Resource, passed: bool) -> RawFinding {
        let (status, severity) = if passed {
            (ComplianceStatus::Passed, Severity::Informational)
        } else {
            (ComplianceStatus::Failed, self.severity)
        };

        RawFinding::new(format!("{finding_prefix}/{}", self.slug))
            .status(status)
            .severity(severity)
            .title(self.title)
            .remediation(self.remediation, self.url)
            .finding_type(self.finding_type)
            .requirements(self.requirements.iter().copied())
            .resource(resource)
    }
}

/// Attach an asset classification and the serialized resource to a finding
pub(crate) fn with_asset<T: Serialize>(finding: RawFinding, asset: Asset, record: &T) -> RawFinding {
    let finding = finding.asset(asset);
    match serde_json::to_value(record) {
        Ok(Value::Null) | Err(_) => finding,
        Ok(details) => finding.asset_details(details),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: Control = Control {
        slug: "sample-check",
        title: "[Sample.1] Samples should pass",
        severity: Severity::High,
        finding_type: CONFIGURATION_CHECKS,
        remediation: "Fix the sample",
        url: "https://example.com/sample",
        requirements: &["NIST CSF V1.1 PR.DS-1"],
    };

    #[test]
    fn test_failed_finding_uses_control_severity() {
        let finding = SAMPLE.finding("arn:x", Resource::new("Other", "arn:x"), false);
        assert_eq!(finding.id.as_deref(), Some("arn:x/sample-check"));
        assert_eq!(finding.status, Some(ComplianceStatus::Failed));
        assert_eq!(finding.severity, Some(Severity::High));
        assert_eq!(finding.related_requirements, ["NIST CSF V1.1 PR.DS-1"]);
    }

    #[test]
    fn test_passed_finding_is_informational() {
        let finding = SAMPLE.finding("arn:x", Resource::new("Other", "arn:x"), true);
        assert_eq!(finding.status, Some(ComplianceStatus::Passed));
        assert_eq!(finding.severity, Some(Severity::Informational));
    }

    #[test]
    fn test_with_asset_serializes_record() {
        let finding = with_asset(
            RawFinding::new("x"),
            Asset::new("Compute", "Sample", "Thing"),
            &serde_json::json!({"Name": "thing"}),
        );
        assert_eq!(finding.asset_details, Some(serde_json::json!({"Name": "thing"})));
        assert_eq!(finding.asset.map(|a| a.component), Some("Thing".to_string()));
    }
}
