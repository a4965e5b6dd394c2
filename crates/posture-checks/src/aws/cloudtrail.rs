//! CloudTrail checks.
//!
//! All five share one `DescribeTrails` listing per scope. Shadow trails are
//! included, so a multi-region trail shows up in every region and the
//! normalizer keeps only the first copy.

use super::{cached, Trail, TRAILS};
use crate::control::{with_asset, Control, AWS_BEST_PRACTICES};
use async_trait::async_trait;
use posture_core::{Asset, CheckError, Provider, Resource, Severity};
use posture_engine::{Check, CheckContext, CheckRegistryBuilder, FindingEmitter, Result};
use tracing::warn;

const SERVICE: &str = "cloudtrail";

fn asset() -> Asset {
    Asset::new("Management & Governance", "AWS CloudTrail", "Trail")
}

/// Run `control` against every trail in the scope
async fn audit_trails<F>(
    ctx: &CheckContext,
    findings: &mut FindingEmitter,
    control: &Control,
    passes: F,
    summary: &str,
) -> std::result::Result<(), CheckError>
where
    F: Fn(&Trail) -> bool + Send + Sync,
{
    let trails = cached!(ctx, TRAILS, describe_trails)?;

    for trail in trails.iter() {
        if trail.trail_arn.is_empty() {
            warn!(trail = %trail.name, "trail has no ARN, skipping");
            continue;
        }

        let passed = passes(trail);
        let description = if passed {
            format!("CloudTrail trail {} {summary}.", trail.name)
        } else {
            format!(
                "CloudTrail trail {} does not meet the control: {summary}. Refer to the remediation instructions if this configuration is not intended.",
                trail.name
            )
        };

        let mut resource = Resource::new("AwsCloudTrailTrail", &trail.trail_arn);
        if let Some(home) = &trail.home_region {
            resource = resource.region(home);
        }

        let finding = control
            .finding(&trail.trail_arn, resource, passed)
            .description(description);
        findings.emit(with_asset(finding, asset(), trail)).await;
    }

    Ok(())
}

const MULTI_REGION: Control = Control {
    slug: "cloudtrail-multi-region-check",
    title: "[CloudTrail.1] AWS CloudTrail trails should be enabled in all Regions",
    severity: Severity::Medium,
    finding_type: AWS_BEST_PRACTICES,
    remediation: "If your trail should be multi-region refer to the Receiving CloudTrail Log Files from Multiple Regions section of the AWS CloudTrail User Guide",
    url: "https://docs.aws.amazon.com/awscloudtrail/latest/userguide/receive-cloudtrail-log-files-from-multiple-regions.html",
    requirements: &[
        "NIST CSF V1.1 DE.AE-3",
        "NIST CSF V1.1 DE.CM-1",
        "NIST SP 800-53 Rev. 4 AU-12",
        "AICPA TSC CC7.2",
        "ISO 27001:2013 A.12.4.1",
        "CIS Amazon Web Services Foundations Benchmark V1.5 3.1",
    ],
};

/// CloudTrail.1: trails should be multi-region
pub struct MultiRegionCheck;

#[async_trait]
impl Check for MultiRegionCheck {
    fn name(&self) -> &'static str {
        "cloudtrail_multi_region_check"
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn title(&self) -> &'static str {
        MULTI_REGION.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        audit_trails(ctx, findings, &MULTI_REGION, |t| t.is_multi_region_trail, "is a multi-region trail").await
    }
}

const CLOUDWATCH_LOGGING: Control = Control {
    slug: "cloudtrail-cloudwatch-logging-check",
    title: "[CloudTrail.2] AWS CloudTrail trails should have CloudWatch logging configured",
    severity: Severity::Medium,
    finding_type: AWS_BEST_PRACTICES,
    remediation: "If your trail should send logs to CloudWatch refer to the Monitoring CloudTrail Log Files with Amazon CloudWatch Logs section of the AWS CloudTrail User Guide",
    url: "https://docs.aws.amazon.com/awscloudtrail/latest/userguide/monitor-cloudtrail-log-files-with-cloudwatch-logs.html",
    requirements: &[
        "NIST CSF V1.1 DE.AE-3",
        "NIST SP 800-53 Rev. 4 AU-6",
        "AICPA TSC CC7.2",
        "ISO 27001:2013 A.12.4.1",
        "CIS Amazon Web Services Foundations Benchmark V1.5 3.4",
    ],
};

/// CloudTrail.2: trails should deliver to CloudWatch Logs
pub struct CloudWatchLoggingCheck;

#[async_trait]
impl Check for CloudWatchLoggingCheck {
    fn name(&self) -> &'static str {
        "cloudtrail_cloudwatch_logging_check"
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn title(&self) -> &'static str {
        CLOUDWATCH_LOGGING.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        audit_trails(
            ctx,
            findings,
            &CLOUDWATCH_LOGGING,
            |t| t.cloud_watch_logs_log_group_arn.is_some(),
            "delivers logs to CloudWatch Logs",
        )
        .await
    }
}

const KMS_ENCRYPTION: Control = Control {
    slug: "cloudtrail-logs-kms-cmk-encryption-check",
    title: "[CloudTrail.3] AWS CloudTrail trail logs should be encrypted by an AWS KMS Customer Managed Key (CMK)",
    severity: Severity::Medium,
    finding_type: AWS_BEST_PRACTICES,
    remediation: "If your trail should be encrypted with SSE-KMS refer to the Encrypting CloudTrail Log Files with AWS KMS Customer Managed Keys (SSE-KMS) section of the AWS CloudTrail User Guide",
    url: "https://docs.aws.amazon.com/awscloudtrail/latest/userguide/encrypting-cloudtrail-log-files-with-aws-kms.html",
    requirements: &[
        "NIST CSF V1.1 PR.DS-1",
        "NIST SP 800-53 Rev. 4 SC-28",
        "AICPA TSC CC6.1",
        "ISO 27001:2013 A.8.2.3",
        "CIS Amazon Web Services Foundations Benchmark V1.5 3.7",
    ],
};

/// CloudTrail.3: trail logs should be encrypted with a KMS key
pub struct KmsEncryptionCheck;

#[async_trait]
impl Check for KmsEncryptionCheck {
    fn name(&self) -> &'static str {
        "cloudtrail_logs_kms_cmk_encryption_check"
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn title(&self) -> &'static str {
        KMS_ENCRYPTION.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        audit_trails(
            ctx,
            findings,
            &KMS_ENCRYPTION,
            |t| t.kms_key_id.is_some(),
            "encrypts its logs with a KMS key",
        )
        .await
    }
}

const MANAGEMENT_EVENTS: Control = Control {
    slug: "cloudtrail-management-events-logging-check",
    title: "[CloudTrail.4] AWS CloudTrail trails should log management events",
    severity: Severity::Low,
    finding_type: AWS_BEST_PRACTICES,
    remediation: "If your trail should log management events refer to the Management Events section of the AWS CloudTrail User Guide",
    url: "https://docs.aws.amazon.com/awscloudtrail/latest/userguide/logging-management-events-with-cloudtrail.html#logging-management-events",
    requirements: &[
        "NIST CSF V1.1 DE.AE-3",
        "NIST SP 800-53 Rev. 4 AU-12",
        "AICPA TSC CC7.2",
        "ISO 27001:2013 A.12.4.1",
    ],
};

/// CloudTrail.4: trails should record global service events
pub struct ManagementEventsCheck;

#[async_trait]
impl Check for ManagementEventsCheck {
    fn name(&self) -> &'static str {
        "cloudtrail_management_event_logging_check"
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn title(&self) -> &'static str {
        MANAGEMENT_EVENTS.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        audit_trails(
            ctx,
            findings,
            &MANAGEMENT_EVENTS,
            |t| t.include_global_service_events,
            "logs management events",
        )
        .await
    }
}

const LOG_FILE_VALIDATION: Control = Control {
    slug: "cloudtrail-log-file-validation-check",
    title: "[CloudTrail.5] AWS CloudTrail log file validation should be enabled",
    severity: Severity::Medium,
    finding_type: AWS_BEST_PRACTICES,
    remediation: "If your trail should have log file validation enabled refer to the Validating CloudTrail Log File Integrity section of the AWS CloudTrail User Guide",
    url: "https://docs.aws.amazon.com/awscloudtrail/latest/userguide/cloudtrail-log-file-validation-intro.html",
    requirements: &[
        "NIST CSF V1.1 PR.DS-6",
        "NIST SP 800-53 Rev. 4 SI-7",
        "AICPA TSC CC7.1",
        "ISO 27001:2013 A.12.4.2",
        "CIS Amazon Web Services Foundations Benchmark V1.5 3.2",
    ],
};

/// CloudTrail.5: log file integrity validation should be enabled
pub struct LogFileValidationCheck;

#[async_trait]
impl Check for LogFileValidationCheck {
    fn name(&self) -> &'static str {
        "cloudtrail_log_file_validation_check"
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn title(&self) -> &'static str {
        LOG_FILE_VALIDATION.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        audit_trails(
            ctx,
            findings,
            &LOG_FILE_VALIDATION,
            |t| t.log_file_validation_enabled,
            "has log file validation enabled",
        )
        .await
    }
}

pub(super) fn register(registry: &mut CheckRegistryBuilder) -> Result<()> {
    registry
        .register(SERVICE, MultiRegionCheck)?
        .register(SERVICE, CloudWatchLoggingCheck)?
        .register(SERVICE, KmsEncryptionCheck)?
        .register(SERVICE, ManagementEventsCheck)?
        .register(SERVICE, LogFileValidationCheck)?;
    Ok(())
}
