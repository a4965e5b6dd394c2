//! EC2 instance checks.

use super::{cached, Instance, INSTANCES};
use crate::control::{with_asset, Control, AWS_BEST_PRACTICES};
use async_trait::async_trait;
use posture_core::{Asset, CheckError, Provider, Resource, Severity};
use posture_engine::{Check, CheckContext, CheckRegistryBuilder, FindingEmitter, Result};
use serde_json::json;

const SERVICE: &str = "ec2";

fn resource(ctx: &CheckContext, instance: &Instance) -> (String, Resource) {
    let arn = instance.arn(ctx.scope());
    let resource = Resource::new("AwsEc2Instance", &arn).details(json!({
        "AwsEc2Instance": {
            "Type": instance.instance_type,
            "ImageId": instance.image_id,
        }
    }));
    (arn, resource)
}

fn asset() -> Asset {
    Asset::new("Compute", "Amazon EC2", "Instance")
}

const IMDS_V2: Control = Control {
    slug: "ec2-imdsv2-check",
    title: "[EC2.1] EC2 Instances should be configured to use instance metadata service V2 (IMDSv2)",
    severity: Severity::Medium,
    finding_type: AWS_BEST_PRACTICES,
    remediation: "To learn how to configure IMDSv2 refer to the Transitioning to Using Instance Metadata Service Version 2 section of the Amazon EC2 User Guide",
    url: "https://docs.aws.amazon.com/AWSEC2/latest/UserGuide/configuring-instance-metadata-service.html#instance-metadata-transition-to-version-2",
    requirements: &[
        "NIST CSF V1.1 PR.AC-4",
        "NIST SP 800-53 Rev. 4 AC-3",
        "AICPA TSC CC6.1",
        "ISO 27001:2013 A.9.4.1",
    ],
};

/// EC2.1: the metadata service must require session tokens when enabled
pub struct ImdsV2Check;

impl ImdsV2Check {
    fn passes(instance: &Instance) -> bool {
        instance.metadata_options.as_ref().map_or(true, |options| {
            options.http_endpoint != "enabled" || options.http_tokens == "required"
        })
    }
}

#[async_trait]
impl Check for ImdsV2Check {
    fn name(&self) -> &'static str {
        "ec2_imdsv2_check"
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn title(&self) -> &'static str {
        IMDS_V2.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        let instances = cached!(ctx, INSTANCES, describe_instances)?;

        for instance in instances.iter().filter(|i| i.is_auditable()) {
            if instance.instance_id.is_empty() {
                return Err(CheckError::InvalidResource(
                    "DescribeInstances returned an instance without an id".into(),
                ));
            }

            let passed = Self::passes(instance);
            let description = if passed {
                format!(
                    "EC2 Instance {} is using Instance Metadata Service Version 2 (IMDSv2) or has the metadata endpoint disabled.",
                    instance.instance_id
                )
            } else {
                format!(
                    "EC2 Instance {} is not configured to use Instance Metadata Service Version 2 (IMDSv2). IMDSv2 adds session authentication to every metadata request. Refer to the remediation instructions if this configuration is not intended.",
                    instance.instance_id
                )
            };

            let (arn, resource) = resource(ctx, instance);
            let finding = IMDS_V2.finding(&arn, resource, passed).description(description);
            findings.emit(with_asset(finding, asset(), instance)).await;
        }

        Ok(())
    }
}

const SECURE_ENCLAVE: Control = Control {
    slug: "ec2-enclave-check",
    title: "[EC2.2] EC2 Instances should be configured to use Secure Enclaves",
    severity: Severity::Medium,
    finding_type: AWS_BEST_PRACTICES,
    remediation: "To learn how to configure Secure Enclaves refer to the Getting started: Hello enclave section of the AWS Nitro Enclaves User Guide",
    url: "https://docs.aws.amazon.com/enclaves/latest/user/getting-started.html",
    requirements: &[
        "NIST CSF V1.1 PR.DS-1",
        "NIST SP 800-53 Rev. 4 SC-28",
        "AICPA TSC CC6.1",
        "ISO 27001:2013 A.8.2.3",
    ],
};

/// EC2.2: instances should run with Nitro Enclaves enabled
pub struct SecureEnclaveCheck;

#[async_trait]
impl Check for SecureEnclaveCheck {
    fn name(&self) -> &'static str {
        "ec2_secure_enclave_check"
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn title(&self) -> &'static str {
        SECURE_ENCLAVE.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        let instances = cached!(ctx, INSTANCES, describe_instances)?;

        for instance in instances.iter().filter(|i| i.is_auditable()) {
            if instance.instance_id.is_empty() {
                return Err(CheckError::InvalidResource(
                    "DescribeInstances returned an instance without an id".into(),
                ));
            }

            let passed = instance.enclave_options.enabled;
            let description = if passed {
                format!("EC2 Instance {} is configured to use a Secure Enclave.", instance.instance_id)
            } else {
                format!(
                    "EC2 Instance {} is not configured to use a Secure Enclave. Refer to the remediation instructions if this configuration is not intended.",
                    instance.instance_id
                )
            };

            let (arn, resource) = resource(ctx, instance);
            let finding = SECURE_ENCLAVE
                .finding(&arn, resource, passed)
                .description(description);
            findings.emit(with_asset(finding, asset(), instance)).await;
        }

        Ok(())
    }
}

pub(super) fn register(registry: &mut CheckRegistryBuilder) -> Result<()> {
    registry
        .register(SERVICE, ImdsV2Check)?
        .register(SERVICE, SecureEnclaveCheck)?;
    Ok(())
}
