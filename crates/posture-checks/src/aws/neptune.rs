//! Neptune instance and cluster parameter group checks.

use super::{cached, NeptuneInstance, Parameter, CLUSTER_PARAMETER_GROUPS, NEPTUNE_INSTANCES};
use crate::control::{with_asset, Control, AWS_BEST_PRACTICES};
use async_trait::async_trait;
use posture_core::{Asset, CheckError, Provider, Resource, Severity};
use posture_engine::{CacheKey, Check, CheckContext, CheckRegistryBuilder, FindingEmitter, Result};
use tracing::debug;

const SERVICE: &str = "neptune";

/// Parameter that forces clients onto TLS
const ENFORCE_SSL: &str = "neptune_enforce_ssl";

/// Parameter that turns on audit logs
const ENABLE_AUDIT_LOG: &str = "neptune_enable_audit_log";

/// Instance-level Neptune controls
///
/// Neptune.1 to Neptune.3 differ only in the attribute they test, so they
/// share one implementation over the cached instance listing.
pub struct NeptuneInstanceCheck {
    name: &'static str,
    control: Control,
    passes: fn(&NeptuneInstance) -> bool,
    summary: &'static str,
}

impl NeptuneInstanceCheck {
    /// Neptune.1: instances should be Multi-AZ
    #[must_use]
    pub fn multi_az() -> Self {
        Self {
            name: "neptune_instance_multi_az_check",
            control: Control {
                slug: "neptune-instance-ha-check",
                title: "[Neptune.1] Neptune database instances should be configured to be highly available",
                severity: Severity::Low,
                finding_type: AWS_BEST_PRACTICES,
                remediation: "For more information on Neptune High Availability and how to configure it refer to the High Availability for Neptune section of the Amazon Neptune User Guide",
                url: "https://docs.aws.amazon.com/neptune/latest/userguide/feature-overview-availability.html",
                requirements: &[
                    "NIST CSF V1.1 ID.BE-5",
                    "NIST SP 800-53 Rev. 4 CP-2",
                    "AICPA TSC A1.2",
                    "ISO 27001:2013 A.17.2.1",
                ],
            },
            passes: |i| i.multi_az,
            summary: "configured for Multi-AZ high availability",
        }
    }

    /// Neptune.2: instance storage should be encrypted
    #[must_use]
    pub fn storage_encryption() -> Self {
        Self {
            name: "neptune_instance_storage_encryption_check",
            control: Control {
                slug: "neptune-instance-storage-encryption-check",
                title: "[Neptune.2] Neptune database instance storage should be encrypted",
                severity: Severity::High,
                finding_type: AWS_BEST_PRACTICES,
                remediation: "For more information on Neptune storage encryption and how to configure it refer to the Enabling Encryption for a Neptune DB Instance section of the Amazon Neptune User Guide",
                url: "https://docs.aws.amazon.com/neptune/latest/userguide/encrypt.html#encrypt-enable",
                requirements: &[
                    "NIST CSF V1.1 PR.DS-1",
                    "NIST SP 800-53 Rev. 4 SC-28",
                    "AICPA TSC CC6.1",
                    "ISO 27001:2013 A.8.2.3",
                ],
            },
            passes: |i| i.storage_encrypted,
            summary: "encrypted at rest",
        }
    }

    /// Neptune.3: instances should use IAM database authentication
    #[must_use]
    pub fn iam_authentication() -> Self {
        Self {
            name: "neptune_instance_iam_authentication_check",
            control: Control {
                slug: "neptune-instance-iam-db-auth-check",
                title: "[Neptune.3] Neptune database instances should use IAM Database Authentication",
                severity: Severity::Medium,
                finding_type: AWS_BEST_PRACTICES,
                remediation: "For more information on Neptune IAM Database Authentication and how to configure it refer to the Neptune Database Authentication Using IAM section of the Amazon Neptune User Guide",
                url: "https://docs.aws.amazon.com/neptune/latest/userguide/iam-auth.html",
                requirements: &[
                    "NIST CSF V1.1 PR.AC-6",
                    "NIST SP 800-53 Rev. 4 AC-2",
                    "AICPA TSC CC6.1",
                    "ISO 27001:2013 A.9.2.1",
                ],
            },
            passes: |i| i.iam_database_authentication_enabled,
            summary: "using IAM database authentication",
        }
    }
}

#[async_trait]
impl Check for NeptuneInstanceCheck {
    fn name(&self) -> &'static str {
        self.name
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn title(&self) -> &'static str {
        self.control.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        let instances = cached!(ctx, NEPTUNE_INSTANCES, describe_neptune_instances)?;

        for instance in instances.iter() {
            if instance.arn.is_empty() {
                return Err(CheckError::InvalidResource(format!(
                    "Neptune instance {} has no ARN",
                    instance.identifier
                )));
            }

            let passed = (self.passes)(instance);
            let description = if passed {
                format!("Neptune database instance {} is {}.", instance.identifier, self.summary)
            } else {
                format!(
                    "Neptune database instance {} is not {}. Refer to the remediation instructions if this configuration is not intended.",
                    instance.identifier, self.summary
                )
            };

            let resource = Resource::new("AwsNeptuneInstance", &instance.arn);
            let finding = self
                .control
                .finding(&instance.arn, resource, passed)
                .description(description);
            findings
                .emit(with_asset(
                    finding,
                    Asset::new("Database", "Amazon Neptune", "Database Instance"),
                    instance,
                ))
                .await;
        }

        Ok(())
    }
}

/// Cluster parameter group controls
///
/// Neptune.4 and Neptune.5 each read one parameter of every cluster parameter
/// group. Parameters are fetched per group and cached under the group name,
/// so a group is described once per scope however many of these checks run.
/// A group that does not carry the parameter yields no finding.
pub struct ClusterParameterCheck {
    name: &'static str,
    control: Control,
    parameter: &'static str,
    passing: &'static str,
    failing: &'static str,
}

impl ClusterParameterCheck {
    /// Neptune.4: cluster parameter groups should enforce SSL
    #[must_use]
    pub fn ssl_enforcement() -> Self {
        Self {
            name: "neptune_cluster_parameter_ssl_enforcement_check",
            control: Control {
                slug: "neptune-cluster-param-group-ssl-enforcement-check",
                title: "[Neptune.4] Neptune cluster parameter groups should enforce SSL connections to Neptune databases",
                severity: Severity::Medium,
                finding_type: AWS_BEST_PRACTICES,
                remediation: "For more information on enforcing SSL/HTTPS connections to Neptune instances refer to the Encryption in Transit: Connecting to Neptune Using SSL/HTTPS section of the Amazon Neptune User Guide.",
                url: "https://docs.aws.amazon.com/neptune/latest/userguide/security-ssl.html",
                requirements: &[
                    "NIST CSF V1.1 PR.DS-2",
                    "NIST SP 800-53 Rev. 4 SC-8",
                    "AICPA TSC CC6.7",
                    "ISO 27001:2013 A.13.2.3",
                ],
            },
            parameter: ENFORCE_SSL,
            passing: "enforces SSL connections",
            failing: "does not enforce SSL connections",
        }
    }

    /// Neptune.5: cluster parameter groups should turn on audit logging
    #[must_use]
    pub fn audit_logging() -> Self {
        Self {
            name: "neptune_cluster_parameter_audit_log_check",
            control: Control {
                slug: "neptune-cluster-param-group-audit-logging-check",
                title: "[Neptune.5] Neptune cluster parameter groups should enforce audit logging for Neptune databases",
                severity: Severity::Medium,
                finding_type: AWS_BEST_PRACTICES,
                remediation: "For more information on audit logging for Neptune instances refer to the Enabling Neptune Audit Logs section of the Amazon Neptune User Guide.",
                url: "https://docs.aws.amazon.com/neptune/latest/userguide/auditing.html#auditing-enable",
                requirements: &[
                    "NIST CSF V1.1 DE.AE-3",
                    "NIST SP 800-53 Rev. 4 AU-6",
                    "AICPA TSC CC7.2",
                    "ISO 27001:2013 A.12.4.1",
                ],
            },
            parameter: ENABLE_AUDIT_LOG,
            passing: "enables audit logging",
            failing: "does not enable audit logging",
        }
    }

    /// `None` when the group does not carry the parameter, otherwise whether it is on
    fn enabled(&self, parameters: &[Parameter]) -> Option<bool> {
        parameters
            .iter()
            .find(|p| p.parameter_name == self.parameter)
            .map(|p| p.parameter_value.as_deref() != Some("0"))
    }
}

#[async_trait]
impl Check for ClusterParameterCheck {
    fn name(&self) -> &'static str {
        self.name
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn title(&self) -> &'static str {
        self.control.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        let groups = cached!(ctx, CLUSTER_PARAMETER_GROUPS, describe_cluster_parameter_groups)?;

        for group in groups.iter() {
            let name = group.name.as_str();
            let parameters = cached!(ctx, parameters_key(name), describe_cluster_parameters, name)?;
            debug!(group = %group.name, parameters = parameters.len(), "described parameter group");
            let Some(passed) = self.enabled(&parameters) else {
                continue;
            };

            let description = if passed {
                format!("Neptune cluster parameter group {} {}.", group.name, self.passing)
            } else {
                format!(
                    "Neptune cluster parameter group {} {}. Refer to the remediation instructions if this configuration is not intended.",
                    group.name, self.failing
                )
            };

            let resource = Resource::new("AwsNeptuneParameterGroup", &group.arn);
            let finding = self
                .control
                .finding(&group.arn, resource, passed)
                .description(description);
            findings
                .emit(with_asset(
                    finding,
                    Asset::new("Database", "Amazon Neptune", "Cluster Parameter Group"),
                    group,
                ))
                .await;
        }

        Ok(())
    }
}

/// Cache key for one group's parameters
fn parameters_key(group: &str) -> CacheKey<Vec<Parameter>> {
    CacheKey::dynamic(format!("aws.neptune.describe_db_cluster_parameters/{group}"))
}

pub(super) fn register(registry: &mut CheckRegistryBuilder) -> Result<()> {
    registry
        .register(SERVICE, NeptuneInstanceCheck::multi_az())?
        .register(SERVICE, NeptuneInstanceCheck::storage_encryption())?
        .register(SERVICE, NeptuneInstanceCheck::iam_authentication())?
        .register(SERVICE, ClusterParameterCheck::ssl_enforcement())?
        .register(SERVICE, ClusterParameterCheck::audit_logging())?;
    Ok(())
}
