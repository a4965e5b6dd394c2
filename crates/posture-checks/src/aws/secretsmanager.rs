//! Secrets Manager checks.

use super::{cached, Secret, SECRETS};
use crate::control::{with_asset, Control, AWS_BEST_PRACTICES};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use posture_core::{Asset, CheckError, Provider, Resource, Severity};
use posture_engine::{Check, CheckContext, CheckRegistryBuilder, FindingEmitter, Result};

const SERVICE: &str = "secretsmanager";

/// Secrets unchanged for this many days should have been rotated
pub const MAX_SECRET_AGE_DAYS: i64 = 90;

fn asset() -> Asset {
    Asset::new("Security Services", "AWS Secrets Manager", "Secret")
}

const SECRET_AGE: Control = Control {
    slug: "secrets-manager-age-check",
    title: "[SecretsManager.1] Secrets over 90 days old should be rotated",
    severity: Severity::Medium,
    finding_type: AWS_BEST_PRACTICES,
    remediation: "For more information on Secret Rotation refer to the Rotating Your AWS Secrets Manager Secrets section of the AWS Secrets Manager User Guide",
    url: "https://docs.aws.amazon.com/secretsmanager/latest/userguide/rotating-secrets.html",
    requirements: &[
        "NIST CSF V1.1 PR.AC-1",
        "NIST SP 800-53 Rev. 4 IA-5",
        "AICPA TSC CC6.1",
        "ISO 27001:2013 A.9.4.3",
    ],
};

/// SecretsManager.1: secrets should have changed within the last 90 days
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretAgeCheck {
    now: Option<DateTime<Utc>>,
}

impl SecretAgeCheck {
    /// Evaluate ages against a fixed instant instead of the wall clock
    #[must_use]
    pub const fn at(now: DateTime<Utc>) -> Self {
        Self { now: Some(now) }
    }

    /// When the secret last changed, falling back to its creation date
    fn last_changed(secret: &Secret) -> std::result::Result<DateTime<Utc>, CheckError> {
        secret
            .last_changed_date
            .or(secret.created_date)
            .ok_or_else(|| {
                CheckError::InvalidResource(format!("secret {} has no change or creation date", secret.name))
            })
    }
}

#[async_trait]
impl Check for SecretAgeCheck {
    fn name(&self) -> &'static str {
        "secretsmanager_secret_age_check"
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn title(&self) -> &'static str {
        SECRET_AGE.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        let secrets = cached!(ctx, SECRETS, list_secrets)?;
        let now = self.now.unwrap_or_else(Utc::now);

        for secret in secrets.iter() {
            let age = now - Self::last_changed(secret)?;
            let passed = age < Duration::days(MAX_SECRET_AGE_DAYS);
            let description = if passed {
                format!("Secret {} was changed {} days ago.", secret.name, age.num_days())
            } else {
                format!(
                    "Secret {} is over {MAX_SECRET_AGE_DAYS} days old and should be rotated. Refer to the remediation instructions if this configuration is not intended.",
                    secret.name
                )
            };

            let finding = SECRET_AGE
                .finding(&secret.arn, Resource::new("Other", &secret.arn), passed)
                .description(description);
            findings.emit(with_asset(finding, asset(), secret)).await;
        }

        Ok(())
    }
}

const SECRET_ROTATION: Control = Control {
    slug: "secrets-manager-rotation-check",
    title: "[SecretsManager.2] Secrets should have automatic rotation configured",
    severity: Severity::Medium,
    finding_type: AWS_BEST_PRACTICES,
    remediation: "For more information on Secret Rotation refer to the Rotating Your AWS Secrets Manager Secrets section of the AWS Secrets Manager User Guide",
    url: "https://docs.aws.amazon.com/secretsmanager/latest/userguide/rotating-secrets.html",
    requirements: &[
        "NIST CSF V1.1 PR.AC-1",
        "NIST SP 800-53 Rev. 4 IA-5",
        "AICPA TSC CC6.1",
        "ISO 27001:2013 A.9.4.3",
    ],
};

/// SecretsManager.2: secrets should rotate automatically
pub struct SecretRotationCheck;

#[async_trait]
impl Check for SecretRotationCheck {
    fn name(&self) -> &'static str {
        "secretsmanager_secret_rotation_check"
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn title(&self) -> &'static str {
        SECRET_ROTATION.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        let secrets = cached!(ctx, SECRETS, list_secrets)?;

        for secret in secrets.iter() {
            let passed = secret.rotation_enabled.unwrap_or(false);
            let description = if passed {
                format!("Secret {} has automatic rotation configured.", secret.name)
            } else {
                format!(
                    "Secret {} does not have automatic rotation configured. Refer to the remediation instructions if this configuration is not intended.",
                    secret.name
                )
            };

            let finding = SECRET_ROTATION
                .finding(&secret.arn, Resource::new("Other", &secret.arn), passed)
                .description(description);
            findings.emit(with_asset(finding, asset(), secret)).await;
        }

        Ok(())
    }
}

pub(super) fn register(registry: &mut CheckRegistryBuilder) -> Result<()> {
    registry
        .register(SERVICE, SecretAgeCheck::default())?
        .register(SERVICE, SecretRotationCheck)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::tests::FakeAws;
    use crate::testing::run_aws;
    use chrono::TimeZone;
    use posture_core::ComplianceStatus;
    use posture_engine::OutcomeStatus;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn secret(name: &str, changed_days_ago: Option<i64>, rotation: Option<bool>) -> Secret {
        Secret {
            arn: format!("arn:aws:secretsmanager:us-east-1:111122223333:secret:{name}"),
            name: name.into(),
            created_date: None,
            last_changed_date: changed_days_ago.map(|d| now() - Duration::days(d)),
            rotation_enabled: rotation,
        }
    }

    fn register_fixed(registry: &mut CheckRegistryBuilder) -> Result<()> {
        registry
            .register(SERVICE, SecretAgeCheck::at(now()))?
            .register(SERVICE, SecretRotationCheck)?;
        Ok(())
    }

    fn status(findings: &[posture_core::NormalizedFinding], suffix: &str) -> ComplianceStatus {
        findings.iter().find(|f| f.id.ends_with(suffix)).unwrap().status()
    }

    #[tokio::test]
    async fn test_age_and_rotation() {
        let fake = Arc::new(FakeAws {
            secrets: vec![
                secret("fresh", Some(10), Some(true)),
                secret("stale", Some(90), None),
            ],
            ..FakeAws::default()
        });

        let (result, findings) = run_aws(fake.clone(), register_fixed).await;
        assert_eq!(fake.calls("ListSecrets"), 1);
        assert!(!result.has_errors());
        assert_eq!(status(&findings, "fresh/secrets-manager-age-check"), ComplianceStatus::Passed);
        assert_eq!(status(&findings, "stale/secrets-manager-age-check"), ComplianceStatus::Failed);
        assert_eq!(status(&findings, "fresh/secrets-manager-rotation-check"), ComplianceStatus::Passed);
        assert_eq!(status(&findings, "stale/secrets-manager-rotation-check"), ComplianceStatus::Failed);
        assert!(findings.iter().all(|f| f.resources[0].resource_type == "Other"));
    }

    #[tokio::test]
    async fn test_undated_secret_fails_age_check_only() {
        let fake = Arc::new(FakeAws {
            secrets: vec![secret("undated", None, Some(true))],
            ..FakeAws::default()
        });

        let (result, findings) = run_aws(fake, register_fixed).await;
        let failed: Vec<_> = result.outcomes_with(OutcomeStatus::Failed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].check, "secretsmanager_secret_age_check");
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn test_created_date_fallback() {
        let mut s = secret("new", None, None);
        s.created_date = Some(now());
        assert_eq!(SecretAgeCheck::last_changed(&s).unwrap(), now());
    }
}
