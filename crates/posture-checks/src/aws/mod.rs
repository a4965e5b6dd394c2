//! AWS checks and the adapter contract they call through.
//!
//! Checks never talk to AWS directly: the scope credential is an
//! [`AwsClient`], a session already bound to one account and region, and
//! every listing goes through the scope's [`RunCache`](posture_engine::RunCache)
//! so checks of the same service share a single call.

mod cloudtrail;
mod ec2;
mod neptune;
mod secretsmanager;

use crate::error::ProviderResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use posture_core::{CheckError, Scope};
use posture_engine::{CacheKey, CheckContext, CheckRegistryBuilder, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use cloudtrail::{
    CloudWatchLoggingCheck, KmsEncryptionCheck, LogFileValidationCheck, ManagementEventsCheck,
    MultiRegionCheck,
};
pub use ec2::{ImdsV2Check, SecureEnclaveCheck};
pub use neptune::{ClusterParameterCheck, NeptuneInstanceCheck};
pub use secretsmanager::{SecretAgeCheck, SecretRotationCheck};

/// AWS API calls used by the check library
///
/// An implementation is bound to one account and region.
#[async_trait]
pub trait AwsApi: Send + Sync {
    /// `cloudtrail:DescribeTrails`, including shadow trails
    async fn describe_trails(&self) -> ProviderResult<Vec<Trail>>;

    /// `ec2:DescribeInstances`, flattened across reservations
    async fn describe_instances(&self) -> ProviderResult<Vec<Instance>>;

    /// `neptune:DescribeDBInstances`
    async fn describe_neptune_instances(&self) -> ProviderResult<Vec<NeptuneInstance>>;

    /// `neptune:DescribeDBClusterParameterGroups`
    async fn describe_cluster_parameter_groups(&self) -> ProviderResult<Vec<ClusterParameterGroup>>;

    /// `neptune:DescribeDBClusterParameters` for one group
    async fn describe_cluster_parameters(&self, group: &str) -> ProviderResult<Vec<Parameter>>;

    /// `secretsmanager:ListSecrets`
    async fn list_secrets(&self) -> ProviderResult<Vec<Secret>>;
}

/// Credential type AWS scopes must carry
pub type AwsClient = Arc<dyn AwsApi>;

/// A CloudTrail trail
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Trail {
    pub name: String,
    #[serde(rename = "TrailARN")]
    pub trail_arn: String,
    pub home_region: Option<String>,
    pub is_multi_region_trail: bool,
    pub include_global_service_events: bool,
    pub log_file_validation_enabled: bool,
    pub cloud_watch_logs_log_group_arn: Option<String>,
    pub kms_key_id: Option<String>,
    pub s3_bucket_name: Option<String>,
}

/// Instance metadata service options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MetadataOptions {
    pub http_endpoint: String,
    pub http_tokens: String,
}

/// Nitro Enclaves options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EnclaveOptions {
    pub enabled: bool,
}

/// Lifecycle state of an instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InstanceState {
    pub name: String,
}

/// An EC2 instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Instance {
    pub instance_id: String,
    pub instance_type: Option<String>,
    pub image_id: Option<String>,
    pub state: Option<InstanceState>,
    pub metadata_options: Option<MetadataOptions>,
    pub enclave_options: EnclaveOptions,
}

impl Instance {
    /// Running or stopped; pending, terminated and stateless records are not audited
    #[must_use]
    pub fn is_auditable(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| matches!(state.name.as_str(), "running" | "stopped"))
    }

    /// Instance ARN within the scope
    #[must_use]
    pub fn arn(&self, scope: &Scope) -> String {
        format!(
            "arn:{}:ec2:{}:{}:instance/{}",
            scope.partition, scope.region, scope.account_id, self.instance_id
        )
    }
}

/// A Neptune database instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeptuneInstance {
    #[serde(rename = "DBInstanceIdentifier")]
    pub identifier: String,
    #[serde(rename = "DBInstanceArn")]
    pub arn: String,
    #[serde(rename = "DBClusterIdentifier")]
    pub cluster_identifier: Option<String>,
    #[serde(rename = "MultiAZ")]
    pub multi_az: bool,
    #[serde(rename = "StorageEncrypted")]
    pub storage_encrypted: bool,
    #[serde(rename = "IAMDatabaseAuthenticationEnabled")]
    pub iam_database_authentication_enabled: bool,
}

/// A Neptune cluster parameter group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParameterGroup {
    #[serde(rename = "DBClusterParameterGroupName")]
    pub name: String,
    #[serde(rename = "DBClusterParameterGroupArn")]
    pub arn: String,
    #[serde(rename = "DBParameterGroupFamily")]
    pub family: Option<String>,
}

/// One parameter of a parameter group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Parameter {
    pub parameter_name: String,
    pub parameter_value: Option<String>,
}

/// A Secrets Manager secret
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Secret {
    #[serde(rename = "ARN")]
    pub arn: String,
    pub name: String,
    pub created_date: Option<DateTime<Utc>>,
    pub last_changed_date: Option<DateTime<Utc>>,
    pub rotation_enabled: Option<bool>,
}

pub(crate) const TRAILS: CacheKey<Vec<Trail>> = CacheKey::new("aws.cloudtrail.describe_trails");
pub(crate) const INSTANCES: CacheKey<Vec<Instance>> = CacheKey::new("aws.ec2.describe_instances");
pub(crate) const NEPTUNE_INSTANCES: CacheKey<Vec<NeptuneInstance>> =
    CacheKey::new("aws.neptune.describe_db_instances");
pub(crate) const CLUSTER_PARAMETER_GROUPS: CacheKey<Vec<ClusterParameterGroup>> =
    CacheKey::new("aws.neptune.describe_db_cluster_parameter_groups");
pub(crate) const SECRETS: CacheKey<Vec<Secret>> = CacheKey::new("aws.secretsmanager.list_secrets");

/// Session for the scope
pub(crate) fn client(ctx: &CheckContext) -> std::result::Result<&AwsClient, CheckError> {
    ctx.credential::<AwsClient>()
}

/// Fetch a listing through the scope cache
macro_rules! cached {
    ($ctx:expr, $key:expr, $call:ident $(, $arg:expr)*) => {{
        let api = $crate::aws::client($ctx)?;
        $ctx.cache()
            .get_or_compute(&$key, || async move {
                api.$call($($arg),*).await.map_err(posture_core::CheckError::from)
            })
            .await
    }};
}
pub(crate) use cached;

/// Register every AWS check
pub fn register(registry: &mut CheckRegistryBuilder) -> Result<()> {
    cloudtrail::register(registry)?;
    ec2::register(registry)?;
    neptune::register(registry)?;
    secretsmanager::register(registry)?;
    Ok(())
}
