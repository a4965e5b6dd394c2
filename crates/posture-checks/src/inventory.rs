//! Offline provider adapter backed by an inventory snapshot.
//!
//! A snapshot is a JSON document of per-provider, per-account, per-region
//! resource listings in the providers' own API shapes:
//!
//! ```json
//! {
//!   "aws": {
//!     "111122223333": {
//!       "disabled_regions": ["ap-east-1"],
//!       "regions": {
//!         "us-east-1": {
//!           "trails": [{"Name": "main", "TrailARN": "arn:aws:cloudtrail:...", "IsMultiRegionTrail": true}],
//!           "failures": {"ListSecrets": "AccessDenied"}
//!         }
//!       }
//!     }
//!   },
//!   "azure": {
//!     "sub-1": {
//!       "regions": {
//!         "eastus": {
//!           "virtual_machines": [],
//!           "disks": [{"id": "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Compute/disks/os", "name": "os"}],
//!           "vm_extensions": {"rg/web": [{"name": "AzureMonitorLinuxAgent"}]}
//!         }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! `failures` maps an API operation to an error code the session returns
//! instead of data, which lets a snapshot reproduce permission gaps.
//! Lookups by name answer only the matching entry: cluster parameters by
//! group, disks by resource group and name, extensions by `{rg}/{vm}`.

use crate::error::{ProviderError, ProviderResult};
use async_trait::async_trait;
use posture_core::{Provider, Result, Scope};
use posture_engine::{Credential, ScopeRejection, ScopeResolver};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[cfg(feature = "aws")]
use crate::aws::{
    AwsApi, AwsClient, ClusterParameterGroup, Instance, NeptuneInstance, Parameter, Secret, Trail,
};
#[cfg(feature = "azure")]
use crate::azure::{
    AzureApi, AzureClient, BackupProtectedItem, BastionHost, Disk, VirtualMachine,
    VirtualNetwork, VmExtension,
};

/// Resource listings for one account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountInventory<R> {
    /// Regions that exist but are not enabled for the account
    #[serde(default)]
    pub disabled_regions: Vec<String>,
    /// Listings per enabled region
    #[serde(default = "BTreeMap::new")]
    pub regions: BTreeMap<String, RegionInventory<R>>,
}

/// Resource listings for one region
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionInventory<R> {
    /// Provider-specific listings
    #[serde(flatten)]
    pub resources: R,
    /// Operation name to error code
    #[serde(default)]
    pub failures: BTreeMap<String, String>,
}

impl<R> RegionInventory<R> {
    fn answer<T>(&self, operation: &str, select: impl FnOnce(&R) -> T) -> ProviderResult<T> {
        if let Some(code) = self.failures.get(operation) {
            return Err(ProviderError::from_code(operation, code));
        }
        Ok(select(&self.resources))
    }
}

/// AWS listings for one region
#[cfg(feature = "aws")]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsResources {
    pub trails: Vec<Trail>,
    pub instances: Vec<Instance>,
    pub neptune_instances: Vec<NeptuneInstance>,
    pub cluster_parameter_groups: Vec<ClusterParameterGroup>,
    /// Parameters keyed by cluster parameter group name
    pub cluster_parameters: BTreeMap<String, Vec<Parameter>>,
    pub secrets: Vec<Secret>,
}

/// Azure listings for one location
#[cfg(feature = "azure")]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureResources {
    pub virtual_machines: Vec<VirtualMachine>,
    pub disks: Vec<Disk>,
    pub virtual_networks: Vec<VirtualNetwork>,
    pub bastion_hosts: Vec<BastionHost>,
    /// Extensions keyed by `{resource_group}/{vm}`
    pub vm_extensions: BTreeMap<String, Vec<VmExtension>>,
    pub backup_protected_items: Vec<BackupProtectedItem>,
}

/// A loaded inventory snapshot
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Inventory {
    /// AWS accounts
    #[cfg(feature = "aws")]
    #[serde(default)]
    pub aws: BTreeMap<String, AccountInventory<AwsResources>>,

    /// Azure subscriptions
    #[cfg(feature = "azure")]
    #[serde(default)]
    pub azure: BTreeMap<String, AccountInventory<AzureResources>>,

    #[serde(skip)]
    calls: Mutex<BTreeMap<String, usize>>,
}

impl Inventory {
    /// Parse a snapshot from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a snapshot file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Number of times an API operation was answered, across all scopes
    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record(&self, operation: &str, account: &str, region: &str) {
        debug!(operation, account, region, "inventory call");
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(operation.to_string()).or_default() += 1;
        }
    }

    /// Enabled regions and disabled regions for an account
    fn account_regions(&self, provider: Provider, account: &str) -> Option<(Vec<String>, &[String])> {
        fn split<R>(account: &AccountInventory<R>) -> (Vec<String>, &[String]) {
            let enabled = account
                .regions
                .keys()
                .filter(|r| !account.disabled_regions.contains(r))
                .cloned()
                .collect();
            (enabled, &account.disabled_regions)
        }

        match provider {
            #[cfg(feature = "aws")]
            Provider::Aws => self.aws.get(account).map(split),
            #[cfg(feature = "azure")]
            Provider::Azure => self.azure.get(account).map(split),
            _ => None,
        }
    }

    const fn supports(provider: Provider) -> bool {
        match provider {
            #[cfg(feature = "aws")]
            Provider::Aws => true,
            #[cfg(feature = "azure")]
            Provider::Azure => true,
            _ => false,
        }
    }
}

/// Scope resolver over an [`Inventory`]
///
/// Every resolved scope gets a session bound to its account and region as
/// its credential: an [`AwsClient`] for AWS scopes and an [`AzureClient`]
/// for Azure scopes.
#[derive(Debug, Clone)]
pub struct InventoryResolver {
    inventory: Arc<Inventory>,
}

impl InventoryResolver {
    /// Wrap a loaded inventory
    #[must_use]
    pub fn new(inventory: Inventory) -> Self {
        Self::from_arc(Arc::new(inventory))
    }

    /// Wrap an inventory shared with the caller
    #[must_use]
    pub const fn from_arc(inventory: Arc<Inventory>) -> Self {
        Self { inventory }
    }

    /// The underlying inventory
    #[must_use]
    pub fn inventory(&self) -> &Arc<Inventory> {
        &self.inventory
    }

    fn session(&self, scope: &Scope) -> Credential {
        let session = Session {
            inventory: Arc::clone(&self.inventory),
            account: scope.account_id.clone(),
            region: scope.region.clone(),
        };
        match scope.provider {
            #[cfg(feature = "azure")]
            Provider::Azure => Credential::new(Arc::new(session) as AzureClient),
            #[cfg(feature = "aws")]
            _ => Credential::new(Arc::new(session) as AwsClient),
            #[cfg(not(feature = "aws"))]
            _ => Credential::new(session),
        }
    }
}

#[async_trait]
impl ScopeResolver for InventoryResolver {
    async fn regions(
        &self,
        provider: Provider,
        account_id: &str,
    ) -> std::result::Result<Vec<String>, ScopeRejection> {
        if !Inventory::supports(provider) {
            return Err(ScopeRejection::UnsupportedProvider(provider));
        }
        self.inventory
            .account_regions(provider, account_id)
            .map(|(enabled, _)| enabled)
            .ok_or_else(|| ScopeRejection::AccountUnavailable(format!("{account_id} is not in the inventory")))
    }

    async fn resolve(&self, scope: &Scope) -> std::result::Result<Option<Credential>, ScopeRejection> {
        if !Inventory::supports(scope.provider) {
            return Err(ScopeRejection::UnsupportedProvider(scope.provider));
        }
        let (enabled, disabled) = self
            .inventory
            .account_regions(scope.provider, &scope.account_id)
            .ok_or_else(|| {
                ScopeRejection::AccountUnavailable(format!("{} is not in the inventory", scope.account_id))
            })?;

        if disabled.contains(&scope.region) {
            return Err(ScopeRejection::RegionNotEnabled(scope.region.clone()));
        }
        if !enabled.contains(&scope.region) {
            return Err(ScopeRejection::UnknownRegion(scope.region.clone()));
        }
        Ok(Some(self.session(scope)))
    }
}

/// Inventory view bound to one account and region
#[derive(Debug)]
struct Session {
    inventory: Arc<Inventory>,
    account: String,
    region: String,
}

impl Session {
    fn missing(&self) -> ProviderError {
        ProviderError::NotFound(format!("{}/{}", self.account, self.region))
    }

    #[cfg(feature = "aws")]
    fn aws<T>(&self, operation: &str, select: impl FnOnce(&AwsResources) -> T) -> ProviderResult<T> {
        self.inventory.record(operation, &self.account, &self.region);
        self.inventory
            .aws
            .get(&self.account)
            .and_then(|a| a.regions.get(&self.region))
            .ok_or_else(|| self.missing())?
            .answer(operation, select)
    }

    #[cfg(feature = "azure")]
    fn azure<T>(&self, operation: &str, select: impl FnOnce(&AzureResources) -> T) -> ProviderResult<T> {
        self.inventory.record(operation, &self.account, &self.region);
        self.inventory
            .azure
            .get(&self.account)
            .and_then(|a| a.regions.get(&self.region))
            .ok_or_else(|| self.missing())?
            .answer(operation, select)
    }
}

#[cfg(feature = "aws")]
#[async_trait]
impl AwsApi for Session {
    async fn describe_trails(&self) -> ProviderResult<Vec<Trail>> {
        self.aws("DescribeTrails", |r| r.trails.clone())
    }

    async fn describe_instances(&self) -> ProviderResult<Vec<Instance>> {
        self.aws("DescribeInstances", |r| r.instances.clone())
    }

    async fn describe_neptune_instances(&self) -> ProviderResult<Vec<NeptuneInstance>> {
        self.aws("DescribeDBInstances", |r| r.neptune_instances.clone())
    }

    async fn describe_cluster_parameter_groups(&self) -> ProviderResult<Vec<ClusterParameterGroup>> {
        self.aws("DescribeDBClusterParameterGroups", |r| r.cluster_parameter_groups.clone())
    }

    async fn describe_cluster_parameters(&self, group: &str) -> ProviderResult<Vec<Parameter>> {
        self.aws("DescribeDBClusterParameters", |r| r.cluster_parameters.get(group).cloned())?
            .ok_or_else(|| ProviderError::NotFound(format!("cluster parameter group {group}")))
    }

    async fn list_secrets(&self) -> ProviderResult<Vec<Secret>> {
        self.aws("ListSecrets", |r| r.secrets.clone())
    }
}

#[cfg(feature = "azure")]
#[async_trait]
impl AzureApi for Session {
    async fn list_virtual_machines(&self) -> ProviderResult<Vec<VirtualMachine>> {
        self.azure("ListVirtualMachines", |r| r.virtual_machines.clone())
    }

    async fn get_disk(&self, resource_group: &str, name: &str) -> ProviderResult<Disk> {
        self.azure("GetDisk", |r| r.disks.iter().find(|d| d.is(resource_group, name)).cloned())?
            .ok_or_else(|| ProviderError::NotFound(format!("disk {resource_group}/{name}")))
    }

    async fn list_disks(&self) -> ProviderResult<Vec<Disk>> {
        self.azure("ListDisks", |r| r.disks.clone())
    }

    async fn list_virtual_networks(&self) -> ProviderResult<Vec<VirtualNetwork>> {
        self.azure("ListVirtualNetworks", |r| r.virtual_networks.clone())
    }

    async fn list_bastion_hosts(&self) -> ProviderResult<Vec<BastionHost>> {
        self.azure("ListBastionHosts", |r| r.bastion_hosts.clone())
    }

    async fn list_vm_extensions(
        &self,
        resource_group: &str,
        vm: &str,
    ) -> ProviderResult<Vec<VmExtension>> {
        let key = format!("{resource_group}/{vm}");
        self.azure("ListVirtualMachineExtensions", |r| {
            r.vm_extensions.get(&key).cloned().unwrap_or_default()
        })
    }

    async fn list_backup_protected_items(&self) -> ProviderResult<Vec<BackupProtectedItem>> {
        self.azure("ListBackupProtectedItems", |r| r.backup_protected_items.clone())
    }
}
