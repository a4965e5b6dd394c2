//! Azure checks and the adapter contract they call through.

mod virtual_machines;

use crate::error::ProviderResult;
use async_trait::async_trait;
use posture_core::CheckError;
use posture_engine::{CacheKey, CheckContext, CheckRegistryBuilder, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use virtual_machines::{
    BackupCoverageCheck, BastionHostCheck, DiskCmkEncryptionCheck, ManagedDisksCheck,
    MonitorAgentCheck, UnattachedDiskCmkCheck,
};

/// Azure Resource Manager calls used by the check library
///
/// An implementation is bound to one subscription and location.
#[async_trait]
pub trait AzureApi: Send + Sync {
    /// Virtual machines in the location
    async fn list_virtual_machines(&self) -> ProviderResult<Vec<VirtualMachine>>;

    /// One managed disk
    async fn get_disk(&self, resource_group: &str, name: &str) -> ProviderResult<Disk>;

    /// Managed disks in the location, attached or not
    async fn list_disks(&self) -> ProviderResult<Vec<Disk>>;

    /// Virtual networks in the location
    async fn list_virtual_networks(&self) -> ProviderResult<Vec<VirtualNetwork>>;

    /// Bastion hosts in the location
    async fn list_bastion_hosts(&self) -> ProviderResult<Vec<BastionHost>>;

    /// Extensions installed on one virtual machine
    async fn list_vm_extensions(
        &self,
        resource_group: &str,
        vm: &str,
    ) -> ProviderResult<Vec<VmExtension>>;

    /// Azure IaaS VM items protected by any Recovery Services vault
    async fn list_backup_protected_items(&self) -> ProviderResult<Vec<BackupProtectedItem>>;
}

/// Credential type Azure scopes must carry
pub type AzureClient = Arc<dyn AzureApi>;

/// Encryption type for disks sealed with a customer-managed key
pub const CUSTOMER_KEY_ENCRYPTION: &str = "EncryptionAtRestWithCustomerKey";

/// Extension types of the Azure Monitor agent and its Log Analytics predecessors
pub const MONITOR_AGENTS: &[&str] = &[
    "AzureMonitorLinuxAgent",
    "AzureMonitorWindowsAgent",
    "MicrosoftMonitoringAgent",
    "OmsAgentForLinux",
];

/// Resource group segment of an ARM resource id
#[must_use]
pub fn resource_group_of(id: &str) -> Option<&str> {
    let mut segments = id.split('/');
    segments
        .by_ref()
        .find(|s| s.eq_ignore_ascii_case("resourceGroups"))?;
    segments.next().filter(|rg| !rg.is_empty())
}

/// A virtual machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    pub location: String,
    pub storage_profile: StorageProfile,
}

impl VirtualMachine {
    /// Resource group parsed from the resource id
    #[must_use]
    pub fn resource_group(&self) -> Option<&str> {
        resource_group_of(&self.id)
    }

    /// OS disk followed by data disks
    pub fn disks(&self) -> impl Iterator<Item = &DiskReference> {
        std::iter::once(&self.storage_profile.os_disk).chain(&self.storage_profile.data_disks)
    }
}

/// Disks attached to a virtual machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageProfile {
    pub os_disk: DiskReference,
    pub data_disks: Vec<DiskReference>,
}

/// A disk as referenced from a VM's storage profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiskReference {
    pub name: String,
    /// Present only for managed disks
    pub managed_disk: Option<ManagedDiskParameters>,
}

/// Managed disk reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagedDiskParameters {
    pub id: Option<String>,
}

/// A managed disk resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Disk {
    pub id: String,
    pub name: String,
    pub location: String,
    /// VM the disk is attached to
    pub managed_by: Option<String>,
    pub encryption: Option<DiskEncryption>,
}

impl Disk {
    /// Resource group parsed from the resource id
    #[must_use]
    pub fn resource_group(&self) -> Option<&str> {
        resource_group_of(&self.id)
    }

    /// Whether this is the disk `name` in `resource_group`
    ///
    /// Resource group names compare case-insensitively, as ARM does.
    #[must_use]
    pub fn is(&self, resource_group: &str, name: &str) -> bool {
        self.name == name
            && self
                .resource_group()
                .is_some_and(|rg| rg.eq_ignore_ascii_case(resource_group))
    }

    /// Whether the disk is attached to a virtual machine
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.managed_by.as_deref().is_some_and(|vm| !vm.is_empty())
    }

    /// Whether the disk is sealed with a customer-managed key
    #[must_use]
    pub fn customer_key_encrypted(&self) -> bool {
        self.encryption
            .as_ref()
            .is_some_and(|e| e.encryption_type == CUSTOMER_KEY_ENCRYPTION)
    }
}

/// Disk encryption settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskEncryption {
    #[serde(rename = "type")]
    pub encryption_type: String,
}

/// A virtual network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualNetwork {
    pub id: String,
    pub name: String,
    pub location: String,
}

impl VirtualNetwork {
    /// Resource group parsed from the resource id
    #[must_use]
    pub fn resource_group(&self) -> Option<&str> {
        resource_group_of(&self.id)
    }

    /// Whether any of `hosts` sits on a subnet of this network
    #[must_use]
    pub fn has_bastion(&self, hosts: &[BastionHost]) -> bool {
        let prefix = format!("{}/subnets/", self.id.to_ascii_lowercase());
        hosts
            .iter()
            .flat_map(|host| &host.ip_configurations)
            .any(|ip| ip.subnet.id.to_ascii_lowercase().starts_with(&prefix))
    }
}

/// An Azure Bastion host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BastionHost {
    pub id: String,
    pub name: String,
    pub ip_configurations: Vec<BastionIpConfiguration>,
}

/// IP configuration of a bastion host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BastionIpConfiguration {
    pub subnet: SubResource,
}

/// Reference to another ARM resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubResource {
    pub id: String,
}

/// A virtual machine extension
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VmExtension {
    pub name: String,
    pub publisher: Option<String>,
    #[serde(rename = "type")]
    pub extension_type: Option<String>,
}

impl VmExtension {
    /// Whether this is a monitoring agent, matched on type or else on name
    #[must_use]
    pub fn is_monitor_agent(&self) -> bool {
        let kind = self.extension_type.as_deref().unwrap_or(&self.name);
        MONITOR_AGENTS.iter().any(|agent| kind.contains(agent))
    }
}

/// A backup item protected by a Recovery Services vault
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupProtectedItem {
    pub id: String,
    /// Resource id of the protected virtual machine
    pub virtual_machine_id: String,
}

pub(crate) const VIRTUAL_MACHINES: CacheKey<Vec<VirtualMachine>> =
    CacheKey::new("azure.compute.virtual_machines");
pub(crate) const DISKS: CacheKey<Vec<Disk>> = CacheKey::new("azure.compute.disks");
pub(crate) const VIRTUAL_NETWORKS: CacheKey<Vec<VirtualNetwork>> =
    CacheKey::new("azure.network.virtual_networks");
pub(crate) const BASTION_HOSTS: CacheKey<Vec<BastionHost>> =
    CacheKey::new("azure.network.bastion_hosts");
pub(crate) const BACKUP_ITEMS: CacheKey<Vec<BackupProtectedItem>> =
    CacheKey::new("azure.recovery_services.backup_protected_items");

/// Session for the scope
pub(crate) fn client(ctx: &CheckContext) -> std::result::Result<&AzureClient, CheckError> {
    ctx.credential::<AzureClient>()
}

/// Fetch a listing through the scope cache
macro_rules! cached {
    ($ctx:expr, $key:expr, $call:ident $(, $arg:expr)*) => {{
        let api = $crate::azure::client($ctx)?;
        $ctx.cache()
            .get_or_compute(&$key, || async move {
                api.$call($($arg),*).await.map_err(posture_core::CheckError::from)
            })
            .await
    }};
}
pub(crate) use cached;

/// Register every Azure check
pub fn register(registry: &mut CheckRegistryBuilder) -> Result<()> {
    virtual_machines::register(registry)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ProviderError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory Azure session; disks are looked up by resource group and name
    #[derive(Default)]
    pub struct FakeAzure {
        pub vms: Vec<VirtualMachine>,
        pub disks: Vec<Disk>,
        pub vnets: Vec<VirtualNetwork>,
        pub bastions: Vec<BastionHost>,
        /// Extensions keyed by `{resource_group}/{vm}`
        pub extensions: HashMap<String, Vec<VmExtension>>,
        pub backups: Vec<BackupProtectedItem>,
        pub failing: Option<&'static str>,
        pub calls: Mutex<HashMap<&'static str, usize>>,
    }

    impl FakeAzure {
        fn count(&self, operation: &'static str) -> ProviderResult<()> {
            *self.calls.lock().unwrap().entry(operation).or_default() += 1;
            if self.failing == Some(operation) {
                return Err(ProviderError::from_code(operation, "AuthorizationFailed"));
            }
            Ok(())
        }

        pub fn calls(&self, operation: &str) -> usize {
            self.calls.lock().unwrap().get(operation).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl AzureApi for FakeAzure {
        async fn list_virtual_machines(&self) -> ProviderResult<Vec<VirtualMachine>> {
            self.count("ListVirtualMachines")?;
            Ok(self.vms.clone())
        }

        async fn get_disk(&self, resource_group: &str, name: &str) -> ProviderResult<Disk> {
            self.count("GetDisk")?;
            self.disks
                .iter()
                .find(|d| d.is(resource_group, name))
                .cloned()
                .ok_or_else(|| ProviderError::NotFound(format!("{resource_group}/{name}")))
        }

        async fn list_disks(&self) -> ProviderResult<Vec<Disk>> {
            self.count("ListDisks")?;
            Ok(self.disks.clone())
        }

        async fn list_virtual_networks(&self) -> ProviderResult<Vec<VirtualNetwork>> {
            self.count("ListVirtualNetworks")?;
            Ok(self.vnets.clone())
        }

        async fn list_bastion_hosts(&self) -> ProviderResult<Vec<BastionHost>> {
            self.count("ListBastionHosts")?;
            Ok(self.bastions.clone())
        }

        async fn list_vm_extensions(
            &self,
            resource_group: &str,
            vm: &str,
        ) -> ProviderResult<Vec<VmExtension>> {
            self.count("ListVirtualMachineExtensions")?;
            Ok(self
                .extensions
                .get(&format!("{resource_group}/{vm}"))
                .cloned()
                .unwrap_or_default())
        }

        async fn list_backup_protected_items(&self) -> ProviderResult<Vec<BackupProtectedItem>> {
            self.count("ListBackupProtectedItems")?;
            Ok(self.backups.clone())
        }
    }

    #[test]
    fn test_resource_group() {
        let vm = VirtualMachine {
            id: "/subscriptions/sub-1/resourceGroups/prod-rg/providers/Microsoft.Compute/virtualMachines/web".into(),
            ..VirtualMachine::default()
        };
        assert_eq!(vm.resource_group(), Some("prod-rg"));

        let vm = VirtualMachine {
            id: "/subscriptions/sub-1/RESOURCEGROUPS/Ops/providers/x".into(),
            ..VirtualMachine::default()
        };
        assert_eq!(vm.resource_group(), Some("Ops"));
        assert_eq!(VirtualMachine::default().resource_group(), None);
    }

    #[test]
    fn test_bastion_matches_subnets_of_its_network_only() {
        let vnet = VirtualNetwork {
            id: "/subscriptions/s/resourceGroups/net/providers/Microsoft.Network/virtualNetworks/hub".into(),
            ..VirtualNetwork::default()
        };
        let host = |subnet: &str| BastionHost {
            ip_configurations: vec![BastionIpConfiguration {
                subnet: SubResource { id: subnet.into() },
            }],
            ..BastionHost::default()
        };

        let inside = host("/subscriptions/s/resourceGroups/NET/providers/Microsoft.Network/virtualNetworks/hub/subnets/AzureBastionSubnet");
        let sibling = host("/subscriptions/s/resourceGroups/net/providers/Microsoft.Network/virtualNetworks/hub-2/subnets/AzureBastionSubnet");
        assert!(vnet.has_bastion(&[sibling.clone(), inside]));
        assert!(!vnet.has_bastion(&[sibling]));
        assert!(!vnet.has_bastion(&[]));
    }

    #[test]
    fn test_monitor_agent_detection() {
        let ext = |name: &str, kind: Option<&str>| VmExtension {
            name: name.into(),
            extension_type: kind.map(Into::into),
            ..VmExtension::default()
        };
        assert!(ext("ama", Some("AzureMonitorLinuxAgent")).is_monitor_agent());
        assert!(ext("MicrosoftMonitoringAgent", None).is_monitor_agent());
        assert!(!ext("MicrosoftMonitoringAgent", Some("CustomScript")).is_monitor_agent());
        assert!(!ext("diagnostics", None).is_monitor_agent());
    }

    #[test]
    fn test_disk_lookup_respects_resource_group() {
        let disk: Disk = serde_json::from_value(serde_json::json!({
            "id": "/subscriptions/s/resourceGroups/Prod-RG/providers/Microsoft.Compute/disks/data",
            "name": "data",
            "location": "eastus",
            "managedBy": "/subscriptions/s/resourceGroups/Prod-RG/providers/Microsoft.Compute/virtualMachines/web"
        }))
        .unwrap();
        assert!(disk.is("prod-rg", "data"));
        assert!(!disk.is("test-rg", "data"));
        assert!(!disk.is("prod-rg", "os"));
        assert!(disk.is_attached());
        assert!(!Disk::default().is_attached());
    }

    #[test]
    fn test_vm_deserializes_from_arm_shape() {
        let vm: VirtualMachine = serde_json::from_value(serde_json::json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1",
            "name": "vm1",
            "location": "eastus",
            "storageProfile": {
                "osDisk": {"name": "vm1-os", "managedDisk": {"id": "/disks/vm1-os"}},
                "dataDisks": [{"name": "vm1-data"}]
            }
        }))
        .unwrap();
        assert_eq!(vm.disks().count(), 2);
        assert!(vm.storage_profile.os_disk.managed_disk.is_some());
        assert!(vm.storage_profile.data_disks[0].managed_disk.is_none());
    }
}
