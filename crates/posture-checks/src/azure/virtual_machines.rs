//! Azure virtual machine checks.
//!
//! Besides the machines themselves the service covers the estate they run
//! in: bastion hosts on virtual networks, disks nobody has attached, and
//! backup coverage from Recovery Services vaults.

use super::{
    cached, resource_group_of, BackupProtectedItem, Disk, VirtualMachine, VmExtension,
    BACKUP_ITEMS, BASTION_HOSTS, DISKS, VIRTUAL_MACHINES, VIRTUAL_NETWORKS,
};
use crate::control::{with_asset, Control, CONFIGURATION_CHECKS};
use async_trait::async_trait;
use posture_core::{Asset, CheckError, Provider, RawFinding, Resource, Severity};
use posture_engine::{CacheKey, Check, CheckContext, CheckRegistryBuilder, FindingEmitter, Result};
use serde_json::json;
use std::sync::Arc;

const SERVICE: &str = "azure.virtual_machines";

async fn disk(
    ctx: &CheckContext,
    resource_group: &str,
    name: &str,
) -> std::result::Result<Arc<Disk>, CheckError> {
    let key = CacheKey::dynamic(format!("azure.compute.disk/{resource_group}/{name}"));
    cached!(ctx, key, get_disk, resource_group, name)
}

async fn extensions(
    ctx: &CheckContext,
    resource_group: &str,
    vm: &str,
) -> std::result::Result<Arc<Vec<VmExtension>>, CheckError> {
    let key = CacheKey::dynamic(format!("azure.compute.vm_extensions/{resource_group}/{vm}"));
    cached!(ctx, key, list_vm_extensions, resource_group, vm)
}

fn resource_group<'a>(kind: &str, id: &'a str) -> std::result::Result<&'a str, CheckError> {
    resource_group_of(id).ok_or_else(|| {
        CheckError::InvalidResource(format!("{kind} id {id:?} has no resource group"))
    })
}

/// ARM resource a finding is about
struct Subject<'a> {
    id: &'a str,
    name: &'a str,
    location: &'a str,
    resource_group: &'a str,
    resource_type: &'static str,
}

impl<'a> Subject<'a> {
    fn vm(vm: &'a VirtualMachine, resource_group: &'a str) -> Self {
        Self {
            id: &vm.id,
            name: &vm.name,
            location: &vm.location,
            resource_group,
            resource_type: "AzureVirtualMachineInstance",
        }
    }

    /// Finding identified under the subscription and the resource's location
    fn finding(
        &self,
        ctx: &CheckContext,
        control: &Control,
        passed: bool,
        description: String,
    ) -> RawFinding {
        let prefix = format!("{}/{}/{}", ctx.account_id(), self.location, self.id);
        let resource = Resource::new(self.resource_type, self.id)
            .region(self.location)
            .details(json!({
                "Other": {
                    "SubscriptionId": ctx.account_id(),
                    "ResourceGroupName": self.resource_group,
                    "Region": self.location,
                    "Name": self.name,
                    "Id": self.id,
                }
            }));
        control.finding(&prefix, resource, passed).description(description)
    }
}

fn vm_asset() -> Asset {
    Asset::new("Compute", "Azure Virtual Machine", "Instance")
}

const BASTION_HOST: Control = Control {
    slug: "az-vm-bastion-host-exists-check",
    title: "[Azure.VirtualMachines.1] An Azure Bastion Host should be deployed to provide secure RDP and SSH access to Azure Virtual Machines",
    severity: Severity::Low,
    finding_type: CONFIGURATION_CHECKS,
    remediation: "To deploy an Azure Bastion Host refer to the Azure Bastion documentation.",
    url: "https://docs.microsoft.com/en-us/azure/bastion/bastion-create-host-portal",
    requirements: &[
        "NIST CSF V1.1 PR.AC-4",
        "NIST SP 800-53 Rev. 4 AC-17",
        "AICPA TSC CC6.1",
        "ISO 27001:2013 A.9.1.2",
        "CIS Microsoft Azure Foundations Benchmark V2.0.0 7.1",
        "MITRE ATT&CK T1590",
    ],
};

/// Azure.VirtualMachines.1: every virtual network should host a bastion
pub struct BastionHostCheck;

#[async_trait]
impl Check for BastionHostCheck {
    fn name(&self) -> &'static str {
        "azure_vm_bastion_host_exists_check"
    }

    fn provider(&self) -> Provider {
        Provider::Azure
    }

    fn title(&self) -> &'static str {
        BASTION_HOST.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        let vnets = cached!(ctx, VIRTUAL_NETWORKS, list_virtual_networks)?;
        if vnets.is_empty() {
            return Ok(());
        }
        let hosts = cached!(ctx, BASTION_HOSTS, list_bastion_hosts)?;

        for vnet in vnets.iter() {
            let rg = resource_group("virtual network", &vnet.id)?;
            let passed = vnet.has_bastion(&hosts);
            let description = if passed {
                format!(
                    "Virtual Network {} in Subscription {} in {} has an Azure Bastion Host deployed.",
                    vnet.name, ctx.account_id(), vnet.location
                )
            } else {
                format!(
                    "Virtual Network {} in Subscription {} in {} does not have an Azure Bastion Host deployed. Refer to the remediation instructions if this configuration is not intended.",
                    vnet.name, ctx.account_id(), vnet.location
                )
            };

            let subject = Subject {
                id: &vnet.id,
                name: &vnet.name,
                location: &vnet.location,
                resource_group: rg,
                resource_type: "AzureVirtualNetwork",
            };
            let finding = subject.finding(ctx, &BASTION_HOST, passed, description);
            let asset = Asset::new("Network", "Azure Virtual Network", "Virtual Network");
            findings.emit(with_asset(finding, asset, vnet)).await;
        }
        Ok(())
    }
}

const MANAGED_DISKS: Control = Control {
    slug: "az-vm-utilizing-managed-disks-check",
    title: "[Azure.VirtualMachines.2] Azure Virtual Machines should utilize Managed Disks for storage",
    severity: Severity::Low,
    finding_type: CONFIGURATION_CHECKS,
    remediation: "To migrate your Azure Virtual Machine instance to Managed Disks refer to the Migrate to Managed Disks documentation.",
    url: "https://docs.microsoft.com/en-us/azure/virtual-machines/windows/convert-unmanaged-to-managed-disks",
    requirements: &[
        "NIST CSF V1.1 PR.DS-1",
        "NIST SP 800-53 Rev. 4 SC-28",
        "AICPA TSC CC6.1",
        "ISO 27001:2013 A.8.2.3",
        "CIS Microsoft Azure Foundations Benchmark V2.0.0 7.2",
        "MITRE ATT&CK T1530",
    ],
};

/// Azure.VirtualMachines.2: every disk should be a managed disk
pub struct ManagedDisksCheck;

#[async_trait]
impl Check for ManagedDisksCheck {
    fn name(&self) -> &'static str {
        "azure_vm_utilizing_managed_disks_check"
    }

    fn provider(&self) -> Provider {
        Provider::Azure
    }

    fn title(&self) -> &'static str {
        MANAGED_DISKS.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        for vm in cached!(ctx, VIRTUAL_MACHINES, list_virtual_machines)?.iter() {
            let rg = resource_group("virtual machine", &vm.id)?;
            let passed = vm.disks().all(|d| d.managed_disk.is_some());
            let description = if passed {
                format!(
                    "Azure Virtual Machine instance {} in Subscription {} in {} utilizes Managed Disks for storage.",
                    vm.name, ctx.account_id(), vm.location
                )
            } else {
                format!(
                    "Azure Virtual Machine instance {} in Subscription {} in {} does not utilize Managed Disks for storage. Refer to the remediation instructions if this configuration is not intended.",
                    vm.name, ctx.account_id(), vm.location
                )
            };
            let finding = Subject::vm(vm, rg).finding(ctx, &MANAGED_DISKS, passed, description);
            findings.emit(with_asset(finding, vm_asset(), vm)).await;
        }
        Ok(())
    }
}

const DISK_CMK_ENCRYPTION: Control = Control {
    slug: "az-vm-os-and-disk-cmk-encryption-check",
    title: "[Azure.VirtualMachines.3] Azure Virtual Machines should encrypt both the OS and Data disks with a Customer Managed Key (CMK)",
    severity: Severity::Low,
    finding_type: CONFIGURATION_CHECKS,
    remediation: "If your Azure Virtual Machine instance should CMKs for both their OS and Data disks refer to the Azure data security and encryption best practices section of the Azure Security Fundamentals guide.",
    url: "https://learn.microsoft.com/en-us/azure/security/fundamentals/data-encryption-best-practices",
    requirements: &[
        "NIST CSF V1.1 PR.DS-1",
        "NIST SP 800-53 Rev. 4 SC-12",
        "NIST SP 800-53 Rev. 4 SC-28",
        "AICPA TSC CC6.1",
        "CIS Microsoft Azure Foundations Benchmark V2.0.0 7.3",
    ],
};

/// Azure.VirtualMachines.3: OS and managed data disks should use a CMK
///
/// An unmanaged OS disk fails the control. Unmanaged data disks are left to
/// Azure.VirtualMachines.2.
pub struct DiskCmkEncryptionCheck;

impl DiskCmkEncryptionCheck {
    async fn encrypted(
        ctx: &CheckContext,
        vm: &VirtualMachine,
        resource_group: &str,
    ) -> std::result::Result<bool, CheckError> {
        let os = &vm.storage_profile.os_disk;
        if os.managed_disk.is_none() {
            return Ok(false);
        }
        if !disk(ctx, resource_group, &os.name).await?.customer_key_encrypted() {
            return Ok(false);
        }

        for data in vm
            .storage_profile
            .data_disks
            .iter()
            .filter(|d| d.managed_disk.is_some())
        {
            if !disk(ctx, resource_group, &data.name).await?.customer_key_encrypted() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl Check for DiskCmkEncryptionCheck {
    fn name(&self) -> &'static str {
        "azure_vm_encrypt_os_and_data_disk_with_cmk_check"
    }

    fn provider(&self) -> Provider {
        Provider::Azure
    }

    fn title(&self) -> &'static str {
        DISK_CMK_ENCRYPTION.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        for vm in cached!(ctx, VIRTUAL_MACHINES, list_virtual_machines)?.iter() {
            let rg = resource_group("virtual machine", &vm.id)?;
            let passed = Self::encrypted(ctx, vm, rg).await?;
            let description = if passed {
                format!(
                    "Azure Virtual Machine instance {} in Subscription {} in {} encrypts its OS and Data disks with a CMK.",
                    vm.name, ctx.account_id(), vm.location
                )
            } else {
                format!(
                    "Azure Virtual Machine instance {} in Subscription {} in {} does not encrypt both its OS and Data disks with a CMK. Refer to the remediation instructions if this configuration is not intended.",
                    vm.name, ctx.account_id(), vm.location
                )
            };
            let finding = Subject::vm(vm, rg).finding(ctx, &DISK_CMK_ENCRYPTION, passed, description);
            findings.emit(with_asset(finding, vm_asset(), vm)).await;
        }
        Ok(())
    }
}

const UNATTACHED_DISK_CMK: Control = Control {
    slug: "az-vm-unattached-disks-cmk-encryption-check",
    title: "[Azure.VirtualMachines.4] Ensure that unattached disks are encrypted with a Customer Managed Key (CMK)",
    severity: Severity::Low,
    finding_type: CONFIGURATION_CHECKS,
    remediation: "To encrypt your unattached disks with a CMK refer to the Azure data security and encryption best practices section of the Azure Security Fundamentals guide.",
    url: "https://learn.microsoft.com/en-us/azure/security/fundamentals/data-encryption-best-practices",
    requirements: &[
        "NIST CSF V1.1 PR.DS-1",
        "NIST SP 800-53 Rev. 4 SC-28",
        "AICPA TSC CC6.1",
        "ISO 27001:2013 A.8.2.3",
        "CIS Microsoft Azure Foundations Benchmark V2.0.0 7.4",
        "MITRE ATT&CK T1530",
    ],
};

/// Azure.VirtualMachines.4: disks no VM is using should still be sealed with a CMK
///
/// One finding per unattached disk. Attached disks are covered by
/// Azure.VirtualMachines.3 through their VM.
pub struct UnattachedDiskCmkCheck;

#[async_trait]
impl Check for UnattachedDiskCmkCheck {
    fn name(&self) -> &'static str {
        "azure_vm_unattached_disks_cmk_encryption_check"
    }

    fn provider(&self) -> Provider {
        Provider::Azure
    }

    fn title(&self) -> &'static str {
        UNATTACHED_DISK_CMK.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        let disks = cached!(ctx, DISKS, list_disks)?;

        for disk in disks.iter().filter(|d| !d.is_attached()) {
            let rg = resource_group("disk", &disk.id)?;
            let passed = disk.customer_key_encrypted();
            let description = if passed {
                format!(
                    "Unattached disk {} in Resource Group {} in Subscription {} in {} is encrypted with a CMK.",
                    disk.name, rg, ctx.account_id(), disk.location
                )
            } else {
                format!(
                    "Unattached disk {} in Resource Group {} in Subscription {} in {} is not encrypted with a CMK. Refer to the remediation instructions if this configuration is not intended.",
                    disk.name, rg, ctx.account_id(), disk.location
                )
            };

            let subject = Subject {
                id: &disk.id,
                name: &disk.name,
                location: &disk.location,
                resource_group: rg,
                resource_type: "AzureDisk",
            };
            let finding = subject.finding(ctx, &UNATTACHED_DISK_CMK, passed, description);
            let asset = Asset::new("Storage", "Azure Disk Storage", "Disk");
            findings.emit(with_asset(finding, asset, disk)).await;
        }
        Ok(())
    }
}

const MONITOR_AGENT: Control = Control {
    slug: "az-vm-monitoring-agent-installed-check",
    title: "[Azure.VirtualMachines.5] Azure Virtual Machines should have the Azure Monitor Agent installed",
    severity: Severity::Low,
    finding_type: CONFIGURATION_CHECKS,
    remediation: "To install the Azure Monitor Agent on your Azure Virtual Machine instance refer to the Azure Monitor Agent documentation.",
    url: "https://docs.microsoft.com/en-us/azure/azure-monitor/agents/agents-overview",
    requirements: &[
        "NIST CSF V1.1 PR.IP-10",
        "NIST SP 800-53 Rev. 4 SI-4",
        "AICPA TSC CC6.1",
        "ISO 27001:2013 A.12.4.1",
        "CIS Microsoft Azure Foundations Benchmark V2.0.0 7.5",
        "MITRE ATT&CK T1553",
    ],
};

/// Azure.VirtualMachines.5: a monitoring agent extension should be installed
pub struct MonitorAgentCheck;

#[async_trait]
impl Check for MonitorAgentCheck {
    fn name(&self) -> &'static str {
        "azure_vm_monitoring_agent_installed_check"
    }

    fn provider(&self) -> Provider {
        Provider::Azure
    }

    fn title(&self) -> &'static str {
        MONITOR_AGENT.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        for vm in cached!(ctx, VIRTUAL_MACHINES, list_virtual_machines)?.iter() {
            let rg = resource_group("virtual machine", &vm.id)?;
            let passed = extensions(ctx, rg, &vm.name)
                .await?
                .iter()
                .any(VmExtension::is_monitor_agent);
            let description = if passed {
                format!(
                    "Azure Virtual Machine instance {} in Subscription {} in {} has the Azure Monitor Agent installed.",
                    vm.name, ctx.account_id(), vm.location
                )
            } else {
                format!(
                    "Azure Virtual Machine instance {} in Subscription {} in {} does not have the Azure Monitor Agent installed. Refer to the remediation instructions if this configuration is not intended.",
                    vm.name, ctx.account_id(), vm.location
                )
            };
            let finding = Subject::vm(vm, rg).finding(ctx, &MONITOR_AGENT, passed, description);
            findings.emit(with_asset(finding, vm_asset(), vm)).await;
        }
        Ok(())
    }
}

const BACKUP_COVERAGE: Control = Control {
    slug: "az-vm-azure-backup-coverage-check",
    title: "[Azure.VirtualMachines.6] Azure Virtual Machines should have Azure Backup coverage",
    severity: Severity::Medium,
    finding_type: CONFIGURATION_CHECKS,
    remediation: "To enable Azure Backup coverage for your Azure Virtual Machine instance refer to the Back up an Azure VM from the VM settings section of the Azure Backup documentation.",
    url: "https://docs.microsoft.com/en-us/azure/backup/backup-azure-vms-first-look-arm",
    requirements: &[
        "NIST CSF V1.1 ID.BE-5",
        "NIST CSF V1.1 PR.IP-4",
        "NIST SP 800-53 Rev. 4 CP-9",
        "AICPA TSC A1.2",
        "ISO 27001:2013 A.12.3.1",
        "ISO 27001:2013 A.17.1.2",
    ],
};

/// Azure.VirtualMachines.6: a Recovery Services vault should protect every VM
pub struct BackupCoverageCheck;

impl BackupCoverageCheck {
    fn protected(vm: &VirtualMachine, items: &[BackupProtectedItem]) -> bool {
        items
            .iter()
            .any(|item| item.virtual_machine_id.eq_ignore_ascii_case(&vm.id))
    }
}

#[async_trait]
impl Check for BackupCoverageCheck {
    fn name(&self) -> &'static str {
        "azure_vm_azure_backup_coverage_check"
    }

    fn provider(&self) -> Provider {
        Provider::Azure
    }

    fn title(&self) -> &'static str {
        BACKUP_COVERAGE.title
    }

    async fn run(
        &self,
        ctx: &CheckContext,
        findings: &mut FindingEmitter,
    ) -> std::result::Result<(), CheckError> {
        let vms = cached!(ctx, VIRTUAL_MACHINES, list_virtual_machines)?;
        if vms.is_empty() {
            return Ok(());
        }
        let items = cached!(ctx, BACKUP_ITEMS, list_backup_protected_items)?;

        for vm in vms.iter() {
            let rg = resource_group("virtual machine", &vm.id)?;
            let passed = Self::protected(vm, &items);
            let description = if passed {
                format!(
                    "Azure Virtual Machine instance {} in Subscription {} in {} has Azure Backup coverage.",
                    vm.name, ctx.account_id(), vm.location
                )
            } else {
                format!(
                    "Azure Virtual Machine instance {} in Subscription {} in {} does not have Azure Backup coverage. Refer to the remediation instructions if this configuration is not intended.",
                    vm.name, ctx.account_id(), vm.location
                )
            };
            let finding = Subject::vm(vm, rg).finding(ctx, &BACKUP_COVERAGE, passed, description);
            findings.emit(with_asset(finding, vm_asset(), vm)).await;
        }
        Ok(())
    }
}

pub(super) fn register(registry: &mut CheckRegistryBuilder) -> Result<()> {
    registry
        .register(SERVICE, BastionHostCheck)?
        .register(SERVICE, ManagedDisksCheck)?
        .register(SERVICE, DiskCmkEncryptionCheck)?
        .register(SERVICE, UnattachedDiskCmkCheck)?
        .register(SERVICE, MonitorAgentCheck)?
        .register(SERVICE, BackupCoverageCheck)?;
    Ok(())
}
