//! Check library for the posture engine.
//!
//! Each provider module registers its checks into a
//! [`CheckRegistryBuilder`](posture_engine::CheckRegistryBuilder) and talks to
//! its cloud only through an adapter trait ([`aws::AwsApi`],
//! [`azure::AzureApi`]). The [`inventory`] module implements those traits,
//! plus scope resolution, over a JSON snapshot for offline audits.
//!
//! ```no_run
//! use posture_checks::{register_all, Inventory, InventoryResolver};
//! use posture_engine::{CheckRegistry, MemorySink, Scheduler};
//!
//! # fn example() -> posture_core::Result<()> {
//! let mut registry = CheckRegistry::builder();
//! register_all(&mut registry)?;
//!
//! let scheduler = Scheduler::builder(registry.build())
//!     .resolver(InventoryResolver::new(Inventory::from_path("inventory.json")?))
//!     .sink(MemorySink::new())
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/posture-checks/0.4.0")]

#[cfg(feature = "aws")]
pub mod aws;

#[cfg(feature = "azure")]
pub mod azure;

mod control;
mod error;
pub mod inventory;

#[cfg(test)]
mod testing;

pub use error::{ProviderError, ProviderResult};
pub use inventory::{Inventory, InventoryResolver};

use posture_engine::{CheckRegistry, CheckRegistryBuilder, Result};

/// Register every check compiled into this build
pub fn register_all(registry: &mut CheckRegistryBuilder) -> Result<()> {
    #[cfg(feature = "aws")]
    registry.register_module(aws::register)?;
    #[cfg(feature = "azure")]
    registry.register_module(azure::register)?;
    Ok(())
}

/// Registry holding every check compiled into this build
pub fn registry() -> Result<CheckRegistry> {
    let mut builder = CheckRegistry::builder();
    register_all(&mut builder)?;
    Ok(builder.build())
}

#[cfg(all(test, feature = "aws", feature = "azure"))]
mod tests {
    use super::*;
    use posture_core::Provider;
    use posture_engine::CheckFilter;

    #[test]
    fn test_register_all() {
        let registry = registry().unwrap();
        assert_eq!(registry.len(), 20);
        assert_eq!(
            registry.services(),
            ["cloudtrail", "ec2", "neptune", "secretsmanager", "azure.virtual_machines"]
        );
        assert_eq!(registry.resolve(Provider::Azure, &CheckFilter::new()).len(), 6);
        assert!(registry.resolve(Provider::Gcp, &CheckFilter::new()).is_empty());
    }

    #[test]
    fn test_register_all_twice_is_rejected() {
        let mut builder = CheckRegistry::builder();
        register_all(&mut builder).unwrap();
        let err = register_all(&mut builder).unwrap_err();
        assert!(err.is_registration_error());
    }

    #[test]
    fn test_check_names_are_unique() {
        let registry = registry().unwrap();
        let mut names: Vec<_> = registry.iter().map(|c| c.qualified_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), registry.len());
    }
}
