//! Check registration and lookup.
//!
//! Check modules register themselves into a [`CheckRegistryBuilder`] during
//! startup; [`CheckRegistryBuilder::build`] freezes the result into an
//! immutable [`CheckRegistry`] that the scheduler shares across tasks.

use crate::config::CheckFilter;
use crate::context::{CheckContext, ExecutionScope};
use crate::emit::FindingEmitter;
use async_trait::async_trait;
use posture_core::{CheckError, PostureError, Provider, Result};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A single audit routine
///
/// A check inspects one scope and pushes zero or more raw findings into the
/// emitter. Findings emitted before an error is returned are kept.
#[async_trait]
pub trait Check: Send + Sync {
    /// Unique name within the check's service
    fn name(&self) -> &'static str;

    /// Provider the check audits
    fn provider(&self) -> Provider;

    /// Short human-readable description, used as the default finding title
    fn title(&self) -> &'static str {
        self.name()
    }

    /// Context the check needs before it can run
    fn parameters(&self) -> Parameters {
        Parameters::default()
    }

    /// Audit the scope
    async fn run(&self, ctx: &CheckContext, findings: &mut FindingEmitter)
        -> std::result::Result<(), CheckError>;
}

/// Context a check declares it needs
///
/// The scheduler fails the invocation up front when a declared parameter is
/// missing from the scope instead of letting the check discover it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Parameters {
    /// A provider credential
    pub credential: bool,
    /// A non-empty account id
    pub account: bool,
    /// A non-empty region
    pub region: bool,
    /// A non-empty partition
    pub partition: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self::all()
    }
}

impl Parameters {
    /// Credential, account, region and partition
    #[must_use]
    pub const fn all() -> Self {
        Self {
            credential: true,
            account: true,
            region: true,
            partition: true,
        }
    }

    /// Nothing; the check works from the scope identity alone
    #[must_use]
    pub const fn none() -> Self {
        Self {
            credential: false,
            account: false,
            region: false,
            partition: false,
        }
    }

    /// Everything except a credential
    #[must_use]
    pub const fn without_credential() -> Self {
        Self {
            credential: false,
            ..Self::all()
        }
    }

    /// Return the first declared parameter the scope cannot satisfy
    #[must_use]
    pub fn unmet(&self, scope: &ExecutionScope) -> Option<CheckError> {
        let s = scope.scope();
        if self.credential && scope.credential().is_none() {
            return Some(CheckError::MissingCredential {
                provider: s.provider.to_string(),
            });
        }
        let missing = if self.account && s.account_id.is_empty() {
            Some("account")
        } else if self.region && s.region.is_empty() {
            Some("region")
        } else if self.partition && s.partition.is_empty() {
            Some("partition")
        } else {
            None
        };
        missing.map(|what| CheckError::Failed(format!("scope has no {what}")))
    }
}

/// A registered check together with its registration metadata
pub struct CheckDescriptor {
    service: String,
    name: &'static str,
    title: &'static str,
    provider: Provider,
    parameters: Parameters,
    check: Arc<dyn Check>,
}

impl CheckDescriptor {
    /// Service the check was registered under
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Check name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Default finding title
    #[must_use]
    pub const fn title(&self) -> &'static str {
        self.title
    }

    /// Provider the check audits
    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.provider
    }

    /// Declared parameters
    #[must_use]
    pub const fn parameters(&self) -> Parameters {
        self.parameters
    }

    /// `service/check`, used as the finding generator id
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.service, self.name)
    }

    /// The check itself
    #[must_use]
    pub fn check(&self) -> &dyn Check {
        self.check.as_ref()
    }
}

impl fmt::Debug for CheckDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckDescriptor")
            .field("service", &self.service)
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// Immutable set of registered checks, in registration order
#[derive(Debug, Default)]
pub struct CheckRegistry {
    checks: Vec<Arc<CheckDescriptor>>,
    services: Vec<String>,
}

impl CheckRegistry {
    /// Start building a registry
    #[must_use]
    pub fn builder() -> CheckRegistryBuilder {
        CheckRegistryBuilder::new()
    }

    /// Number of registered checks
    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Returns true if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Service names, in first-registration order
    #[must_use]
    pub fn services(&self) -> &[String] {
        &self.services
    }

    /// Every registered check, in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CheckDescriptor>> {
        self.checks.iter()
    }

    /// Find a check by service and name
    #[must_use]
    pub fn get(&self, service: &str, name: &str) -> Option<&Arc<CheckDescriptor>> {
        self.checks
            .iter()
            .find(|c| c.service == service && c.name == name)
    }

    /// Checks for the given services, or all checks when `services` is `None`.
    ///
    /// Order is registration order regardless of the order services are named.
    #[must_use]
    pub fn lookup<S: AsRef<str>>(&self, services: Option<&[S]>) -> Vec<Arc<CheckDescriptor>> {
        self.checks
            .iter()
            .filter(|c| services.map_or(true, |s| s.iter().any(|s| s.as_ref() == c.service)))
            .cloned()
            .collect()
    }

    /// Checks for `provider` that pass `filter`, in registration order
    #[must_use]
    pub fn resolve(&self, provider: Provider, filter: &CheckFilter) -> Vec<Arc<CheckDescriptor>> {
        self.checks
            .iter()
            .filter(|c| c.provider == provider && filter.allows(&c.service, c.name))
            .cloned()
            .collect()
    }
}

/// Mutable registry used during startup
#[derive(Debug, Default)]
pub struct CheckRegistryBuilder {
    registry: CheckRegistry,
    seen: HashSet<(String, &'static str)>,
}

impl CheckRegistryBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check under a service.
    ///
    /// Fails if the service already has a check with the same name.
    pub fn register(&mut self, service: &str, check: impl Check + 'static) -> Result<&mut Self> {
        self.register_arc(service, Arc::new(check))
    }

    /// Register an already shared check
    pub fn register_arc(&mut self, service: &str, check: Arc<dyn Check>) -> Result<&mut Self> {
        let name = check.name();
        if !self.seen.insert((service.to_string(), name)) {
            return Err(PostureError::DuplicateCheck {
                service: service.to_string(),
                check: name.to_string(),
            });
        }
        if !self.registry.services.iter().any(|s| s == service) {
            self.registry.services.push(service.to_string());
        }

        debug!(service, check = name, "registered check");
        self.registry.checks.push(Arc::new(CheckDescriptor {
            service: service.to_string(),
            name,
            title: check.title(),
            provider: check.provider(),
            parameters: check.parameters(),
            check,
        }));
        Ok(self)
    }

    /// Run a check module's registration function
    pub fn register_module<F>(&mut self, module: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        module(self)?;
        Ok(self)
    }

    /// Number of checks registered so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Returns true if nothing has been registered yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Freeze the registry
    #[must_use]
    pub fn build(self) -> CheckRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posture_core::Scope;

    struct Named(&'static str, Provider);

    #[async_trait]
    impl Check for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn provider(&self) -> Provider {
            self.1
        }

        async fn run(
            &self,
            _ctx: &CheckContext,
            _findings: &mut FindingEmitter,
        ) -> std::result::Result<(), CheckError> {
            Ok(())
        }
    }

    fn registry() -> CheckRegistry {
        let mut builder = CheckRegistry::builder();
        builder
            .register("cloudtrail", Named("ct_1", Provider::Aws))
            .unwrap()
            .register("ec2", Named("ec2_1", Provider::Aws))
            .unwrap()
            .register("cloudtrail", Named("ct_2", Provider::Aws))
            .unwrap()
            .register("virtual_machines", Named("vm_1", Provider::Azure))
            .unwrap();
        builder.build()
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut builder = CheckRegistry::builder();
        builder.register("cloudtrail", Named("ct_1", Provider::Aws)).unwrap();
        let err = builder
            .register("cloudtrail", Named("ct_1", Provider::Aws))
            .unwrap_err();
        assert!(err.is_registration_error());

        // Same name under another service is fine
        builder.register("ec2", Named("ct_1", Provider::Aws)).unwrap();
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn test_lookup_keeps_registration_order() {
        let registry = registry();
        let names: Vec<_> = registry.lookup::<&str>(None).iter().map(|c| c.name()).collect();
        assert_eq!(names, ["ct_1", "ec2_1", "ct_2", "vm_1"]);

        let names: Vec<_> = registry
            .lookup(Some(&["ec2", "cloudtrail"][..]))
            .iter()
            .map(|c| c.name())
            .collect();
        assert_eq!(names, ["ct_1", "ec2_1", "ct_2"]);

        assert!(registry.lookup(Some(&["s3"][..])).is_empty());
        assert_eq!(registry.services(), ["cloudtrail", "ec2", "virtual_machines"]);
    }

    #[test]
    fn test_resolve_by_provider_and_filter() {
        let registry = registry();
        let aws = registry.resolve(Provider::Aws, &CheckFilter::new());
        assert_eq!(aws.len(), 3);

        let azure = registry.resolve(Provider::Azure, &CheckFilter::new());
        assert_eq!(azure[0].qualified_name(), "virtual_machines/vm_1");

        let filtered = registry.resolve(Provider::Aws, &CheckFilter::new().service("ec2"));
        assert_eq!(filtered.len(), 1);
        assert!(registry.get("cloudtrail", "ct_2").is_some());
    }

    #[test]
    fn test_parameters_unmet() {
        let scope = ExecutionScope::new(Scope::new(Provider::Aws, "111", "us-east-1"), None);
        assert!(matches!(
            Parameters::all().unmet(&scope),
            Some(CheckError::MissingCredential { .. })
        ));
        assert!(Parameters::without_credential().unmet(&scope).is_none());

        let regionless = ExecutionScope::new(Scope::new(Provider::Aws, "111", ""), None);
        assert_eq!(
            Parameters::without_credential().unmet(&regionless),
            Some(CheckError::Failed("scope has no region".into()))
        );
        assert!(Parameters::none().unmet(&regionless).is_none());
    }
}
