//! Execution scope and the context handed to each check.

use crate::cache::RunCache;
use posture_core::{CheckError, Provider, Scope};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque credential handle produced by a scope resolver
///
/// The engine never looks inside; checks downcast it to whatever client or
/// session type their provider adapter hands out.
#[derive(Clone)]
pub struct Credential {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Credential {
    /// Wrap a provider session or client
    #[must_use]
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Borrow the wrapped value if it has type `T`
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Type name of the wrapped value
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.type_name)
    }
}

/// A resolved scope plus the state shared by every check running in it
#[derive(Debug)]
pub struct ExecutionScope {
    scope: Scope,
    credential: Option<Credential>,
    cache: RunCache,
}

impl ExecutionScope {
    /// Create an execution scope with a fresh cache
    #[must_use]
    pub fn new(scope: Scope, credential: Option<Credential>) -> Self {
        Self {
            scope,
            credential,
            cache: RunCache::new(),
        }
    }

    /// The scope being audited
    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Credential resolved for the scope, if any
    #[must_use]
    pub const fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Cache shared by the scope's checks
    #[must_use]
    pub const fn cache(&self) -> &RunCache {
        &self.cache
    }
}

/// Everything a check may use while it runs
#[derive(Debug, Clone)]
pub struct CheckContext {
    scope: Arc<ExecutionScope>,
}

impl CheckContext {
    /// Create a context over an execution scope
    #[must_use]
    pub const fn new(scope: Arc<ExecutionScope>) -> Self {
        Self { scope }
    }

    /// Scope under audit
    #[must_use]
    pub fn scope(&self) -> &Scope {
        self.scope.scope()
    }

    /// Cloud provider
    #[must_use]
    pub fn provider(&self) -> Provider {
        self.scope.scope.provider
    }

    /// Account, subscription or project id
    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.scope.scope.account_id
    }

    /// Region
    #[must_use]
    pub fn region(&self) -> &str {
        &self.scope.scope.region
    }

    /// Partition
    #[must_use]
    pub fn partition(&self) -> &str {
        &self.scope.scope.partition
    }

    /// Per-scope cache
    #[must_use]
    pub fn cache(&self) -> &RunCache {
        self.scope.cache()
    }

    /// Credential for the scope, downcast to the type the check expects
    pub fn credential<T: 'static>(&self) -> Result<&T, CheckError> {
        let credential = self
            .scope
            .credential()
            .ok_or_else(|| CheckError::MissingCredential {
                provider: self.provider().to_string(),
            })?;
        credential
            .downcast_ref::<T>()
            .ok_or(CheckError::CredentialType {
                expected: std::any::type_name::<T>(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Session(&'static str);

    #[test]
    fn test_credential_downcast() {
        let scope = Scope::new(Provider::Aws, "111122223333", "us-east-1");
        let ctx = CheckContext::new(Arc::new(ExecutionScope::new(
            scope,
            Some(Credential::new(Session("token"))),
        )));

        assert_eq!(ctx.credential::<Session>().unwrap(), &Session("token"));
        assert!(matches!(
            ctx.credential::<String>(),
            Err(CheckError::CredentialType { .. })
        ));
        assert_eq!(ctx.partition(), "aws");
    }

    #[test]
    fn test_missing_credential() {
        let scope = Scope::new(Provider::Azure, "sub-1", "eastus");
        let ctx = CheckContext::new(Arc::new(ExecutionScope::new(scope, None)));

        assert_eq!(
            ctx.credential::<Session>().unwrap_err(),
            CheckError::MissingCredential {
                provider: "azure".into()
            }
        );
    }

    #[test]
    fn test_credential_debug_hides_value() {
        let credential = Credential::new(Session("secret"));
        assert!(!format!("{credential:?}").contains("secret"));
    }
}
