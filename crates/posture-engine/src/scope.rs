//! Expansion of run targets into execution scopes.

use crate::config::{ProviderTarget, RegionSelection};
use crate::context::Credential;
use crate::result::SkippedScope;
use async_trait::async_trait;
use posture_core::{Provider, Scope};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

/// Why a provider adapter refused a scope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeRejection {
    /// The region exists but is not enabled for the account
    #[error("region {0} is not enabled for this account")]
    RegionNotEnabled(String),

    /// The provider does not know the region
    #[error("unknown region {0}")]
    UnknownRegion(String),

    /// The account cannot be reached with the available credentials
    #[error("account is not accessible: {0}")]
    AccountUnavailable(String),

    /// The adapter does not handle this provider
    #[error("provider {0} is not supported by this adapter")]
    UnsupportedProvider(Provider),
}

/// Scope-resolution half of a provider adapter
#[async_trait]
pub trait ScopeResolver: Send + Sync {
    /// Every region the provider supports for the account, used for `"all"`
    async fn regions(&self, provider: Provider, account_id: &str)
        -> Result<Vec<String>, ScopeRejection>;

    /// Validate a scope and return the credential its checks will use
    async fn resolve(&self, scope: &Scope) -> Result<Option<Credential>, ScopeRejection>;
}

/// A scope that passed resolution
#[derive(Debug, Clone)]
pub struct PlannedScope {
    /// The scope
    pub scope: Scope,
    /// Credential handle for its checks
    pub credential: Option<Credential>,
}

/// Output of scope expansion
#[derive(Debug, Default)]
pub struct ScopePlan {
    /// Scopes to audit, in deterministic order
    pub scopes: Vec<PlannedScope>,
    /// Combinations the adapter refused
    pub skipped: Vec<SkippedScope>,
}

impl ScopePlan {
    /// Planned scopes without their credentials
    #[must_use]
    pub fn scope_list(&self) -> Vec<&Scope> {
        self.scopes.iter().map(|p| &p.scope).collect()
    }
}

/// Turns provider targets into execution scopes
///
/// The result is the product of accounts and regions for each target, in
/// target, account and region order, minus whatever the resolver refuses.
/// Repeated combinations are kept once.
pub struct ScopeExpander<'a> {
    resolver: &'a dyn ScopeResolver,
}

impl<'a> ScopeExpander<'a> {
    /// Create an expander over a resolver
    #[must_use]
    pub const fn new(resolver: &'a dyn ScopeResolver) -> Self {
        Self { resolver }
    }

    /// Expand every target
    pub async fn expand(&self, targets: &[ProviderTarget]) -> ScopePlan {
        let mut plan = ScopePlan::default();
        let mut seen = HashSet::new();

        for target in targets {
            for account in &target.accounts {
                let account = account.trim();
                if account.is_empty() {
                    continue;
                }

                let regions = match &target.regions {
                    RegionSelection::Regions(regions) => regions.clone(),
                    RegionSelection::All => {
                        match self.resolver.regions(target.provider, account).await {
                            Ok(regions) => regions,
                            Err(e) => {
                                warn!(provider = %target.provider, account, error = %e, "skipping account");
                                plan.skipped.push(SkippedScope {
                                    provider: target.provider,
                                    account_id: account.to_string(),
                                    region: None,
                                    reason: e.to_string(),
                                });
                                continue;
                            }
                        }
                    }
                };

                for region in regions {
                    if !seen.insert((target.provider, account.to_string(), region.clone())) {
                        debug!(provider = %target.provider, account, region = %region, "duplicate scope ignored");
                        continue;
                    }

                    let mut scope = Scope::new(target.provider, account, region);
                    if let Some(partition) = &target.partition {
                        scope = scope.with_partition(partition.clone());
                    }

                    match self.resolver.resolve(&scope).await {
                        Ok(credential) => plan.scopes.push(PlannedScope { scope, credential }),
                        Err(e) => {
                            warn!(scope = %scope, error = %e, "skipping scope");
                            plan.skipped.push(SkippedScope {
                                provider: scope.provider,
                                account_id: scope.account_id,
                                region: Some(scope.region),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        plan
    }
}

/// Resolver backed by fixed region lists
///
/// Accepts every scope unless its region is disabled, and hands out the same
/// credential everywhere. Useful for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    regions: BTreeMap<Provider, Vec<String>>,
    disabled: HashSet<(Provider, String, String)>,
    credential: Option<Credential>,
}

impl StaticResolver {
    /// Create a resolver with no known regions
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the regions reported for `"all"`
    #[must_use]
    pub fn regions<I, S>(mut self, provider: Provider, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions
            .insert(provider, regions.into_iter().map(Into::into).collect());
        self
    }

    /// Mark a region as not enabled for an account
    #[must_use]
    pub fn disable(
        mut self,
        provider: Provider,
        account: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        self.disabled.insert((provider, account.into(), region.into()));
        self
    }

    /// Credential handed to every scope
    #[must_use]
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

#[async_trait]
impl ScopeResolver for StaticResolver {
    async fn regions(
        &self,
        provider: Provider,
        _account_id: &str,
    ) -> Result<Vec<String>, ScopeRejection> {
        self.regions
            .get(&provider)
            .cloned()
            .ok_or(ScopeRejection::UnsupportedProvider(provider))
    }

    async fn resolve(&self, scope: &Scope) -> Result<Option<Credential>, ScopeRejection> {
        let key = (scope.provider, scope.account_id.clone(), scope.region.clone());
        if self.disabled.contains(&key) {
            return Err(ScopeRejection::RegionNotEnabled(scope.region.clone()));
        }
        Ok(self.credential.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(plan: &ScopePlan) -> Vec<String> {
        plan.scope_list().iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_cartesian_product_in_order() {
        let resolver = StaticResolver::new();
        let targets = [ProviderTarget::new(Provider::Aws)
            .account("111")
            .account("222")
            .region("us-east-1")
            .region("us-west-2")];

        let plan = ScopeExpander::new(&resolver).expand(&targets).await;
        assert_eq!(
            names(&plan),
            [
                "aws/111/us-east-1",
                "aws/111/us-west-2",
                "aws/222/us-east-1",
                "aws/222/us-west-2",
            ]
        );
        assert!(plan.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_region_is_skipped() {
        let resolver = StaticResolver::new().disable(Provider::Aws, "222", "us-west-2");
        let targets = [ProviderTarget::new(Provider::Aws)
            .account("111")
            .account("222")
            .region("us-east-1")
            .region("us-west-2")];

        let plan = ScopeExpander::new(&resolver).expand(&targets).await;
        assert_eq!(plan.scopes.len(), 3);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].account_id, "222");
        assert_eq!(plan.skipped[0].region.as_deref(), Some("us-west-2"));
    }

    #[tokio::test]
    async fn test_all_regions_and_partition_override() {
        let resolver = StaticResolver::new().regions(Provider::Azure, ["eastus", "westeurope"]);
        let targets = [
            ProviderTarget::new(Provider::Azure).account("sub-1"),
            ProviderTarget::new(Provider::Gcp).account("proj-1"),
            ProviderTarget::new(Provider::Aws)
                .account("111")
                .region("us-east-1")
                .partition("aws-iso"),
        ];

        let plan = ScopeExpander::new(&resolver).expand(&targets).await;
        assert_eq!(
            names(&plan),
            ["azure/sub-1/eastus", "azure/sub-1/westeurope", "aws/111/us-east-1"]
        );
        assert_eq!(plan.scopes[2].scope.partition, "aws-iso");
        // No region list for GCP
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].provider, Provider::Gcp);
        assert_eq!(plan.skipped[0].region, None);
    }

    #[tokio::test]
    async fn test_repeated_combinations_kept_once() {
        let resolver = StaticResolver::new();
        let target = ProviderTarget::new(Provider::Aws).account("111").region("us-east-1");
        let plan = ScopeExpander::new(&resolver)
            .expand(&[target.clone(), target])
            .await;
        assert_eq!(plan.scopes.len(), 1);
    }
}
