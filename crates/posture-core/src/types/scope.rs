use super::Provider;
use serde::{Deserialize, Serialize};

/// One (provider, account, region, partition) execution context.
///
/// Accounts are AWS account ids, Azure subscription ids or GCP project ids,
/// depending on the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    /// Cloud provider
    pub provider: Provider,

    /// Account, subscription or project identifier
    pub account_id: String,

    /// Region the checks run against
    pub region: String,

    /// Provider partition (e.g. `aws`, `aws-us-gov`, `AzureCloud`)
    pub partition: String,
}

impl Scope {
    /// Create a scope, deriving the partition from the region
    #[must_use]
    pub fn new(provider: Provider, account_id: impl Into<String>, region: impl Into<String>) -> Self {
        let region = region.into();
        Self {
            provider,
            account_id: account_id.into(),
            partition: provider.default_partition(&region),
            region,
        }
    }

    /// Override the partition
    #[must_use]
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.provider, self.account_id, self.region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_display_and_partition() {
        let scope = Scope::new(Provider::Aws, "111122223333", "us-gov-east-1");
        assert_eq!(scope.partition, "aws-us-gov");
        assert_eq!(scope.to_string(), "aws/111122223333/us-gov-east-1");

        let scope = scope.with_partition("aws");
        assert_eq!(scope.partition, "aws");
    }
}
