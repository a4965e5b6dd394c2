use crate::PostureError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Cloud service provider a scope targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Amazon Web Services
    Aws,
    /// Microsoft Azure
    Azure,
    /// Google Cloud Platform
    Gcp,
}

impl Provider {
    /// All providers, in display order
    pub const ALL: [Self; 3] = [Self::Aws, Self::Azure, Self::Gcp];

    /// Lowercase identifier used in configs and finding ids
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
        }
    }

    /// Human-readable provider name used in finding product fields
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Aws => "AWS",
            Self::Azure => "Azure",
            Self::Gcp => "GCP",
        }
    }

    /// Derive the partition for a region when the run config does not name one
    #[must_use]
    pub fn default_partition(&self, region: &str) -> String {
        let partition = match self {
            Self::Aws => {
                if region.starts_with("us-gov-") {
                    "aws-us-gov"
                } else if region.starts_with("cn-") {
                    "aws-cn"
                } else if region.starts_with("us-isob-") {
                    "aws-iso-b"
                } else if region.starts_with("us-iso-") {
                    "aws-iso"
                } else {
                    "aws"
                }
            }
            Self::Azure => {
                if region.starts_with("usgov") {
                    "AzureUSGovernment"
                } else {
                    "AzureCloud"
                }
            }
            Self::Gcp => "gcp",
        };
        partition.to_string()
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = PostureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aws" | "amazon" => Ok(Self::Aws),
            "azure" | "az" => Ok(Self::Azure),
            "gcp" | "google" => Ok(Self::Gcp),
            _ => Err(PostureError::UnknownProvider(s.to_string())),
        }
    }
}
