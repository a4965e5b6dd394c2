use posture_core::CheckError;
use thiserror::Error;

/// Result type alias for provider adapter calls
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Errors from provider adapter calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The caller is not allowed to perform the operation
    #[error("access denied for {operation}: {message}")]
    AccessDenied {
        /// API operation
        operation: String,
        /// Message from the provider
        message: String,
    },

    /// The provider throttled the request
    #[error("{operation} was throttled")]
    Throttled {
        /// API operation
        operation: String,
    },

    /// A named resource does not exist
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Any other API failure
    #[error("{operation} failed: {message}")]
    Api {
        /// API operation
        operation: String,
        /// Message from the provider
        message: String,
    },
}

impl ProviderError {
    /// Build an error for `operation` from a short failure code
    ///
    /// `AccessDenied` and `Throttling` map to their variants, anything else
    /// becomes [`ProviderError::Api`].
    #[must_use]
    pub fn from_code(operation: &str, code: &str) -> Self {
        match code {
            "AccessDenied" | "AccessDeniedException" | "AuthorizationFailed" => Self::AccessDenied {
                operation: operation.to_string(),
                message: code.to_string(),
            },
            "Throttling" | "ThrottlingException" | "TooManyRequests" => Self::Throttled {
                operation: operation.to_string(),
            },
            _ => Self::Api {
                operation: operation.to_string(),
                message: code.to_string(),
            },
        }
    }
}

impl From<ProviderError> for CheckError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Throttled { .. } => Self::transient(err.to_string()),
            _ => Self::provider(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code() {
        assert!(matches!(
            ProviderError::from_code("DescribeTrails", "AccessDenied"),
            ProviderError::AccessDenied { .. }
        ));
        assert_eq!(
            ProviderError::from_code("ListSecrets", "Throttling").to_string(),
            "ListSecrets was throttled"
        );
        assert_eq!(
            ProviderError::from_code("DescribeInstances", "InternalError").to_string(),
            "DescribeInstances failed: InternalError"
        );
    }

    #[test]
    fn test_into_check_error() {
        let err: CheckError = ProviderError::from_code("ListSecrets", "Throttling").into();
        assert!(err.is_retryable());

        let err: CheckError = ProviderError::NotFound("default.neptune1".into()).into();
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "provider call failed: resource not found: default.neptune1"
        );
    }
}
