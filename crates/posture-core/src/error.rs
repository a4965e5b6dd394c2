use std::time::Duration;
use thiserror::Error;

/// Result type alias for run-level operations
pub type Result<T> = std::result::Result<T, PostureError>;

/// Errors that abort startup or a whole run
#[derive(Error, Debug)]
pub enum PostureError {
    /// The same check name was registered twice under one service
    #[error("check `{check}` is already registered for service `{service}`")]
    DuplicateCheck {
        /// Service the check was registered under
        service: String,
        /// Name of the duplicated check
        check: String,
    },

    /// Provider name could not be parsed
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Provider adapter failed outside of any check
    #[error("provider error: {0}")]
    Provider(String),

    /// File I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing/serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl PostureError {
    /// Returns true if this error came from check registration
    #[must_use]
    pub const fn is_registration_error(&self) -> bool {
        matches!(self, Self::DuplicateCheck { .. })
    }
}

/// Errors raised while executing a single check against a single scope.
///
/// Cloneable so that one failed cache computation can be handed to every
/// caller that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    /// A provider API call failed
    #[error("provider call failed: {message}")]
    Provider {
        /// Error message from the provider adapter
        message: String,
        /// Whether the call may succeed if repeated
        retryable: bool,
    },

    /// The scope has no credential but the check requires one
    #[error("no {provider} credential available for this scope")]
    MissingCredential {
        /// Provider the credential was expected for
        provider: String,
    },

    /// The scope credential is not of the type the check expects
    #[error("scope credential is not a {expected}")]
    CredentialType {
        /// Type name the check asked for
        expected: &'static str,
    },

    /// Resource data returned by the provider was malformed
    #[error("invalid resource data: {0}")]
    InvalidResource(String),

    /// The check exceeded its per-invocation timeout
    #[error("check timed out after {0:?}")]
    Timeout(Duration),

    /// The check panicked
    #[error("check panicked: {0}")]
    Panicked(String),

    /// Any other failure raised by the check body
    #[error("{0}")]
    Failed(String),
}

impl CheckError {
    /// Create a provider error
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a provider error that may succeed on retry
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: true,
        }
    }

    /// Returns true if the error is retryable
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { retryable: true, .. } | Self::Timeout(_))
    }
}

/// Reasons a raw finding is rejected by the normalizer
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationError {
    /// The finding has no provider-scoped identity
    #[error("finding has no id")]
    MissingId,

    /// The finding has no compliance status
    #[error("finding has no compliance status")]
    MissingStatus,

    /// The finding references no resource, or the resource id is empty
    #[error("finding has no resource reference")]
    MissingResource,
}
