use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when fetching from the upstream API.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The shared rate budget is exhausted. The caller must not update any
    /// cache metadata and should back off at least `retry_after`.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The credential was rejected by upstream (revoked or expired token).
    #[error("credential rejected by upstream")]
    CredentialRevoked,

    /// The requested resource does not exist or is not visible.
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// Network or connection error (transient).
    #[error("network error: {message}")]
    Network { message: String },

    /// Unexpected API response (transient).
    #[error("API error: {message}")]
    Api { message: String },
}

impl GatewayError {
    /// Create a network error.
    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an API error.
    #[inline]
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    /// Create a not found error.
    #[inline]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Check if this error is a rate limit error (retry next cycle, no state
    /// mutation).
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Check if this error is permanent for the acting credential.
    ///
    /// A permanent error suspends the identity's polling until it is
    /// re-authorized; everything else is retried on the next timer tick.
    #[inline]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::CredentialRevoked)
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
