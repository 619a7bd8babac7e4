//! Adapter errors.

use thiserror::Error;

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Failure of one call to an external identity provider.
///
/// Only [`AdapterError::UnreachableEndpoint`] is worth retrying; everything
/// else will fail the same way on a second attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("signature validation failed: {0}")]
    SignatureInvalid(String),

    #[error("response expired: {0}")]
    Expired(String),

    #[error("endpoint unreachable: {endpoint}: {detail}")]
    UnreachableEndpoint { endpoint: String, detail: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Missing metadata or key, or metadata the adapter cannot use.
    #[error("technical profile misconfigured: {0}")]
    Configuration(String),
}

impl AdapterError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UnreachableEndpoint { .. })
    }

    pub(crate) fn unreachable(endpoint: impl Into<String>, detail: impl ToString) -> Self {
        Self::UnreachableEndpoint {
            endpoint: endpoint.into(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedResponse(detail.into())
    }

    pub(crate) fn config(detail: impl Into<String>) -> Self {
        Self::Configuration(detail.into())
    }
}

impl From<xavyo_secrets::SecretError> for AdapterError {
    fn from(e: xavyo_secrets::SecretError) -> Self {
        match e {
            xavyo_secrets::SecretError::ProviderUnavailable { provider, detail } => {
                Self::UnreachableEndpoint {
                    endpoint: format!("secret provider '{provider}'"),
                    detail,
                }
            }
            other => Self::Configuration(other.to_string()),
        }
    }
}
