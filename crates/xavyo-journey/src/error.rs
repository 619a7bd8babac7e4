//! Engine errors and the terminal failure classification.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use xavyo_core::ErrorCode;
use xavyo_federation::AdapterError;

use crate::continuity::ContinuityError;

/// Why a journey ended in `Failed`.
///
/// Stored in the snapshot and mapped to a generic [`ErrorCode`] for the
/// caller. Partner detail never lives here; it is logged where the failure
/// happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// An external endpoint stayed unreachable after every retry.
    ProviderUnavailable,
    /// The provider's answer failed validation or carried an error.
    ProviderRejected,
    /// The provider's answer was outside its validity window.
    ResponseExpired,
    /// A technical profile is missing metadata or keys.
    Misconfigured,
    /// An engine invariant was violated.
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn code(self) -> ErrorCode {
        match self {
            Self::ProviderUnavailable => ErrorCode::TemporarilyUnavailable,
            Self::ProviderRejected | Self::ResponseExpired => ErrorCode::AccessDenied,
            Self::Misconfigured | Self::Internal => ErrorCode::ServerError,
        }
    }
}

impl From<&AdapterError> for ErrorKind {
    fn from(e: &AdapterError) -> Self {
        match e {
            AdapterError::UnreachableEndpoint { .. } => Self::ProviderUnavailable,
            AdapterError::SignatureInvalid(_) | AdapterError::MalformedResponse(_) => {
                Self::ProviderRejected
            }
            AdapterError::Expired(_) => Self::ResponseExpired,
            AdapterError::Configuration(_) => Self::Misconfigured,
        }
    }
}

/// Errors returned to the caller of the engine instead of a journey
/// outcome: the request itself could not be applied to the journey.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown policy '{0}'")]
    UnknownPolicy(String),

    #[error("policy '{policy}' has no journey '{journey}'")]
    UnknownJourney { policy: String, journey: String },

    #[error("journey is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    #[error("'{0}' is not one of the offered claims exchanges")]
    InvalidSelection(String),

    #[error("invalid request parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error(transparent)]
    Continuity(#[from] ContinuityError),
}

impl EngineError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Continuity(_) => ErrorCode::SessionExpired,
            Self::UnknownPolicy(_)
            | Self::UnknownJourney { .. }
            | Self::InvalidState { .. }
            | Self::InvalidSelection(_)
            | Self::InvalidParameter { .. } => ErrorCode::InvalidRequest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_errors_classify() {
        let unreachable = AdapterError::UnreachableEndpoint {
            endpoint: "https://idp".into(),
            detail: "refused".into(),
        };
        assert_eq!(ErrorKind::from(&unreachable), ErrorKind::ProviderUnavailable);
        assert_eq!(
            ErrorKind::from(&AdapterError::SignatureInvalid("x".into())),
            ErrorKind::ProviderRejected
        );
        assert_eq!(
            ErrorKind::from(&AdapterError::Expired("x".into())),
            ErrorKind::ResponseExpired
        );
        assert_eq!(
            ErrorKind::from(&AdapterError::Configuration("x".into())),
            ErrorKind::Misconfigured
        );
    }

    #[test]
    fn kinds_map_to_generic_codes() {
        assert_eq!(ErrorKind::ProviderUnavailable.code(), ErrorCode::TemporarilyUnavailable);
        assert_eq!(ErrorKind::ResponseExpired.code(), ErrorCode::AccessDenied);
        assert_eq!(ErrorKind::Internal.code(), ErrorCode::ServerError);
        assert_eq!(
            EngineError::InvalidSelection("x".into()).code(),
            ErrorCode::InvalidRequest
        );
    }
}
