//! Transformation errors.
//!
//! Policies are validated at load time, so any of these at runtime means
//! the engine broke an invariant.

use thiserror::Error;
use xavyo_policy::ClaimDataType;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformationError {
    #[error("claim '{claim_type}' expects {expected}, got {actual}")]
    TypeMismatch {
        claim_type: String,
        expected: ClaimDataType,
        actual: ClaimDataType,
    },

    #[error("claim '{claim_type}' is not declared in the claims schema")]
    UnknownClaim { claim_type: String },

    #[error("claims transformation '{id}' is not defined")]
    MissingTransformation { id: String },

    #[error("claims transformation '{id}' cannot run: {reason}")]
    InvalidParameter { id: String, reason: String },
}
