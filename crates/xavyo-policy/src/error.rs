//! Policy load errors.
//!
//! Every variant is fatal: a policy set that produces one is never served.

use crate::schema::ClaimDataType;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// The kind of entity a dangling reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    BasePolicy,
    ClaimType,
    ClaimsTransformation,
    ClaimsProvider,
    TechnicalProfile,
    ClaimsExchange,
    UserJourney,
}

impl Display for ReferenceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::BasePolicy => "base policy",
            Self::ClaimType => "claim type",
            Self::ClaimsTransformation => "claims transformation",
            Self::ClaimsProvider => "claims provider",
            Self::TechnicalProfile => "technical profile",
            Self::ClaimsExchange => "claims exchange",
            Self::UserJourney => "user journey",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("cyclic policy inheritance: {}", chain.join(" -> "))]
    CyclicInheritance { chain: Vec<String> },

    #[error("unresolved {kind} '{id}' referenced by {referenced_by}")]
    UnresolvedReference {
        kind: ReferenceKind,
        id: String,
        referenced_by: String,
    },

    #[error("duplicate step order {order} in user journey '{journey}'")]
    DuplicateStepOrder { journey: String, order: u32 },

    #[error("step order in user journey '{journey}' is not increasing: {previous} then {next}")]
    NonMonotonicSteps {
        journey: String,
        previous: u32,
        next: u32,
    },

    #[error("claims transformation '{id}' has unknown kind '{kind}'")]
    UnknownTransformationKind { id: String, kind: String },

    #[error("claims transformation '{id}' is invalid: {reason}")]
    InvalidTransformation { id: String, reason: String },

    #[error("default '{value}' of {context} is not a valid {data_type}")]
    InvalidDefault {
        context: String,
        value: String,
        data_type: ClaimDataType,
    },

    #[error("duplicate {kind} id '{id}' in policy '{policy}'")]
    DuplicateId {
        kind: ReferenceKind,
        id: String,
        policy: String,
    },

    #[error("invalid policy document {source_name}: {message}")]
    InvalidDocument {
        source_name: String,
        message: String,
    },

    #[error("user journey '{journey}' is invalid: {reason}")]
    InvalidJourney { journey: String, reason: String },
}

impl PolicyError {
    pub(crate) fn unresolved(
        kind: ReferenceKind,
        id: impl Into<String>,
        referenced_by: impl Into<String>,
    ) -> Self {
        Self::UnresolvedReference {
            kind,
            id: id.into(),
            referenced_by: referenced_by.into(),
        }
    }

    pub(crate) fn invalid_transformation(id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTransformation {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_journey(journey: &str, reason: impl Into<String>) -> Self {
        Self::InvalidJourney {
            journey: journey.to_string(),
            reason: reason.into(),
        }
    }
}

pub type PolicyResult<T> = Result<T, PolicyError>;
