//! Caller-facing error codes.
//!
//! Internal failures carry rich detail (partner messages, key ids, XML
//! fragments) that must never reach a relying party. Every terminal failure
//! is reduced to one of these codes before it crosses the HTTP boundary.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Generic, non-sensitive error code returned to relying parties.
///
/// The string forms follow the OAuth 2.0 error registry where one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The caller's request was malformed or named an unknown client.
    InvalidRequest,
    /// An external identity provider rejected or failed the sign-in.
    AccessDenied,
    /// An external endpoint could not be reached.
    TemporarilyUnavailable,
    /// The journey state expired or was rejected; the journey must restart.
    SessionExpired,
    /// Anything else.
    ServerError,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::AccessDenied => "access_denied",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::SessionExpired => "session_expired",
            Self::ServerError => "server_error",
        }
    }

    /// Human-readable text safe to show to end users.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "The request is missing a parameter or is otherwise invalid.",
            Self::AccessDenied => "The identity provider did not complete the sign-in.",
            Self::TemporarilyUnavailable => {
                "The identity provider is temporarily unavailable. Please try again later."
            }
            Self::SessionExpired => "Your sign-in session expired. Please start again.",
            Self::ServerError => "An internal error occurred.",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON error body shared by every HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorCode,
    pub error_description: String,
}

impl From<ErrorCode> for ErrorBody {
    fn from(code: ErrorCode) -> Self {
        Self {
            error: code,
            error_description: code.description().to_string(),
        }
    }
}
