//! Gateway error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use xavyo_core::{ErrorBody, ErrorCode};
use xavyo_journey::{ContinuityError, EngineError};
use xavyo_policy::Protocol;

use crate::issuer::IssuerError;

/// Result type for gateway operations
pub type JourneyApiResult<T> = Result<T, JourneyApiError>;

/// Errors answered with an error page instead of a redirect to the caller.
///
/// Only the generic [`ErrorCode`] reaches the browser; the detail is logged.
#[derive(Debug, Error)]
pub enum JourneyApiError {
    #[error("unknown policy '{0}'")]
    UnknownPolicy(String),

    #[error("policy '{policy}' does not accept {protocol} requests")]
    ProtocolMismatch { policy: String, protocol: Protocol },

    #[error("unknown client '{0}'")]
    UnknownClient(String),

    #[error("'{reply_to}' is not registered for client '{client_id}'")]
    ReplyToMismatch { client_id: String, reply_to: String },

    #[error("unsupported response_type '{0}'")]
    UnsupportedResponseType(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Continuity(#[from] ContinuityError),

    #[error(transparent)]
    Issuance(#[from] IssuerError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl JourneyApiError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownPolicy(_)
            | Self::ProtocolMismatch { .. }
            | Self::UnknownClient(_)
            | Self::ReplyToMismatch { .. }
            | Self::UnsupportedResponseType(_)
            | Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::Engine(e) => e.code(),
            Self::Continuity(ContinuityError::Key(_) | ContinuityError::Seal(_)) => {
                ErrorCode::ServerError
            }
            Self::Continuity(_) => ErrorCode::SessionExpired,
            Self::Issuance(_) | Self::Internal(_) => ErrorCode::ServerError,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::UnknownPolicy(_) => StatusCode::NOT_FOUND,
            _ => status_for(self.code()),
        }
    }
}

pub(crate) fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::TemporarilyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::AccessDenied => StatusCode::FORBIDDEN,
        ErrorCode::InvalidRequest | ErrorCode::SessionExpired => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for JourneyApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Journey request failed");
        } else {
            tracing::warn!(error = %self, "Journey request rejected");
        }
        (status, Json(ErrorBody::from(self.code()))).into_response()
    }
}
