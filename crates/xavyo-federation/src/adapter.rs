//! Dispatch over the supported protocols.

use xavyo_claims::ClaimsDelta;
use xavyo_policy::Protocol;

use crate::context::{AdapterContext, Exchange, OutboundRequest, PendingState, RawResponse};
use crate::error::AdapterResult;
use crate::{oidc, saml, session};

/// The adapter for one technical profile, chosen by its protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolAdapter {
    Oidc,
    Saml2,
    Session,
}

impl ProtocolAdapter {
    #[must_use]
    pub fn for_protocol(protocol: Protocol) -> Self {
        match protocol {
            Protocol::OpenIdConnect => Self::Oidc,
            Protocol::Saml2 => Self::Saml2,
            Protocol::Proprietary => Self::Session,
        }
    }

    /// Prepares the outbound request. Session profiles never suspend.
    pub async fn build_request(
        self,
        exchange: &Exchange<'_>,
        ctx: &AdapterContext,
    ) -> AdapterResult<OutboundRequest> {
        match self {
            Self::Oidc => oidc::build_request(exchange, ctx).await,
            Self::Saml2 => saml::build_request(exchange, ctx).await,
            Self::Session => Ok(session::build_request()),
        }
    }

    /// Validates the partner's response and maps it onto output claims.
    pub async fn parse_response(
        self,
        exchange: &Exchange<'_>,
        raw: &RawResponse,
        pending: Option<&PendingState>,
        ctx: &AdapterContext,
    ) -> AdapterResult<ClaimsDelta> {
        match self {
            Self::Oidc => oidc::parse_response(exchange, raw, pending, ctx).await,
            Self::Saml2 => saml::parse_response(exchange, raw, pending, ctx).await,
            Self::Session => Ok(session::parse_response(exchange, raw)),
        }
    }
}
