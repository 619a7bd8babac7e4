//! Protocol adapters for the journey engine.
//!
//! A claims-exchange step hands its technical profile to a
//! [`ProtocolAdapter`] in two halves:
//!
//! 1. [`ProtocolAdapter::build_request`] prepares the browser redirect to the
//!    external identity provider (OIDC authorization request, SAML
//!    `AuthnRequest`) and the [`PendingState`] needed to check the answer.
//!    The engine persists the pending state in the continuity token and
//!    completes the redirect with [`OutboundRedirect::location`].
//! 2. [`ProtocolAdapter::parse_response`] validates what came back and maps
//!    partner claims onto the profile's output claims.
//!
//! Session-management and proprietary profiles resolve immediately.
//!
//! Only [`AdapterError::UnreachableEndpoint`] is retryable.

pub mod adapter;
pub mod context;
pub mod error;
mod mapping;
pub mod oidc;
mod outbound;
pub mod saml;
mod session;

pub use adapter::ProtocolAdapter;
pub use context::{
    split_relay, AdapterContext, AdapterSettings, Exchange, OutboundRedirect, OutboundRequest,
    PendingState, RawResponse, DEFAULT_CLOCK_SKEW_SECS, DEFAULT_TIMEOUT_SECS, RELAY_SEPARATOR,
};
pub use error::{AdapterError, AdapterResult};
pub use oidc::{DiscoveredEndpoints, OidcPending};
pub use saml::assertion::{AssertionParams, ResponseBuilder};
pub use saml::xmldsig::SigningCredentials;
pub use saml::SamlPending;
