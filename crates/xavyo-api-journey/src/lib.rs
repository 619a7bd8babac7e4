//! Relying-party gateway for the journey engine
//!
//! This crate exposes the journey engine over HTTP:
//! - OIDC authorization requests (`response_type=id_token`) and SAML
//!   `AuthnRequest`s start journeys
//! - Selection, OIDC callback and SAML ACS endpoints resume them from the
//!   continuity token
//! - Completed journeys are answered with an RS256 ID token or a signed
//!   SAML response; failed ones with a generic error code only
//! - Discovery, JWKS and SAML metadata publish the issuing key

pub mod error;
pub mod handlers;
pub mod issuer;
pub mod middleware;
pub mod models;
pub mod router;
pub mod state;

pub use error::{JourneyApiError, JourneyApiResult};
pub use issuer::{IdTokenParams, IssuerError, TokenIssuer};
pub use router::journey_router;
pub use state::{GatewaySettings, JourneyApiState};
