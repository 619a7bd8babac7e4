//! Gateway route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{
    acs, authorize, callback, health, jwks, openid_configuration, saml_login, saml_metadata,
    select,
};
use crate::state::JourneyApiState;

/// Relying-party, journey and discovery routes.
///
/// None of them require authentication: the continuity token is the only
/// credential a suspended journey accepts.
pub fn journey_router(state: JourneyApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Relying-party requests
        .route("/:policy/oauth2/v2.0/authorize", get(authorize))
        .route("/:policy/samlp/sso/login", get(saml_login))
        // Browser returns to a suspended journey
        .route("/journey/select", get(select))
        .route("/journey/callback", get(callback))
        .route("/journey/acs", post(acs))
        // Metadata
        .route(
            "/:policy/v2.0/.well-known/openid-configuration",
            get(openid_configuration),
        )
        .route("/:policy/discovery/v2.0/keys", get(jwks))
        .route("/:policy/samlp/metadata", get(saml_metadata))
        .with_state(state)
}
