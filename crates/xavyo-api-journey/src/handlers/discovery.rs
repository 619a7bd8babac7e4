//! OIDC discovery endpoints of a policy.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use xavyo_policy::Protocol;

use super::expect_protocol;
use crate::issuer::TokenIssuer;
use crate::models::OpenIdConfiguration;
use crate::state::JourneyApiState;

/// `GET /{policy}/v2.0/.well-known/openid-configuration`
pub async fn openid_configuration(
    State(state): State<JourneyApiState>,
    Path(policy_id): Path<String>,
) -> Response {
    let rp = match state.policy(&policy_id) {
        Ok(policy) => policy.relying_party(),
        Err(e) => return e.into_response(),
    };
    if let Err(e) = expect_protocol(&policy_id, rp, Protocol::OpenIdConnect) {
        return e.into_response();
    }
    let base = state.base_url();
    let claims = rp
        .output_claims
        .iter()
        .map(|c| c.partner_name().to_string())
        .collect();
    Json(OpenIdConfiguration::new(
        base,
        &policy_id,
        &TokenIssuer::oidc_issuer(base, &policy_id),
        claims,
    ))
    .into_response()
}

/// `GET /{policy}/discovery/v2.0/keys`
pub async fn jwks(State(state): State<JourneyApiState>, Path(policy_id): Path<String>) -> Response {
    match state.policy(&policy_id) {
        Ok(_) => Json(state.issuer.jwks()).into_response(),
        Err(e) => e.into_response(),
    }
}
