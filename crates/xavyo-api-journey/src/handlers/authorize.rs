//! OIDC authorization endpoint of a policy.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use xavyo_journey::RelyingPartyRequest;
use xavyo_policy::Protocol;

use super::outcome::begin;
use super::{expect_protocol, registered_client};
use crate::error::{JourneyApiError, JourneyApiResult};
use crate::models::AuthorizeQuery;
use crate::state::JourneyApiState;

/// `GET /{policy}/oauth2/v2.0/authorize`
///
/// Only `response_type=id_token` is served; the token comes back in the
/// redirect URI fragment. Errors before the client and redirect URI are
/// validated render an error page instead of redirecting.
pub async fn authorize(
    State(state): State<JourneyApiState>,
    Path(policy_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    match handle_authorize(&state, &policy_id, &headers, query).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn handle_authorize(
    state: &JourneyApiState,
    policy_id: &str,
    headers: &HeaderMap,
    query: AuthorizeQuery,
) -> JourneyApiResult<Response> {
    let rp = state.policy(policy_id)?.relying_party();
    expect_protocol(policy_id, rp, Protocol::OpenIdConnect)?;
    registered_client(rp, &query.client_id, &query.redirect_uri)?;
    if query.response_type != "id_token" {
        return Err(JourneyApiError::UnsupportedResponseType(query.response_type));
    }

    let request = RelyingPartyRequest {
        protocol: Protocol::OpenIdConnect,
        client_id: query.client_id,
        reply_to: query.redirect_uri,
        state: query.state,
        nonce: query.nonce,
        request_id: None,
    };
    begin(state, policy_id, request, &query.extra, headers).await
}
