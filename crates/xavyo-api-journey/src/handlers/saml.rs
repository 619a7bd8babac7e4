//! SAML identity provider endpoints of a policy.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::debug;
use xavyo_federation::saml::authn_request::parse_redirect;
use xavyo_journey::RelyingPartyRequest;
use xavyo_policy::Protocol;

use super::outcome::begin;
use super::{expect_protocol, registered_client};
use crate::error::{JourneyApiError, JourneyApiResult};
use crate::issuer::TokenIssuer;
use crate::models::SamlLoginQuery;
use crate::state::JourneyApiState;

/// `GET /{policy}/samlp/sso/login`: SP-initiated SSO over the
/// HTTP-Redirect binding.
pub async fn saml_login(
    State(state): State<JourneyApiState>,
    Path(policy_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<SamlLoginQuery>,
) -> Response {
    match handle_login(&state, &policy_id, &headers, query).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn handle_login(
    state: &JourneyApiState,
    policy_id: &str,
    headers: &HeaderMap,
    query: SamlLoginQuery,
) -> JourneyApiResult<Response> {
    let rp = state.policy(policy_id)?.relying_party();
    expect_protocol(policy_id, rp, Protocol::Saml2)?;

    let authn_request = parse_redirect(&query.saml_request)
        .map_err(|e| JourneyApiError::InvalidRequest(e.to_string()))?;
    let client = rp
        .client(&authn_request.issuer)
        .ok_or_else(|| JourneyApiError::UnknownClient(authn_request.issuer.clone()))?;
    // Without an explicit ACS the first registered one is used.
    let acs_url = match authn_request.acs_url {
        Some(url) => url,
        None => client.redirect_uris.first().cloned().ok_or_else(|| {
            JourneyApiError::InvalidRequest(format!(
                "no assertion consumer service registered for '{}'",
                client.client_id
            ))
        })?,
    };
    registered_client(rp, &authn_request.issuer, &acs_url)?;
    debug!(
        request_id = %authn_request.id,
        issuer = %authn_request.issuer,
        "AuthnRequest accepted"
    );

    let request = RelyingPartyRequest {
        protocol: Protocol::Saml2,
        client_id: authn_request.issuer,
        reply_to: acs_url,
        state: query.relay_state,
        nonce: None,
        request_id: Some(authn_request.id),
    };
    begin(state, policy_id, request, &query.extra, headers).await
}

/// `GET /{policy}/samlp/metadata`
pub async fn saml_metadata(
    State(state): State<JourneyApiState>,
    Path(policy_id): Path<String>,
) -> Response {
    match metadata_xml(&state, &policy_id) {
        Ok(xml) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
            xml,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

fn metadata_xml(state: &JourneyApiState, policy_id: &str) -> JourneyApiResult<String> {
    let rp = state.policy(policy_id)?.relying_party();
    expect_protocol(policy_id, rp, Protocol::Saml2)?;
    let base = state.base_url();
    let entity_id = TokenIssuer::saml_entity_id(base, policy_id);
    let sso_url = format!("{base}/{policy_id}/samlp/sso/login");
    Ok(state.issuer.saml_metadata(&entity_id, &sso_url)?)
}
