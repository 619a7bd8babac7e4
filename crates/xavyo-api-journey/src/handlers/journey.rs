//! Endpoints a browser returns to while a journey is suspended.

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Form,
};
use xavyo_federation::{split_relay, RawResponse};

use super::outcome::{resume, Continuation};
use crate::error::{JourneyApiError, JourneyApiResult};
use crate::models::SelectQuery;
use crate::state::JourneyApiState;

/// `GET /journey/select?ct=&choice=`
pub async fn select(
    State(state): State<JourneyApiState>,
    headers: HeaderMap,
    Query(query): Query<SelectQuery>,
) -> Response {
    resume(&state, &query.ct, &headers, Continuation::Select(query.choice))
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

/// `GET /journey/callback`: authorization response of an external OIDC
/// provider. `state` carries the continuity token.
pub async fn callback(
    State(state): State<JourneyApiState>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    continue_with(&state, &headers, "state", params)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

/// `POST /journey/acs`: SAML assertion consumer service. `RelayState`
/// carries the continuity token.
pub async fn acs(
    State(state): State<JourneyApiState>,
    headers: HeaderMap,
    Form(params): Form<BTreeMap<String, String>>,
) -> Response {
    continue_with(&state, &headers, "RelayState", params)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

async fn continue_with(
    state: &JourneyApiState,
    headers: &HeaderMap,
    relay_param: &str,
    params: BTreeMap<String, String>,
) -> JourneyApiResult<Response> {
    let relay = params
        .get(relay_param)
        .ok_or_else(|| JourneyApiError::InvalidRequest(format!("missing {relay_param}")))?;
    let token = split_relay(relay).0.to_string();
    resume(
        state,
        &token,
        headers,
        Continuation::Callback(RawResponse::Params(params)),
    )
    .await
}
