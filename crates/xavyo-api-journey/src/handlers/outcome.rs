//! Starting and continuing journeys, and turning engine outcomes into
//! browser responses.

use std::collections::BTreeMap;

use axum::{
    http::HeaderMap,
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use tracing::{debug, info};
use xavyo_core::{CorrelationId, ErrorBody};
use xavyo_federation::RawResponse;
use xavyo_journey::{
    ContinuityError, ContinuityToken, ErrorKind, IssuedClaims, JourneySnapshot, JourneyState,
    Outcome, RelyingPartyRequest, Resumed, SelectionCandidate, SsoRecord,
};
use xavyo_policy::Protocol;

use crate::error::{status_for, JourneyApiError, JourneyApiResult};
use crate::issuer::{IdTokenParams, TokenIssuer};
use crate::middleware::sso_cookie::{extract_sso_cookie, set_sso_cookie};
use crate::models::{generate_auto_submit_form, SelectionOption, SelectionResponse};
use crate::state::JourneyApiState;

/// What a browser brings back to a suspended journey.
pub(crate) enum Continuation {
    Select(String),
    Callback(RawResponse),
}

/// Starts a journey for a validated relying-party request and runs it to
/// its first suspension.
pub(crate) async fn begin(
    state: &JourneyApiState,
    policy_id: &str,
    request: RelyingPartyRequest,
    params: &BTreeMap<String, String>,
    headers: &HeaderMap,
) -> JourneyApiResult<Response> {
    let sso = load_sso(state, headers);
    let mut snapshot = state.engine.start(policy_id, request, params, sso)?;
    let correlation_id = CorrelationId::new();
    let outcome = state.engine.advance(&mut snapshot).await?;
    respond(state, correlation_id, &snapshot, outcome)
}

/// Resumes the journey in `token` and applies `next` to it.
///
/// Expired and superseded tokens restart the journey for the original
/// relying-party request.
pub(crate) async fn resume(
    state: &JourneyApiState,
    token: &str,
    headers: &HeaderMap,
    next: Continuation,
) -> JourneyApiResult<Response> {
    let Resumed {
        correlation_id,
        mut snapshot,
        guard,
    } = match state.continuity.resume(token).await {
        Ok(resumed) => resumed,
        Err(e @ (ContinuityError::Expired | ContinuityError::Replayed)) => {
            return restart(state, token, headers, e).await
        }
        Err(e) => return Err(e.into()),
    };

    let outcome = match next {
        Continuation::Select(choice) => state.engine.select(&mut snapshot, &choice).await?,
        Continuation::Callback(raw) => state.engine.handle_callback(&mut snapshot, raw).await?,
    };
    let response = respond(state, correlation_id, &snapshot, outcome);
    drop(guard);
    response
}

async fn restart(
    state: &JourneyApiState,
    token: &str,
    headers: &HeaderMap,
    cause: ContinuityError,
) -> JourneyApiResult<Response> {
    let Some((policy_id, request)) = state.continuity.recover_request(token) else {
        return Err(cause.into());
    };
    info!(
        policy_id = %policy_id,
        client_id = %request.client_id,
        cause = %cause,
        "Restarting journey"
    );
    begin(state, &policy_id, request, &BTreeMap::new(), headers).await
}

fn load_sso(state: &JourneyApiState, headers: &HeaderMap) -> SsoRecord {
    let Some(value) = extract_sso_cookie(headers) else {
        return SsoRecord::new();
    };
    match state.continuity.open_sso(&value) {
        Ok(record) => record,
        Err(e) => {
            debug!(error = %e, "Ignoring SSO cookie");
            SsoRecord::new()
        }
    }
}

fn persist(
    state: &JourneyApiState,
    correlation_id: CorrelationId,
    snapshot: &JourneySnapshot,
) -> JourneyApiResult<ContinuityToken> {
    let policy = state.policy(&snapshot.policy_id)?;
    Ok(state
        .continuity
        .persist(correlation_id, snapshot, policy.claims_schema())?)
}

pub(crate) fn respond(
    state: &JourneyApiState,
    correlation_id: CorrelationId,
    snapshot: &JourneySnapshot,
    outcome: Outcome,
) -> JourneyApiResult<Response> {
    match outcome {
        Outcome::Redirect(redirect) => {
            let token = persist(state, correlation_id, snapshot)?;
            let location = redirect
                .location(token.as_str())
                .map_err(|e| JourneyApiError::Internal(format!("outbound redirect: {e}")))?;
            debug!(
                journey_id = %snapshot.journey_id,
                endpoint = %redirect.endpoint(),
                "Redirecting to identity provider"
            );
            Ok(Redirect::to(&location).into_response())
        }
        Outcome::Selection(candidates) => {
            let token = persist(state, correlation_id, snapshot)?;
            Ok(Json(selection(state.base_url(), snapshot, &token, candidates)).into_response())
        }
        Outcome::Completed(issued) => {
            state.continuity.finish(correlation_id);
            let mut response = deliver(state, snapshot, &issued)?;
            if !snapshot.sso.is_empty() {
                let lifetime = state.settings.sso_lifetime_secs;
                let sealed = state.continuity.seal_sso(&snapshot.sso, lifetime)?;
                set_sso_cookie(
                    response.headers_mut(),
                    &sealed,
                    lifetime,
                    state.settings.secure_cookies,
                );
            }
            info!(
                journey_id = %snapshot.journey_id,
                client_id = %snapshot.request.client_id,
                protocol = %snapshot.request.protocol,
                "Claims issued to relying party"
            );
            Ok(response)
        }
        Outcome::Failed(kind) => {
            state.continuity.finish(correlation_id);
            Ok(failure(snapshot, kind))
        }
    }
}

fn selection(
    base_url: &str,
    snapshot: &JourneySnapshot,
    token: &ContinuityToken,
    candidates: Vec<SelectionCandidate>,
) -> SelectionResponse {
    let step = match snapshot.state {
        JourneyState::AtStep(order) => order,
        _ => 0,
    };
    let ct = urlencoding::encode(token.as_str());
    let options = candidates
        .into_iter()
        .map(|c| SelectionOption {
            select_url: format!(
                "{base_url}/journey/select?ct={ct}&choice={}",
                urlencoding::encode(&c.claims_exchange)
            ),
            claims_exchange: c.claims_exchange,
            display_name: c.display_name,
        })
        .collect();
    SelectionResponse {
        journey_id: snapshot.journey_id,
        step,
        options,
    }
}

fn deliver(
    state: &JourneyApiState,
    snapshot: &JourneySnapshot,
    issued: &IssuedClaims,
) -> JourneyApiResult<Response> {
    let rp = state.policy(&snapshot.policy_id)?.relying_party();
    let lifetime_secs = i64::try_from(rp.token_lifetime_secs).unwrap_or(i64::from(u32::MAX));
    let request = &snapshot.request;

    match request.protocol {
        Protocol::Saml2 => {
            let entity_id = TokenIssuer::saml_entity_id(state.base_url(), &snapshot.policy_id);
            let saml_response = state.issuer.saml_response(
                &entity_id,
                &request.client_id,
                &request.reply_to,
                request.request_id.as_deref(),
                issued,
                lifetime_secs,
            )?;
            Ok(Html(generate_auto_submit_form(
                &request.reply_to,
                &saml_response,
                request.state.as_deref(),
            ))
            .into_response())
        }
        Protocol::OpenIdConnect | Protocol::Proprietary => {
            let issuer = TokenIssuer::oidc_issuer(state.base_url(), &snapshot.policy_id);
            let id_token = state.issuer.id_token(
                &IdTokenParams {
                    issuer: &issuer,
                    audience: &request.client_id,
                    nonce: request.nonce.as_deref(),
                    lifetime_secs,
                },
                issued,
            )?;
            let location = with_fragment(
                &request.reply_to,
                &[("id_token", Some(&id_token)), ("state", request.state.as_ref())],
            );
            Ok(Redirect::to(&location).into_response())
        }
    }
}

/// Failed journeys go back to an OIDC caller as an error redirect; SAML
/// callers get the error page. Only the generic code leaves the server.
fn failure(snapshot: &JourneySnapshot, kind: ErrorKind) -> Response {
    let code = kind.code();
    info!(
        journey_id = %snapshot.journey_id,
        client_id = %snapshot.request.client_id,
        error = %code,
        "Returning journey failure to relying party"
    );
    match snapshot.request.protocol {
        Protocol::OpenIdConnect => {
            let description = code.description().to_string();
            let location = with_fragment(
                &snapshot.request.reply_to,
                &[
                    ("error", Some(&code.as_str().to_string())),
                    ("error_description", Some(&description)),
                    ("state", snapshot.request.state.as_ref()),
                ],
            );
            Redirect::to(&location).into_response()
        }
        Protocol::Saml2 | Protocol::Proprietary => {
            (status_for(code), Json(ErrorBody::from(code))).into_response()
        }
    }
}

fn with_fragment(reply_to: &str, pairs: &[(&str, Option<&String>)]) -> String {
    let fragment = pairs
        .iter()
        .filter_map(|(name, value)| value.map(|v| format!("{name}={}", urlencoding::encode(v))))
        .collect::<Vec<_>>()
        .join("&");
    format!("{reply_to}#{fragment}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_skips_absent_values_and_encodes() {
        let token = "a.b.c".to_string();
        let state = "x y&z".to_string();
        assert_eq!(
            with_fragment(
                "https://app.example.com/cb",
                &[("id_token", Some(&token)), ("state", Some(&state))]
            ),
            "https://app.example.com/cb#id_token=a.b.c&state=x%20y%26z"
        );
        assert_eq!(
            with_fragment("https://app.example.com/cb", &[("id_token", Some(&token)), ("state", None)]),
            "https://app.example.com/cb#id_token=a.b.c"
        );
    }
}
