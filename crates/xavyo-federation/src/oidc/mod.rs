//! OpenID Connect authorization-code flow with PKCE.

pub mod discovery;
mod id_token;

use openidconnect::{CsrfToken, Nonce, PkceCodeChallenge};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use xavyo_claims::ClaimsDelta;

pub use discovery::DiscoveredEndpoints;

use crate::context::{
    split_relay, AdapterContext, Exchange, OutboundRedirect, OutboundRequest, PendingState,
    RawResponse, RelayBinding,
};
use crate::error::{AdapterError, AdapterResult};
use crate::mapping::{input_parameters, map_partner_claims};
use crate::outbound::{checked_url, send_json, timeout_for};

const DEFAULT_SCOPE: &str = "openid";

/// What the callback is checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcPending {
    pub csrf: String,
    pub nonce: String,
    pub code_verifier: String,
    pub redirect_uri: String,
    pub endpoints: DiscoveredEndpoints,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

fn client_id<'a>(exchange: &'a Exchange<'_>) -> AdapterResult<&'a str> {
    exchange.profile.metadata("client_id").ok_or_else(|| {
        AdapterError::config(format!(
            "technical profile '{}' has no client_id",
            exchange.profile.id
        ))
    })
}

#[instrument(skip_all, fields(technical_profile = %exchange.profile.id))]
pub(crate) async fn build_request(
    exchange: &Exchange<'_>,
    ctx: &AdapterContext,
) -> AdapterResult<OutboundRequest> {
    let client_id = client_id(exchange)?;
    let endpoints = discovery::discover(ctx, exchange.profile).await?;

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let csrf = CsrfToken::new_random();
    let nonce = Nonce::new_random();
    let redirect_uri = ctx.settings.callback_url();

    let mut url = checked_url(
        &endpoints.authorization_endpoint,
        ctx.settings.allow_insecure_endpoints,
    )?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "code");
        query.append_pair("client_id", client_id);
        query.append_pair("redirect_uri", &redirect_uri);
        query.append_pair(
            "scope",
            exchange.profile.metadata("scope").unwrap_or(DEFAULT_SCOPE),
        );
        query.append_pair("nonce", nonce.secret());
        query.append_pair("code_challenge", pkce_challenge.as_str());
        query.append_pair("code_challenge_method", "S256");
        for (name, value) in input_parameters(exchange) {
            query.append_pair(&name, &value);
        }
    }

    tracing::info!(issuer = %endpoints.issuer, "Redirecting to OpenID provider");

    Ok(OutboundRequest {
        redirect: Some(OutboundRedirect {
            endpoint: url,
            binding: RelayBinding::Oidc {
                csrf: csrf.secret().clone(),
            },
        }),
        pending: Some(PendingState::Oidc(OidcPending {
            csrf: csrf.secret().clone(),
            nonce: nonce.secret().clone(),
            code_verifier: pkce_verifier.secret().clone(),
            redirect_uri,
            endpoints,
        })),
    })
}

#[instrument(skip_all, fields(technical_profile = %exchange.profile.id))]
pub(crate) async fn parse_response(
    exchange: &Exchange<'_>,
    raw: &RawResponse,
    pending: Option<&PendingState>,
    ctx: &AdapterContext,
) -> AdapterResult<ClaimsDelta> {
    let Some(PendingState::Oidc(pending)) = pending else {
        return Err(AdapterError::malformed(
            "callback does not belong to a pending OpenID Connect request",
        ));
    };

    if let Some(error) = raw.param("error") {
        let description = raw.param("error_description").unwrap_or_default();
        return Err(AdapterError::malformed(format!(
            "provider returned error '{error}': {description}"
        )));
    }

    let binding = raw.param("state").map(split_relay).and_then(|(_, b)| b);
    if binding != Some(pending.csrf.as_str()) {
        return Err(AdapterError::malformed("state mismatch"));
    }

    let code = raw
        .param("code")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AdapterError::malformed("callback has no authorization code"))?;

    let client_id = client_id(exchange)?;
    let client_secret = match exchange.profile.key("client_secret") {
        Some(key_id) => Some(
            ctx.keys
                .resolve_key(key_id)
                .await?
                .secret_str()?
                .to_string(),
        ),
        None => None,
    };

    let timeout = timeout_for(exchange.profile);
    let token_url = checked_url(
        &pending.endpoints.token_endpoint,
        ctx.settings.allow_insecure_endpoints,
    )?;
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", client_id),
        ("redirect_uri", pending.redirect_uri.as_str()),
        ("code_verifier", pending.code_verifier.as_str()),
    ];
    if let Some(secret) = client_secret.as_deref() {
        form.push(("client_secret", secret));
    }
    let tokens: TokenResponse = send_json(
        ctx.http.post(token_url.clone()).form(&form).timeout(timeout),
        &token_url,
    )
    .await?;

    let id_token = tokens
        .id_token
        .ok_or_else(|| AdapterError::malformed("token response has no id_token"))?;
    let claims = id_token::verify(
        ctx,
        &pending.endpoints,
        &id_token,
        client_id,
        &pending.nonce,
        timeout,
    )
    .await?;

    let delta = map_partner_claims(exchange, &claims)?;
    tracing::info!(claims = delta.len(), "OpenID Connect exchange completed");
    Ok(delta)
}
