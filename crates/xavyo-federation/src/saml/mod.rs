//! SAML 2.0 web browser SSO: `AuthnRequest` over the HTTP-Redirect binding,
//! signed `Response` over HTTP-POST.
//!
//! Profile metadata:
//!
//! | key            | meaning                                   |
//! |----------------|-------------------------------------------|
//! | `IdpSsoUrl`    | SSO endpoint of the identity provider     |
//! | `IdpEntityId`  | expected `Issuer` of responses            |
//! | `IssuerUri`    | our entity id, if not the service default |
//! | `NameIdFormat` | requested `NameIDPolicy` format           |
//!
//! Keys: `idp_certificate` (required) verifies responses, `signing`
//! (optional) signs requests.

pub mod assertion;
pub mod authn_request;
mod c14n;
pub mod response;
pub mod xmldsig;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use xavyo_claims::ClaimsDelta;

use crate::context::{
    AdapterContext, Exchange, OutboundRedirect, OutboundRequest, PendingState, RawResponse,
    RelayBinding,
};
use crate::error::{AdapterError, AdapterResult};
use crate::mapping::map_partner_claims;
use crate::outbound::checked_url;
use authn_request::AuthnRequestParams;
use response::{ParsedAssertion, ParsedResponse, STATUS_SUCCESS};

const NAMEID_UNSPECIFIED: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";

/// Maximum size of a posted `SAMLResponse` before decoding (256 KB).
const MAX_RESPONSE_SIZE: usize = 256 * 1024;

/// What the assertion consumer service checks the response against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamlPending {
    pub request_id: String,
    pub issued_at: DateTime<Utc>,
}

pub(crate) fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn required<'a>(exchange: &'a Exchange<'_>, key: &str) -> AdapterResult<&'a str> {
    exchange.profile.metadata(key).ok_or_else(|| {
        AdapterError::config(format!(
            "technical profile '{}' has no {key}",
            exchange.profile.id
        ))
    })
}

#[instrument(skip_all, fields(technical_profile = %exchange.profile.id))]
pub(crate) async fn build_request(
    exchange: &Exchange<'_>,
    ctx: &AdapterContext,
) -> AdapterResult<OutboundRequest> {
    let endpoint = checked_url(
        required(exchange, "IdpSsoUrl")?,
        ctx.settings.allow_insecure_endpoints,
    )?;

    let signing_key_pem = match exchange.profile.key("signing") {
        Some(key_id) => Some(
            ctx.keys
                .resolve_key(key_id)
                .await?
                .private_key_pem()?
                .to_string(),
        ),
        None => None,
    };

    let request_id = format!("_{}", Uuid::new_v4().simple());
    let issued_at = Utc::now();
    let xml = authn_request::build_xml(&AuthnRequestParams {
        id: &request_id,
        issue_instant: issued_at,
        destination: endpoint.as_str(),
        acs_url: &ctx.settings.acs_url(),
        issuer: exchange
            .profile
            .metadata("IssuerUri")
            .unwrap_or(&ctx.settings.sp_entity_id),
        name_id_format: exchange
            .profile
            .metadata("NameIdFormat")
            .unwrap_or(NAMEID_UNSPECIFIED),
    });

    tracing::info!(
        request_id = %request_id,
        signed = signing_key_pem.is_some(),
        "Redirecting to SAML identity provider"
    );

    Ok(OutboundRequest {
        redirect: Some(OutboundRedirect {
            endpoint,
            binding: RelayBinding::Saml {
                saml_request: authn_request::deflate_encode(&xml)?,
                signing_key_pem,
            },
        }),
        pending: Some(PendingState::Saml2(SamlPending {
            request_id,
            issued_at,
        })),
    })
}

fn decode_response(raw: &RawResponse) -> AdapterResult<String> {
    let encoded = raw
        .param("SAMLResponse")
        .ok_or_else(|| AdapterError::malformed("post has no SAMLResponse"))?;
    if encoded.len() > MAX_RESPONSE_SIZE {
        return Err(AdapterError::malformed(format!(
            "SAMLResponse exceeds {MAX_RESPONSE_SIZE} bytes"
        )));
    }
    let compact: String = encoded.split_whitespace().collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| AdapterError::malformed(format!("SAMLResponse is not base64: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| AdapterError::malformed(format!("SAMLResponse is not UTF-8: {e}")))
}

fn single_assertion(parsed: ParsedResponse) -> AdapterResult<(String, ParsedAssertion)> {
    if parsed.encrypted_assertions > 0 {
        return Err(AdapterError::malformed("encrypted assertions are not supported"));
    }
    let ParsedResponse { id, mut assertions, .. } = parsed;
    match assertions.len() {
        1 => Ok((id, assertions.remove(0))),
        n => Err(AdapterError::malformed(format!(
            "expected exactly one assertion, found {n}"
        ))),
    }
}

/// Issuer, audience, `InResponseTo` and validity window of a verified
/// response.
fn check_conditions(
    exchange: &Exchange<'_>,
    ctx: &AdapterContext,
    pending: &SamlPending,
    in_response_to: Option<&str>,
    assertion: &ParsedAssertion,
    now: DateTime<Utc>,
) -> AdapterResult<()> {
    if let Some(expected) = exchange.profile.metadata("IdpEntityId") {
        if assertion.issuer.as_deref() != Some(expected) {
            return Err(AdapterError::SignatureInvalid(format!(
                "unexpected issuer {:?}",
                assertion.issuer
            )));
        }
    }

    let sp_entity_id = exchange
        .profile
        .metadata("IssuerUri")
        .unwrap_or(&ctx.settings.sp_entity_id);
    if !assertion.audiences.is_empty() && !assertion.audiences.iter().any(|a| a == sp_entity_id) {
        return Err(AdapterError::SignatureInvalid(format!(
            "assertion is not addressed to '{sp_entity_id}'"
        )));
    }

    let answered = in_response_to.or(assertion.subject_in_response_to.as_deref());
    if answered != Some(pending.request_id.as_str()) {
        tracing::warn!(
            expected = %pending.request_id,
            received = ?answered,
            "SAML response does not answer the pending request"
        );
        return Err(AdapterError::malformed(
            "InResponseTo does not match the pending request",
        ));
    }

    let skew = Duration::seconds(ctx.settings.clock_skew_secs);
    if let Some(not_before) = assertion.not_before {
        if now + skew < not_before {
            return Err(AdapterError::Expired(format!(
                "assertion not valid before {not_before}"
            )));
        }
    }
    for limit in [assertion.not_on_or_after, assertion.subject_not_on_or_after]
        .into_iter()
        .flatten()
    {
        if now - skew >= limit {
            return Err(AdapterError::Expired(format!(
                "assertion expired at {limit}"
            )));
        }
    }
    Ok(())
}

#[instrument(skip_all, fields(technical_profile = %exchange.profile.id))]
pub(crate) async fn parse_response(
    exchange: &Exchange<'_>,
    raw: &RawResponse,
    pending: Option<&PendingState>,
    ctx: &AdapterContext,
) -> AdapterResult<ClaimsDelta> {
    let Some(PendingState::Saml2(pending)) = pending else {
        return Err(AdapterError::malformed(
            "post does not belong to a pending SAML request",
        ));
    };

    let xml = decode_response(raw)?;
    let parsed = response::parse(&xml)?;
    if parsed.status.as_deref() != Some(STATUS_SUCCESS) {
        return Err(AdapterError::malformed(format!(
            "identity provider returned status {:?}",
            parsed.status
        )));
    }
    let in_response_to = parsed.in_response_to.clone();
    let (response_id, assertion) = single_assertion(parsed)?;

    let key_id = exchange.profile.key("idp_certificate").ok_or_else(|| {
        AdapterError::config(format!(
            "technical profile '{}' has no idp_certificate key",
            exchange.profile.id
        ))
    })?;
    let certificate = ctx.keys.resolve_key(key_id).await?;
    let signed = xmldsig::verify_enveloped(&xml, certificate.certificate_pem()?)?;
    if !signed.iter().any(|id| *id == response_id || *id == assertion.id) {
        return Err(AdapterError::SignatureInvalid(
            "neither the response nor the assertion is signed".to_string(),
        ));
    }

    check_conditions(
        exchange,
        ctx,
        pending,
        in_response_to.as_deref(),
        &assertion,
        Utc::now(),
    )?;

    let delta = map_partner_claims(exchange, &assertion.partner_claims())?;
    tracing::info!(
        assertion_id = %assertion.id,
        claims = delta.len(),
        "SAML exchange completed"
    );
    Ok(delta)
}
