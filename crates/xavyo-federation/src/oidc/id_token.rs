//! ID token verification against the provider's JWKS.

use std::collections::BTreeMap;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::Value;

use super::discovery::DiscoveredEndpoints;
use crate::context::AdapterContext;
use crate::error::{AdapterError, AdapterResult};
use crate::outbound::{checked_url, get_json};

/// Verifies signature (RS256), issuer, audience, expiry and nonce, and
/// returns the token's claims.
pub(crate) async fn verify(
    ctx: &AdapterContext,
    endpoints: &DiscoveredEndpoints,
    id_token: &str,
    client_id: &str,
    expected_nonce: &str,
    timeout: Duration,
) -> AdapterResult<BTreeMap<String, Value>> {
    let header = decode_header(id_token)
        .map_err(|e| AdapterError::malformed(format!("invalid ID token header: {e}")))?;
    if header.alg != Algorithm::RS256 {
        return Err(AdapterError::SignatureInvalid(format!(
            "unsupported ID token algorithm {:?}",
            header.alg
        )));
    }

    let jwks_url = checked_url(&endpoints.jwks_uri, ctx.settings.allow_insecure_endpoints)?;
    let jwks: JwkSet = get_json(ctx, &jwks_url, timeout).await?;
    let jwk = match header.kid.as_deref() {
        Some(kid) => jwks.find(kid),
        None => jwks.keys.first(),
    }
    .ok_or_else(|| {
        AdapterError::SignatureInvalid(format!(
            "no JWKS key matches kid {:?}",
            header.kid.as_deref().unwrap_or("<none>")
        ))
    })?;
    let key = DecodingKey::from_jwk(jwk)
        .map_err(|e| AdapterError::SignatureInvalid(format!("unusable JWKS key: {e}")))?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.leeway = u64::try_from(ctx.settings.clock_skew_secs).unwrap_or(0);
    validation.set_issuer(&[endpoints.issuer.as_str()]);
    validation.set_audience(&[client_id]);
    validation.set_required_spec_claims(&["exp", "iss", "aud"]);

    let claims = decode::<BTreeMap<String, Value>>(id_token, &key, &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AdapterError::Expired("ID token has expired".into()),
            ErrorKind::ImmatureSignature => AdapterError::Expired("ID token is not yet valid".into()),
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidAlgorithm => AdapterError::SignatureInvalid(e.to_string()),
            ErrorKind::InvalidIssuer => {
                AdapterError::SignatureInvalid("ID token issuer does not match provider".into())
            }
            ErrorKind::InvalidAudience => {
                AdapterError::SignatureInvalid("ID token audience does not contain client_id".into())
            }
            _ => AdapterError::malformed(format!("invalid ID token: {e}")),
        })?
        .claims;

    if claims.get("nonce").and_then(Value::as_str) != Some(expected_nonce) {
        tracing::warn!("Nonce mismatch in ID token, possible replay");
        return Err(AdapterError::malformed("ID token nonce mismatch"));
    }

    Ok(claims)
}
