//! OpenID Provider discovery.

use serde::{Deserialize, Serialize};
use tracing::instrument;
use xavyo_policy::TechnicalProfile;

use crate::context::AdapterContext;
use crate::error::{AdapterError, AdapterResult};
use crate::outbound::{checked_url, get_json, timeout_for};

/// Endpoints taken from the provider's discovery document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredEndpoints {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    issuer: String,
    authorization_endpoint: String,
    #[serde(default)]
    token_endpoint: Option<String>,
    jwks_uri: String,
}

/// Discovery document URL of a profile: `METADATA` as given, or derived
/// from `issuer`.
pub(crate) fn metadata_url(profile: &TechnicalProfile) -> AdapterResult<String> {
    if let Some(url) = profile.metadata("METADATA") {
        return Ok(url.to_string());
    }
    profile
        .metadata("issuer")
        .map(well_known_url)
        .ok_or_else(|| {
            AdapterError::config(format!(
                "technical profile '{}' has neither METADATA nor issuer",
                profile.id
            ))
        })
}

#[must_use]
pub fn well_known_url(issuer: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    )
}

#[instrument(skip(ctx, profile), fields(technical_profile = %profile.id))]
pub(crate) async fn discover(
    ctx: &AdapterContext,
    profile: &TechnicalProfile,
) -> AdapterResult<DiscoveredEndpoints> {
    let allow_insecure = ctx.settings.allow_insecure_endpoints;
    let url = checked_url(&metadata_url(profile)?, allow_insecure)?;
    let metadata: ProviderMetadata = get_json(ctx, &url, timeout_for(profile)).await?;

    let token_endpoint = metadata
        .token_endpoint
        .ok_or_else(|| AdapterError::malformed(format!("{url} has no token_endpoint")))?;

    // Endpoints advertised by the document are subject to the same policy
    // as the document itself.
    for endpoint in [
        &metadata.authorization_endpoint,
        &token_endpoint,
        &metadata.jwks_uri,
    ] {
        checked_url(endpoint, allow_insecure)?;
    }

    tracing::debug!(
        issuer = %metadata.issuer,
        authorization_endpoint = %metadata.authorization_endpoint,
        "Discovered OpenID provider"
    );

    Ok(DiscoveredEndpoints {
        issuer: metadata.issuer,
        authorization_endpoint: metadata.authorization_endpoint,
        token_endpoint,
        jwks_uri: metadata.jwks_uri,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_url_strips_trailing_slash() {
        assert_eq!(
            well_known_url("https://login.contoso.com/"),
            "https://login.contoso.com/.well-known/openid-configuration"
        );
    }

    #[test]
    fn metadata_url_prefers_explicit_metadata() {
        let mut profile: TechnicalProfile = serde_json::from_value(serde_json::json!({
            "id": "Contoso-OpenIdConnect",
            "protocol": "OpenIdConnect",
            "metadata": { "issuer": "https://login.contoso.com" }
        }))
        .unwrap();
        assert_eq!(
            metadata_url(&profile).unwrap(),
            "https://login.contoso.com/.well-known/openid-configuration"
        );

        profile.metadata.insert(
            "METADATA".to_string(),
            "https://login.contoso.com/v2/.well-known/openid-configuration".to_string(),
        );
        assert!(metadata_url(&profile).unwrap().contains("/v2/"));

        profile.metadata.clear();
        assert!(matches!(
            metadata_url(&profile),
            Err(AdapterError::Configuration(_))
        ));
    }
}
