//! OIDC discovery models.

use serde::{Deserialize, Serialize};

/// `OpenID` Connect discovery document of one policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<String>,
    pub response_modes_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    /// Partner names of the relying party's output claims.
    pub claims_supported: Vec<String>,
}

impl OpenIdConfiguration {
    /// Discovery document for `policy_id` served under `base_url`.
    #[must_use]
    pub fn new(base_url: &str, policy_id: &str, issuer: &str, claims: Vec<String>) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            issuer: issuer.to_string(),
            authorization_endpoint: format!("{base}/{policy_id}/oauth2/v2.0/authorize"),
            jwks_uri: format!("{base}/{policy_id}/discovery/v2.0/keys"),
            response_types_supported: vec!["id_token".to_string()],
            response_modes_supported: vec!["fragment".to_string()],
            subject_types_supported: vec!["public".to_string()],
            id_token_signing_alg_values_supported: vec!["RS256".to_string()],
            scopes_supported: vec!["openid".to_string()],
            claims_supported: claims,
        }
    }
}

/// JSON Web Key for the JWKS endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub alg: String,
    /// RSA modulus (base64url encoded).
    pub n: String,
    /// RSA exponent (base64url encoded).
    pub e: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn add_key(mut self, key: Jwk) -> Self {
        self.keys.push(key);
        self
    }
}
