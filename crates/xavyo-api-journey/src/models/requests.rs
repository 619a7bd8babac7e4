//! Query parameters of the relying-party and journey endpoints.

use std::collections::BTreeMap;

use serde::Deserialize;

/// OIDC authorization request.
///
/// Parameters not named here are kept in `extra`; the relying party's input
/// claims are read from them.
#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    pub state: Option<String>,
    pub nonce: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// SAML HTTP-Redirect binding request.
#[derive(Debug, Deserialize)]
pub struct SamlLoginQuery {
    #[serde(rename = "SAMLRequest")]
    pub saml_request: String,
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// Provider choice at a selection step.
#[derive(Debug, Deserialize)]
pub struct SelectQuery {
    /// Continuity token of the suspended journey.
    pub ct: String,
    pub choice: String,
}
