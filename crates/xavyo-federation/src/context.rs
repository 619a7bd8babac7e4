//! Everything an adapter call needs besides the technical profile itself.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use xavyo_claims::ClaimsBag;
use xavyo_policy::{ClaimsSchema, TechnicalProfile};
use xavyo_secrets::KeyResolver;

use crate::error::{AdapterError, AdapterResult};
use crate::oidc::OidcPending;
use crate::saml::SamlPending;

/// Per-call timeout when a profile has no `TimeoutSeconds` metadata.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Tolerated clock difference with partners (5 minutes).
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 300;

/// Separates the continuity token from the adapter's own binding value in
/// the OIDC `state` parameter. Never produced by base64url.
pub const RELAY_SEPARATOR: char = '~';

#[derive(Debug, Clone)]
pub struct AdapterSettings {
    /// Public base URL of this service; callback and ACS URLs hang off it.
    pub public_base_url: String,
    /// Entity id presented to SAML identity providers.
    pub sp_entity_id: String,
    /// Permit `http://` and private-network partner endpoints. Development
    /// and tests only.
    pub allow_insecure_endpoints: bool,
    pub clock_skew_secs: i64,
}

impl AdapterSettings {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        let public_base_url = public_base_url.into().trim_end_matches('/').to_string();
        Self {
            sp_entity_id: public_base_url.clone(),
            public_base_url,
            allow_insecure_endpoints: false,
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
        }
    }

    #[must_use]
    pub fn allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure_endpoints = allow;
        self
    }

    /// Redirect URI registered with OIDC partners.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}/journey/callback", self.public_base_url)
    }

    /// Assertion consumer service registered with SAML partners.
    #[must_use]
    pub fn acs_url(&self) -> String {
        format!("{}/journey/acs", self.public_base_url)
    }
}

/// Shared by every adapter call of the process.
#[derive(Clone)]
pub struct AdapterContext {
    pub settings: AdapterSettings,
    pub keys: Arc<dyn KeyResolver>,
    pub(crate) http: reqwest::Client,
}

impl std::fmt::Debug for AdapterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AdapterContext {
    pub fn new(settings: AdapterSettings, keys: Arc<dyn KeyResolver>) -> AdapterResult<Self> {
        // Redirects are never followed: a partner endpoint could bounce us
        // to an internal address after the URL check.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AdapterError::config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            settings,
            keys,
            http,
        })
    }
}

/// One claims exchange: the profile being invoked and the journey's claims.
#[derive(Debug, Clone, Copy)]
pub struct Exchange<'a> {
    pub profile: &'a TechnicalProfile,
    pub schema: &'a ClaimsSchema,
    pub bag: &'a ClaimsBag,
}

/// Protocol state an adapter needs to validate the response to a request it
/// built. Travels sealed inside the continuity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "camelCase")]
pub enum PendingState {
    Oidc(OidcPending),
    Saml2(SamlPending),
}

/// What came back from the partner.
#[derive(Debug, Clone, Default)]
pub enum RawResponse {
    /// No external response (session and proprietary profiles).
    #[default]
    None,
    /// Query string of a redirect callback or fields of a form post.
    Params(BTreeMap<String, String>),
    /// Claims remembered for a session-management profile.
    Remembered(ClaimsBag),
}

impl RawResponse {
    pub(crate) fn param(&self, name: &str) -> Option<&str> {
        match self {
            Self::Params(params) => params.get(name).map(String::as_str),
            _ => None,
        }
    }
}

/// Result of `build_request`.
#[derive(Debug, Clone, Default)]
pub struct OutboundRequest {
    /// Where to send the browser. `None` means the adapter needs no round
    /// trip and `parse_response` may be called right away.
    pub redirect: Option<OutboundRedirect>,
    pub pending: Option<PendingState>,
}

impl OutboundRequest {
    #[must_use]
    pub fn immediate() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn suspends(&self) -> bool {
        self.redirect.is_some()
    }
}

/// A browser redirect to a partner, completed once the continuity token
/// that will bring the user back is known.
#[derive(Clone)]
pub struct OutboundRedirect {
    pub(crate) endpoint: Url,
    pub(crate) binding: RelayBinding,
}

#[derive(Clone)]
pub(crate) enum RelayBinding {
    /// `state` = `<continuity token>~<csrf>`.
    Oidc { csrf: String },
    /// HTTP-Redirect binding; the signature covers the RelayState so it is
    /// computed here.
    Saml {
        saml_request: String,
        signing_key_pem: Option<String>,
    },
}

impl std::fmt::Debug for OutboundRedirect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundRedirect")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl OutboundRedirect {
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The full redirect URL carrying `continuity_token` as relay state.
    pub fn location(&self, continuity_token: &str) -> AdapterResult<String> {
        match &self.binding {
            RelayBinding::Oidc { csrf } => {
                let mut url = self.endpoint.clone();
                url.query_pairs_mut().append_pair(
                    "state",
                    &format!("{continuity_token}{RELAY_SEPARATOR}{csrf}"),
                );
                Ok(url.into())
            }
            RelayBinding::Saml {
                saml_request,
                signing_key_pem,
            } => crate::saml::authn_request::redirect_location(
                &self.endpoint,
                saml_request,
                continuity_token,
                signing_key_pem.as_deref(),
            ),
        }
    }
}

/// Splits a returned relay value into the continuity token and the
/// adapter's binding suffix, if any.
#[must_use]
pub fn split_relay(value: &str) -> (&str, Option<&str>) {
    match value.split_once(RELAY_SEPARATOR) {
        Some((token, binding)) => (token, Some(binding)),
        None => (value, None),
    }
}
