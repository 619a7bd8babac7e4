//! Shared state of the gateway handlers.

use std::sync::Arc;

use xavyo_journey::{ContinuityService, JourneyEngine, DEFAULT_SSO_TTL_SECS};
use xavyo_policy::ResolvedPolicy;

use crate::error::{JourneyApiError, JourneyApiResult};
use crate::issuer::TokenIssuer;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Adds `Secure` to the SSO cookie. Off only for plain-HTTP development.
    pub secure_cookies: bool,
    pub sso_lifetime_secs: i64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            secure_cookies: true,
            sso_lifetime_secs: DEFAULT_SSO_TTL_SECS,
        }
    }
}

#[derive(Clone)]
pub struct JourneyApiState {
    pub engine: JourneyEngine,
    pub continuity: Arc<ContinuityService>,
    pub issuer: Arc<TokenIssuer>,
    pub settings: GatewaySettings,
}

impl JourneyApiState {
    #[must_use]
    pub fn new(
        engine: JourneyEngine,
        continuity: Arc<ContinuityService>,
        issuer: Arc<TokenIssuer>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            engine,
            continuity,
            issuer,
            settings,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.engine
            .adapters()
            .settings
            .public_base_url
            .trim_end_matches('/')
    }

    pub(crate) fn policy(&self, policy_id: &str) -> JourneyApiResult<&ResolvedPolicy> {
        self.engine
            .graph()
            .policy(policy_id)
            .ok_or_else(|| JourneyApiError::UnknownPolicy(policy_id.to_string()))
    }
}
