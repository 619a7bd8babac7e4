//! HTTP handlers for the gateway endpoints

pub mod authorize;
pub mod discovery;
pub mod health;
pub mod journey;
pub(crate) mod outcome;
pub mod saml;

pub use authorize::authorize;
pub use discovery::{jwks, openid_configuration};
pub use health::health;
pub use journey::{acs, callback, select};
pub use saml::{saml_login, saml_metadata};

use xavyo_policy::{Protocol, RelyingParty, RelyingPartyClient};

use crate::error::{JourneyApiError, JourneyApiResult};

/// Checks that the policy's relying party speaks `protocol`.
pub(crate) fn expect_protocol(
    policy_id: &str,
    rp: &RelyingParty,
    protocol: Protocol,
) -> JourneyApiResult<()> {
    if rp.protocol == protocol {
        Ok(())
    } else {
        Err(JourneyApiError::ProtocolMismatch {
            policy: policy_id.to_string(),
            protocol,
        })
    }
}

/// The registered client, provided `reply_to` is one of its redirect
/// URIs or assertion consumer services.
pub(crate) fn registered_client<'a>(
    rp: &'a RelyingParty,
    client_id: &str,
    reply_to: &str,
) -> JourneyApiResult<&'a RelyingPartyClient> {
    let client = rp
        .client(client_id)
        .ok_or_else(|| JourneyApiError::UnknownClient(client_id.to_string()))?;
    if client.redirect_uris.iter().any(|uri| uri == reply_to) {
        Ok(client)
    } else {
        Err(JourneyApiError::ReplyToMismatch {
            client_id: client_id.to_string(),
            reply_to: reply_to.to_string(),
        })
    }
}
