//! Session-management and proprietary profiles: no partner round trip.

use xavyo_claims::ClaimsDelta;

use crate::context::{Exchange, OutboundRequest, RawResponse};
use crate::mapping::map_from_bag;

pub(crate) fn build_request() -> OutboundRequest {
    OutboundRequest::immediate()
}

/// Output claims come from the remembered SSO claims when there are any,
/// and from the journey's own bag otherwise.
pub(crate) fn parse_response(exchange: &Exchange<'_>, raw: &RawResponse) -> ClaimsDelta {
    let delta = match raw {
        RawResponse::Remembered(remembered) => map_from_bag(exchange, remembered),
        _ => map_from_bag(exchange, exchange.bag),
    };
    tracing::debug!(
        technical_profile = %exchange.profile.id,
        claims = delta.len(),
        remembered = matches!(raw, RawResponse::Remembered(_)),
        "Session claims resolved"
    );
    delta
}
