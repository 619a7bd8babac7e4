//! Mapping between partner claim names and policy claim types.

use std::collections::BTreeMap;

use serde_json::Value;
use xavyo_claims::{ClaimsBag, ClaimsDelta};
use xavyo_policy::{ClaimRef, ClaimValue, ClaimsSchema};

use crate::context::Exchange;
use crate::error::{AdapterError, AdapterResult};

/// Applies the profile's output claims to what the partner returned.
///
/// Partner claims without a mapping are dropped. A mapped claim missing from
/// the response takes its declared default, or stays unset.
pub(crate) fn map_partner_claims(
    exchange: &Exchange<'_>,
    partner: &BTreeMap<String, Value>,
) -> AdapterResult<ClaimsDelta> {
    let mut delta = ClaimsDelta::new();
    for output in &exchange.profile.output_claims {
        let Some(claim_type) = exchange.schema.get(&output.claim_type) else {
            continue;
        };
        let value = match partner.get(output.partner_name()) {
            Some(raw) => Some(ClaimValue::coerce_json(raw, claim_type.data_type).map_err(|e| {
                AdapterError::malformed(format!(
                    "partner claim '{}' for '{}': {e}",
                    output.partner_name(),
                    output.claim_type
                ))
            })?),
            None => default_for(output, exchange.schema),
        };
        if let Some(value) = value {
            delta.push(output.claim_type.clone(), value);
        }
    }

    let unmapped = partner
        .keys()
        .filter(|name| {
            !exchange
                .profile
                .output_claims
                .iter()
                .any(|o| o.partner_name() == name.as_str())
        })
        .count();
    tracing::debug!(
        technical_profile = %exchange.profile.id,
        mapped = delta.len(),
        unmapped,
        "Partner claims mapped"
    );
    Ok(delta)
}

/// Output claims taken from an existing bag instead of a partner response.
pub(crate) fn map_from_bag(exchange: &Exchange<'_>, source: &ClaimsBag) -> ClaimsDelta {
    exchange
        .profile
        .output_claims
        .iter()
        .filter_map(|output| {
            let expected = exchange.schema.get(&output.claim_type)?.data_type;
            source
                .get(&output.claim_type)
                .filter(|v| v.data_type() == expected)
                .cloned()
                .or_else(|| default_for(output, exchange.schema))
                .map(|v| (output.claim_type.clone(), v))
        })
        .collect()
}

/// Input claims rendered as partner parameters, in declaration order.
pub(crate) fn input_parameters(exchange: &Exchange<'_>) -> Vec<(String, String)> {
    exchange
        .profile
        .input_claims
        .iter()
        .filter_map(|input| {
            exchange
                .bag
                .get(&input.claim_type)
                .cloned()
                .or_else(|| default_for(input, exchange.schema))
                .map(|v| (input.partner_name().to_string(), v.to_claim_string()))
        })
        .collect()
}

fn default_for(claim: &ClaimRef, schema: &ClaimsSchema) -> Option<ClaimValue> {
    let claim_type = schema.get(&claim.claim_type)?;
    match &claim.default {
        Some(raw) => ClaimValue::coerce(raw, claim_type.data_type).ok(),
        None => claim_type.default_value(),
    }
}
