//! Load-time validation of a merged policy.
//!
//! Everything the engine would otherwise discover at request time
//! (dangling references, malformed transformations, out-of-order steps) is
//! rejected here.

use crate::error::{PolicyError, PolicyResult, ReferenceKind};
use crate::graph::ResolvedPolicy;
use crate::merge::MergedPolicy;
use crate::model::{
    ClaimRef, ClaimsTransformation, PreconditionKind, Protocol, StepType, TechnicalProfile,
    TransformationKind, UserJourney,
};
use crate::schema::{ClaimDataType, ClaimValue, ClaimsSchema};
use std::collections::{BTreeMap, BTreeSet};

pub(crate) fn validate(merged: MergedPolicy) -> PolicyResult<ResolvedPolicy> {
    let Some(relying_party) = merged.relying_party else {
        return Err(PolicyError::InvalidDocument {
            source_name: merged.policy_id,
            message: "policy has no relying party".to_string(),
        });
    };
    let schema = ClaimsSchema::new(merged.claim_types);

    for claim_type in schema.iter() {
        if let Some(raw) = &claim_type.default {
            check_default(
                raw,
                claim_type.data_type,
                format!("claim type '{}'", claim_type.id),
            )?;
        }
    }

    for transformation in merged.transformations.values() {
        check_transformation(transformation, &schema)?;
    }

    let mut technical_profiles = BTreeMap::new();
    let mut profile_provider = BTreeMap::new();
    for provider in merged.providers.values() {
        for tp in &provider.technical_profiles {
            technical_profiles.insert(tp.id.clone(), tp.clone());
            profile_provider.insert(tp.id.clone(), provider.name.clone());
        }
    }
    for tp in technical_profiles.values() {
        check_technical_profile(tp, &schema, &merged.transformations, &technical_profiles)?;
    }

    for journey in merged.journeys.values() {
        check_journey(journey, &schema, &technical_profiles)?;
    }

    let owner = format!("relying party of '{}'", merged.policy_id);
    if !merged.journeys.contains_key(&relying_party.default_user_journey) {
        return Err(PolicyError::unresolved(
            ReferenceKind::UserJourney,
            &relying_party.default_user_journey,
            owner,
        ));
    }
    if relying_party.protocol == Protocol::Proprietary {
        return Err(PolicyError::InvalidDocument {
            source_name: merged.policy_id,
            message: "relying party protocol must be OpenIdConnect or SAML2".to_string(),
        });
    }
    check_claim_refs(&relying_party.input_claims, &schema, &owner)?;
    check_claim_refs(&relying_party.output_claims, &schema, &owner)?;
    require_claim(&schema, &relying_party.subject_claim, &owner)?;

    Ok(ResolvedPolicy {
        policy_id: merged.policy_id,
        inheritance_chain: merged.chain,
        schema,
        transformations: merged.transformations,
        providers: merged.providers,
        technical_profiles,
        profile_provider,
        journeys: merged.journeys,
        relying_party,
    })
}

fn check_default(raw: &str, data_type: ClaimDataType, context: String) -> PolicyResult<()> {
    ClaimValue::coerce(raw, data_type)
        .map(|_| ())
        .map_err(|_| PolicyError::InvalidDefault {
            context,
            value: raw.to_string(),
            data_type,
        })
}

fn require_claim(schema: &ClaimsSchema, id: &str, referenced_by: &str) -> PolicyResult<()> {
    if schema.contains(id) {
        Ok(())
    } else {
        Err(PolicyError::unresolved(ReferenceKind::ClaimType, id, referenced_by))
    }
}

fn check_claim_refs(refs: &[ClaimRef], schema: &ClaimsSchema, owner: &str) -> PolicyResult<()> {
    for claim in refs {
        require_claim(schema, &claim.claim_type, owner)?;
        if let (Some(raw), Some(claim_type)) = (&claim.default, schema.get(&claim.claim_type)) {
            check_default(
                raw,
                claim_type.data_type,
                format!("claim '{}' of {owner}", claim.claim_type),
            )?;
        }
    }
    Ok(())
}

fn check_technical_profile(
    tp: &TechnicalProfile,
    schema: &ClaimsSchema,
    transformations: &BTreeMap<String, ClaimsTransformation>,
    profiles: &BTreeMap<String, TechnicalProfile>,
) -> PolicyResult<()> {
    let owner = format!("technical profile '{}'", tp.id);
    check_claim_refs(&tp.input_claims, schema, &owner)?;
    check_claim_refs(&tp.output_claims, schema, &owner)?;

    for id in tp
        .input_claims_transformations
        .iter()
        .chain(&tp.output_claims_transformations)
    {
        if !transformations.contains_key(id) {
            return Err(PolicyError::unresolved(
                ReferenceKind::ClaimsTransformation,
                id,
                &owner,
            ));
        }
    }

    if let Some(sm) = &tp.session_management {
        if !profiles.contains_key(sm) {
            return Err(PolicyError::unresolved(
                ReferenceKind::TechnicalProfile,
                sm,
                &owner,
            ));
        }
    }
    Ok(())
}

fn check_transformation(t: &ClaimsTransformation, schema: &ClaimsSchema) -> PolicyResult<()> {
    if let TransformationKind::Unknown(kind) = &t.kind {
        return Err(PolicyError::UnknownTransformationKind {
            id: t.id.clone(),
            kind: kind.clone(),
        });
    }

    let owner = format!("claims transformation '{}'", t.id);
    for claim in t.input_claims.iter().chain(&t.output_claims) {
        require_claim(schema, &claim.claim_type, &owner)?;
    }

    let output = t.output().ok_or_else(|| {
        PolicyError::invalid_transformation(&t.id, "exactly one output claim is required")
    })?;
    let output_type = schema
        .get(output)
        .map_or(ClaimDataType::String, |c| c.data_type);

    let param = |name: &str| {
        t.parameter(name).ok_or_else(|| {
            PolicyError::invalid_transformation(&t.id, format!("missing input parameter '{name}'"))
        })
    };
    let input = |name: &str| {
        t.input(name).ok_or_else(|| {
            PolicyError::invalid_transformation(&t.id, format!("missing input claim '{name}'"))
        })
    };

    match &t.kind {
        TransformationKind::CreateRandomString => {
            match param("randomGeneratorType")? {
                "GUID" => expect_output_type(t, output, output_type, &[ClaimDataType::String])?,
                "INTEGER" => expect_output_type(
                    t,
                    output,
                    output_type,
                    &[ClaimDataType::String, ClaimDataType::Int],
                )?,
                other => {
                    return Err(PolicyError::invalid_transformation(
                        &t.id,
                        format!("unsupported randomGeneratorType '{other}'"),
                    ))
                }
            }
            if let Some(max) = t.parameter("maximumNumber") {
                if !max.parse::<u64>().is_ok_and(|m| m > 0) {
                    return Err(PolicyError::invalid_transformation(
                        &t.id,
                        "maximumNumber must be a positive integer",
                    ));
                }
            }
        }
        TransformationKind::FormatStringClaim => {
            param("stringFormat")?;
            input("inputClaim")?;
            expect_output_type(t, output, output_type, &[ClaimDataType::String])?;
        }
        TransformationKind::FormatStringMultipleClaims | TransformationKind::StringConcat => {
            if t.kind == TransformationKind::FormatStringMultipleClaims {
                param("stringFormat")?;
            }
            if t.input_claims.is_empty() {
                return Err(PolicyError::invalid_transformation(
                    &t.id,
                    "at least one input claim is required",
                ));
            }
            expect_output_type(t, output, output_type, &[ClaimDataType::String])?;
        }
        TransformationKind::CreateAlternativeSecurityId => {
            input("key")?;
            input("identityProvider")?;
            expect_output_type(t, output, output_type, &[ClaimDataType::String])?;
        }
        TransformationKind::CreateStringClaim => {
            param("value")?;
            expect_output_type(t, output, output_type, &[ClaimDataType::String])?;
        }
        TransformationKind::CompareClaimToValue => {
            input("inputClaim")?;
            param("compareTo")?;
            match param("operator")? {
                "equal" | "not equal" => {}
                other => {
                    return Err(PolicyError::invalid_transformation(
                        &t.id,
                        format!("unsupported operator '{other}'"),
                    ))
                }
            }
            if let Some(flag) = t.parameter("ignoreCase") {
                if ClaimValue::coerce(flag, ClaimDataType::Boolean).is_err() {
                    return Err(PolicyError::invalid_transformation(
                        &t.id,
                        "ignoreCase must be true or false",
                    ));
                }
            }
            expect_output_type(t, output, output_type, &[ClaimDataType::Boolean])?;
        }
        TransformationKind::ChangeCase => {
            input("inputClaim")?;
            match param("toCase")? {
                "LOWER" | "UPPER" => {}
                other => {
                    return Err(PolicyError::invalid_transformation(
                        &t.id,
                        format!("unsupported toCase '{other}'"),
                    ))
                }
            }
            expect_output_type(t, output, output_type, &[ClaimDataType::String])?;
        }
        TransformationKind::Unknown(_) => {}
    }
    Ok(())
}

fn expect_output_type(
    t: &ClaimsTransformation,
    output: &str,
    output_type: ClaimDataType,
    allowed: &[ClaimDataType],
) -> PolicyResult<()> {
    if allowed.contains(&output_type) {
        Ok(())
    } else {
        Err(PolicyError::invalid_transformation(
            &t.id,
            format!("output claim '{output}' cannot be of type {output_type}"),
        ))
    }
}

fn check_journey(
    journey: &UserJourney,
    schema: &ClaimsSchema,
    profiles: &BTreeMap<String, TechnicalProfile>,
) -> PolicyResult<()> {
    let id = journey.id.as_str();
    if journey.steps.is_empty() {
        return Err(PolicyError::invalid_journey(id, "journey has no steps"));
    }

    for pair in journey.steps.windows(2) {
        let (previous, next) = (pair[0].order, pair[1].order);
        if previous == next {
            return Err(PolicyError::DuplicateStepOrder {
                journey: id.to_string(),
                order: next,
            });
        }
        if next < previous {
            return Err(PolicyError::NonMonotonicSteps {
                journey: id.to_string(),
                previous,
                next,
            });
        }
    }

    let mut exchange_ids = BTreeSet::new();
    for step in &journey.steps {
        for exchange in &step.claims_exchanges {
            if !exchange_ids.insert(exchange.id.as_str()) {
                return Err(PolicyError::DuplicateId {
                    kind: ReferenceKind::ClaimsExchange,
                    id: exchange.id.clone(),
                    policy: id.to_string(),
                });
            }
        }
    }

    let last = journey.steps.len() - 1;
    let mut seen_selection = false;
    for (index, step) in journey.steps.iter().enumerate() {
        let owner = format!("step {} of user journey '{id}'", step.order);

        for precondition in &step.preconditions {
            require_claim(schema, &precondition.claim, &owner)?;
            if precondition.kind == PreconditionKind::ClaimEquals && precondition.value.is_none() {
                return Err(PolicyError::invalid_journey(
                    id,
                    format!("ClaimEquals precondition on step {} has no value", step.order),
                ));
            }
        }

        match step.step_type {
            StepType::ClaimsProviderSelection => {
                if step.selections.is_empty() {
                    return Err(PolicyError::invalid_journey(
                        id,
                        format!("selection step {} offers no claims exchanges", step.order),
                    ));
                }
                for target in &step.selections {
                    let offered_later = journey.steps[index + 1..]
                        .iter()
                        .any(|s| s.claims_exchanges.iter().any(|e| &e.id == target));
                    if !offered_later {
                        return Err(PolicyError::unresolved(
                            ReferenceKind::ClaimsExchange,
                            target,
                            &owner,
                        ));
                    }
                }
                seen_selection = true;
            }
            StepType::ClaimsExchange => {
                if step.claims_exchanges.is_empty() {
                    return Err(PolicyError::invalid_journey(
                        id,
                        format!("claims exchange step {} names no technical profile", step.order),
                    ));
                }
                if step.claims_exchanges.len() > 1 && !seen_selection {
                    return Err(PolicyError::invalid_journey(
                        id,
                        format!(
                            "step {} offers several claims exchanges without a preceding selection",
                            step.order
                        ),
                    ));
                }
                for exchange in &step.claims_exchanges {
                    if !profiles.contains_key(&exchange.technical_profile) {
                        return Err(PolicyError::unresolved(
                            ReferenceKind::TechnicalProfile,
                            &exchange.technical_profile,
                            &owner,
                        ));
                    }
                }
            }
            StepType::SendClaims => {
                if index != last {
                    return Err(PolicyError::invalid_journey(
                        id,
                        format!("SendClaims step {} is not the last step", step.order),
                    ));
                }
            }
        }

        if let Some(tp) = &step.technical_profile {
            if !profiles.contains_key(tp) {
                return Err(PolicyError::unresolved(
                    ReferenceKind::TechnicalProfile,
                    tp,
                    &owner,
                ));
            }
        }
    }

    if journey.steps[last].step_type != StepType::SendClaims {
        return Err(PolicyError::invalid_journey(id, "journey does not end with SendClaims"));
    }
    Ok(())
}
