//! Inheritance resolution.
//!
//! Resolution is a fold over the inheritance chain, root first, where each
//! document overlays the accumulated result. Inputs are never mutated.

use crate::document::PolicyDocument;
use crate::error::{PolicyError, PolicyResult, ReferenceKind};
use crate::model::{ClaimsProvider, ClaimsTransformation, RelyingParty, UserJourney};
use crate::schema::ClaimType;
use std::collections::{BTreeMap, BTreeSet};

/// A policy with its whole inheritance chain applied, not yet validated.
#[derive(Debug, Clone, Default)]
pub(crate) struct MergedPolicy {
    pub policy_id: String,
    /// Root first, ending with `policy_id`.
    pub chain: Vec<String>,
    pub claim_types: BTreeMap<String, ClaimType>,
    pub transformations: BTreeMap<String, ClaimsTransformation>,
    pub providers: BTreeMap<String, ClaimsProvider>,
    pub journeys: BTreeMap<String, UserJourney>,
    pub relying_party: Option<RelyingParty>,
}

/// Indexes documents by id, rejecting duplicates.
pub(crate) fn index(
    documents: &[PolicyDocument],
) -> PolicyResult<BTreeMap<&str, &PolicyDocument>> {
    let mut by_id = BTreeMap::new();
    for doc in documents {
        if by_id.insert(doc.policy_id.as_str(), doc).is_some() {
            return Err(PolicyError::DuplicateId {
                kind: ReferenceKind::BasePolicy,
                id: doc.policy_id.clone(),
                policy: doc.policy_id.clone(),
            });
        }
    }
    Ok(by_id)
}

/// Walks `base_policy` links from `policy_id` and returns the chain root
/// first.
pub(crate) fn inheritance_chain(
    policy_id: &str,
    documents: &BTreeMap<&str, &PolicyDocument>,
) -> PolicyResult<Vec<String>> {
    let mut chain: Vec<String> = vec![policy_id.to_string()];
    let mut current = policy_id;

    while let Some(base) = documents
        .get(current)
        .and_then(|doc| doc.base_policy.as_deref())
    {
        if chain.iter().any(|seen| seen == base) {
            chain.push(base.to_string());
            return Err(PolicyError::CyclicInheritance { chain });
        }
        if !documents.contains_key(base) {
            return Err(PolicyError::unresolved(
                ReferenceKind::BasePolicy,
                base,
                format!("policy '{current}'"),
            ));
        }
        chain.push(base.to_string());
        current = base;
    }

    chain.reverse();
    Ok(chain)
}

/// Resolves one policy against its bases.
pub(crate) fn resolve(
    policy_id: &str,
    documents: &BTreeMap<&str, &PolicyDocument>,
) -> PolicyResult<MergedPolicy> {
    let chain = inheritance_chain(policy_id, documents)?;

    let mut merged = chain
        .iter()
        .filter_map(|id| documents.get(id.as_str()))
        .try_fold(MergedPolicy::default(), |acc, doc| overlay(acc, doc))?;

    for builtin in ClaimType::builtins() {
        merged
            .claim_types
            .entry(builtin.id.clone())
            .or_insert(builtin);
    }
    merged.policy_id = policy_id.to_string();
    merged.chain = chain;
    Ok(merged)
}

fn ensure_unique<'a>(
    kind: ReferenceKind,
    policy: &str,
    ids: impl Iterator<Item = &'a str>,
) -> PolicyResult<()> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(PolicyError::DuplicateId {
                kind,
                id: id.to_string(),
                policy: policy.to_string(),
            });
        }
    }
    Ok(())
}

/// Applies `doc` over `base`. Entries of `doc` replace entries of `base`
/// with the same id; technical profiles are matched by id across providers.
fn overlay(mut base: MergedPolicy, doc: &PolicyDocument) -> PolicyResult<MergedPolicy> {
    let policy = doc.policy_id.as_str();
    ensure_unique(
        ReferenceKind::ClaimType,
        policy,
        doc.claims_schema.iter().map(|c| c.id.as_str()),
    )?;
    ensure_unique(
        ReferenceKind::ClaimsTransformation,
        policy,
        doc.claims_transformations.iter().map(|t| t.id.as_str()),
    )?;
    ensure_unique(
        ReferenceKind::ClaimsProvider,
        policy,
        doc.claims_providers.iter().map(|p| p.name.as_str()),
    )?;
    ensure_unique(
        ReferenceKind::TechnicalProfile,
        policy,
        doc.claims_providers
            .iter()
            .flat_map(|p| p.technical_profiles.iter())
            .map(|tp| tp.id.as_str()),
    )?;
    ensure_unique(
        ReferenceKind::UserJourney,
        policy,
        doc.user_journeys.iter().map(|j| j.id.as_str()),
    )?;

    for claim_type in &doc.claims_schema {
        base.claim_types
            .insert(claim_type.id.clone(), claim_type.clone());
    }
    for transformation in &doc.claims_transformations {
        base.transformations
            .insert(transformation.id.clone(), transformation.clone());
    }

    for provider in &doc.claims_providers {
        // A profile redefined under another provider moves to it.
        for tp in &provider.technical_profiles {
            for (name, existing) in base.providers.iter_mut() {
                if name != &provider.name {
                    existing.technical_profiles.retain(|t| t.id != tp.id);
                }
            }
        }

        let target = base
            .providers
            .entry(provider.name.clone())
            .or_insert_with(|| ClaimsProvider {
                name: provider.name.clone(),
                display_name: None,
                technical_profiles: Vec::new(),
            });
        if provider.display_name.is_some() {
            target.display_name.clone_from(&provider.display_name);
        }
        for tp in &provider.technical_profiles {
            match target.technical_profiles.iter_mut().find(|t| t.id == tp.id) {
                Some(slot) => *slot = tp.clone(),
                None => target.technical_profiles.push(tp.clone()),
            }
        }
    }

    for journey in &doc.user_journeys {
        base.journeys.insert(journey.id.clone(), journey.clone());
    }
    if doc.relying_party.is_some() {
        base.relying_party.clone_from(&doc.relying_party);
    }

    Ok(base)
}
