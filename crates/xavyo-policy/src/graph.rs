//! The immutable policy graph served at request time.

use crate::document::PolicyDocument;
use crate::error::{PolicyError, PolicyResult};
use crate::merge;
use crate::model::{
    ClaimsProvider, ClaimsTransformation, RelyingParty, TechnicalProfile, UserJourney,
};
use crate::schema::{ClaimType, ClaimsSchema};
use crate::validate;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// One fully resolved, validated policy.
#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    pub(crate) policy_id: String,
    pub(crate) inheritance_chain: Vec<String>,
    pub(crate) schema: ClaimsSchema,
    pub(crate) transformations: BTreeMap<String, ClaimsTransformation>,
    pub(crate) providers: BTreeMap<String, ClaimsProvider>,
    pub(crate) technical_profiles: BTreeMap<String, TechnicalProfile>,
    pub(crate) profile_provider: BTreeMap<String, String>,
    pub(crate) journeys: BTreeMap<String, UserJourney>,
    pub(crate) relying_party: RelyingParty,
}

impl ResolvedPolicy {
    #[must_use]
    pub fn policy_id(&self) -> &str {
        &self.policy_id
    }

    /// Policy ids from the root base to this policy.
    #[must_use]
    pub fn inheritance_chain(&self) -> &[String] {
        &self.inheritance_chain
    }

    #[must_use]
    pub fn claims_schema(&self) -> &ClaimsSchema {
        &self.schema
    }

    #[must_use]
    pub fn claim_type(&self, id: &str) -> Option<&ClaimType> {
        self.schema.get(id)
    }

    #[must_use]
    pub fn transformation(&self, id: &str) -> Option<&ClaimsTransformation> {
        self.transformations.get(id)
    }

    #[must_use]
    pub fn technical_profile(&self, id: &str) -> Option<&TechnicalProfile> {
        self.technical_profiles.get(id)
    }

    pub fn technical_profiles(&self) -> impl Iterator<Item = &TechnicalProfile> {
        self.technical_profiles.values()
    }

    /// The claims provider that owns technical profile `tp_id`.
    #[must_use]
    pub fn provider_of(&self, tp_id: &str) -> Option<&ClaimsProvider> {
        self.profile_provider
            .get(tp_id)
            .and_then(|name| self.providers.get(name))
    }

    #[must_use]
    pub fn journey(&self, id: &str) -> Option<&UserJourney> {
        self.journeys.get(id)
    }

    /// The relying party's default journey. Always present once loaded.
    #[must_use]
    pub fn default_journey(&self) -> Option<&UserJourney> {
        self.journeys.get(&self.relying_party.default_user_journey)
    }

    #[must_use]
    pub fn relying_party(&self) -> &RelyingParty {
        &self.relying_party
    }
}

/// Every servable policy, keyed by policy id.
///
/// Built once at startup and shared read-only (behind an `Arc`) by all
/// concurrent journeys.
#[derive(Debug, Clone, Default)]
pub struct PolicyGraph {
    policies: BTreeMap<String, ResolvedPolicy>,
}

impl PolicyGraph {
    #[must_use]
    pub fn policy(&self, id: &str) -> Option<&ResolvedPolicy> {
        self.policies.get(id)
    }

    pub fn policies(&self) -> impl Iterator<Item = &ResolvedPolicy> {
        self.policies.values()
    }

    #[must_use]
    pub fn journey(&self, policy: &str, id: &str) -> Option<&UserJourney> {
        self.policy(policy).and_then(|p| p.journey(id))
    }

    #[must_use]
    pub fn technical_profile(&self, policy: &str, id: &str) -> Option<&TechnicalProfile> {
        self.policy(policy).and_then(|p| p.technical_profile(id))
    }

    #[must_use]
    pub fn transformation(&self, policy: &str, id: &str) -> Option<&ClaimsTransformation> {
        self.policy(policy).and_then(|p| p.transformation(id))
    }

    #[must_use]
    pub fn claim_type(&self, policy: &str, id: &str) -> Option<&ClaimType> {
        self.policy(policy).and_then(|p| p.claim_type(id))
    }

    #[must_use]
    pub fn relying_party(&self, policy: &str) -> Option<&RelyingParty> {
        self.policy(policy).map(ResolvedPolicy::relying_party)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Loads policy documents into a [`PolicyGraph`].
pub struct PolicyStore;

impl PolicyStore {
    /// Resolves inheritance and validates every document that declares a
    /// relying party. Documents without one only serve as bases, but their
    /// inheritance links are still checked.
    pub fn load(documents: Vec<PolicyDocument>) -> PolicyResult<PolicyGraph> {
        let by_id = merge::index(&documents)?;

        let mut policies = BTreeMap::new();
        for (id, doc) in &by_id {
            let merged = merge::resolve(id, &by_id)?;
            if merged.relying_party.is_none() {
                debug!(policy_id = %id, "Policy has no relying party, used as base only");
                continue;
            }
            let resolved = validate::validate(merged)?;
            info!(
                policy_id = %doc.policy_id,
                chain = ?resolved.inheritance_chain,
                journeys = resolved.journeys.len(),
                technical_profiles = resolved.technical_profiles.len(),
                "Policy loaded"
            );
            policies.insert(resolved.policy_id.clone(), resolved);
        }

        Ok(PolicyGraph { policies })
    }

    /// Reads every `*.yaml`, `*.yml` and `*.json` file in `dir` (not
    /// recursive) and loads them as one set.
    pub fn load_dir(dir: &Path) -> PolicyResult<PolicyGraph> {
        let entries = std::fs::read_dir(dir).map_err(|e| PolicyError::InvalidDocument {
            source_name: dir.display().to_string(),
            message: e.to_string(),
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PolicyError::InvalidDocument {
                source_name: dir.display().to_string(),
                message: e.to_string(),
            })?;
            let path = entry.path();
            let is_policy = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml" | "yml" | "json")
            );
            if path.is_file() && is_policy {
                paths.push(path);
            }
        }
        paths.sort();

        let documents = paths
            .iter()
            .map(|p| PolicyDocument::from_path(p))
            .collect::<PolicyResult<Vec<_>>>()?;
        debug!(dir = %dir.display(), documents = documents.len(), "Read policy documents");

        Self::load(documents)
    }
}
