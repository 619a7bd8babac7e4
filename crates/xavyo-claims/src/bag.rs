//! The claims bag and claims deltas.

use crate::error::TransformationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use xavyo_policy::{ClaimValue, ClaimsSchema};

/// Ordered claim writes produced by one adapter call or transformation.
/// When a claim is written twice, the later write wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsDelta {
    entries: Vec<(String, ClaimValue)>,
}

impl ClaimsDelta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, claim_type: impl Into<String>, value: ClaimValue) {
        self.entries.push((claim_type.into(), value));
    }

    #[must_use]
    pub fn with(mut self, claim_type: impl Into<String>, value: ClaimValue) -> Self {
        self.push(claim_type, value);
        self
    }

    /// Latest value written for `claim_type`.
    #[must_use]
    pub fn get(&self, claim_type: &str) -> Option<&ClaimValue> {
        self.entries
            .iter()
            .rev()
            .find(|(id, _)| id == claim_type)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClaimValue)> {
        self.entries.iter().map(|(id, v)| (id.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extend(&mut self, other: ClaimsDelta) {
        self.entries.extend(other.entries);
    }
}

impl IntoIterator for ClaimsDelta {
    type Item = (String, ClaimValue);
    type IntoIter = std::vec::IntoIter<(String, ClaimValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(String, ClaimValue)> for ClaimsDelta {
    fn from_iter<I: IntoIterator<Item = (String, ClaimValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// The claims of one journey instance, one value per claim type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimsBag {
    claims: BTreeMap<String, ClaimValue>,
}

impl ClaimsBag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, claim_type: &str) -> Option<&ClaimValue> {
        self.claims.get(claim_type)
    }

    #[must_use]
    pub fn get_str(&self, claim_type: &str) -> Option<&str> {
        self.get(claim_type).and_then(ClaimValue::as_str)
    }

    #[must_use]
    pub fn contains(&self, claim_type: &str) -> bool {
        self.claims.contains_key(claim_type)
    }

    /// Writes a value without consulting the schema.
    pub fn set(&mut self, claim_type: impl Into<String>, value: ClaimValue) -> Option<ClaimValue> {
        self.claims.insert(claim_type.into(), value)
    }

    pub fn remove(&mut self, claim_type: &str) -> Option<ClaimValue> {
        self.claims.remove(claim_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClaimValue)> {
        self.claims.iter().map(|(id, v)| (id.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Merges `delta` into the bag after checking every value against the
    /// declared data type of its claim. Nothing is written if any entry
    /// fails.
    pub fn apply(
        &mut self,
        delta: ClaimsDelta,
        schema: &ClaimsSchema,
    ) -> Result<(), TransformationError> {
        for (id, value) in delta.iter() {
            let claim_type = schema
                .get(id)
                .ok_or_else(|| TransformationError::UnknownClaim {
                    claim_type: id.to_string(),
                })?;
            if claim_type.data_type != value.data_type() {
                return Err(TransformationError::TypeMismatch {
                    claim_type: id.to_string(),
                    expected: claim_type.data_type,
                    actual: value.data_type(),
                });
            }
        }
        for (id, value) in delta {
            self.claims.insert(id, value);
        }
        Ok(())
    }

    /// Copy of the bag restricted to `claim_types`.
    #[must_use]
    pub fn subset<'a>(&self, claim_types: impl IntoIterator<Item = &'a str>) -> ClaimsBag {
        let claims = claim_types
            .into_iter()
            .filter_map(|id| self.claims.get_key_value(id))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ClaimsBag { claims }
    }

    /// Splits the bag into (clear, sensitive) halves according to the
    /// schema.
    #[must_use]
    pub fn partition(&self, schema: &ClaimsSchema) -> (ClaimsBag, ClaimsBag) {
        let (sensitive, clear): (BTreeMap<_, _>, BTreeMap<_, _>) = self
            .claims
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .partition(|(k, _)| schema.is_sensitive(k));
        (ClaimsBag { claims: clear }, ClaimsBag { claims: sensitive })
    }

    /// Adds every claim of `other`, overwriting on conflict.
    pub fn absorb(&mut self, other: ClaimsBag) {
        self.claims.extend(other.claims);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xavyo_policy::{PolicyDocument, PolicyStore};

    fn schema() -> ClaimsSchema {
        let doc = PolicyDocument::from_yaml(
            r"
policy_id: p
claims_schema:
  - { id: objectId, data_type: string }
  - { id: email, data_type: string, sensitive: true }
  - { id: age, data_type: int }
user_journeys:
  - id: J
    steps: [{ order: 1, type: SendClaims }]
relying_party: { default_user_journey: J, protocol: OpenIdConnect }
",
        )
        .unwrap();
        let graph = PolicyStore::load(vec![doc]).unwrap();
        graph.policy("p").unwrap().claims_schema().clone()
    }

    #[test]
    fn later_delta_writes_win() {
        let delta = ClaimsDelta::new()
            .with("email", ClaimValue::String("a@x".into()))
            .with("email", ClaimValue::String("b@x".into()));
        assert_eq!(delta.get("email"), Some(&ClaimValue::String("b@x".into())));

        let mut bag = ClaimsBag::new();
        bag.apply(delta, &schema()).unwrap();
        assert_eq!(bag.get_str("email"), Some("b@x"));
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn apply_rejects_type_mismatch_atomically() {
        let delta = ClaimsDelta::new()
            .with("email", ClaimValue::String("a@x".into()))
            .with("age", ClaimValue::String("old".into()));
        let mut bag = ClaimsBag::new();
        let err = bag.apply(delta, &schema()).unwrap_err();
        assert!(matches!(err, TransformationError::TypeMismatch { .. }));
        assert!(bag.is_empty());
    }

    #[test]
    fn apply_rejects_undeclared_claims() {
        let delta = ClaimsDelta::new().with("shoeSize", ClaimValue::Int(44));
        let err = ClaimsBag::new().apply(delta, &schema()).unwrap_err();
        assert!(matches!(err, TransformationError::UnknownClaim { .. }));
    }

    #[test]
    fn partition_separates_sensitive_claims() {
        let mut bag = ClaimsBag::new();
        bag.set("objectId", ClaimValue::String("1".into()));
        bag.set("email", ClaimValue::String("a@x".into()));

        let (clear, sensitive) = bag.partition(&schema());
        assert!(clear.contains("objectId") && !clear.contains("email"));
        assert!(sensitive.contains("email") && !sensitive.contains("objectId"));

        let mut rebuilt = clear;
        rebuilt.absorb(sensitive);
        assert_eq!(rebuilt, bag);
    }

    #[test]
    fn subset_only_copies_named_claims() {
        let mut bag = ClaimsBag::new();
        bag.set("objectId", ClaimValue::String("1".into()));
        bag.set("age", ClaimValue::Int(30));
        let sub = bag.subset(["age", "missing"]);
        assert_eq!(sub.len(), 1);
        assert_eq!(sub.get("age"), Some(&ClaimValue::Int(30)));
    }
}
