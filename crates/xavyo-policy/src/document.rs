//! Raw policy documents as authored.

use crate::error::{PolicyError, PolicyResult};
use crate::model::{ClaimsProvider, ClaimsTransformation, RelyingParty, UserJourney};
use crate::schema::ClaimType;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One declarative policy document.
///
/// A document may extend another through `base_policy`; its entries
/// override the base's entries with the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub policy_id: String,
    #[serde(default, alias = "basePolicy", skip_serializing_if = "Option::is_none")]
    pub base_policy: Option<String>,
    #[serde(default)]
    pub claims_schema: Vec<ClaimType>,
    #[serde(default)]
    pub claims_transformations: Vec<ClaimsTransformation>,
    #[serde(default)]
    pub claims_providers: Vec<ClaimsProvider>,
    #[serde(default)]
    pub user_journeys: Vec<UserJourney>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relying_party: Option<RelyingParty>,
}

impl PolicyDocument {
    pub fn from_yaml(source: &str) -> PolicyResult<Self> {
        serde_yaml::from_str(source).map_err(|e| PolicyError::InvalidDocument {
            source_name: "<yaml>".to_string(),
            message: e.to_string(),
        })
    }

    pub fn from_json(source: &str) -> PolicyResult<Self> {
        serde_json::from_str(source).map_err(|e| PolicyError::InvalidDocument {
            source_name: "<json>".to_string(),
            message: e.to_string(),
        })
    }

    /// Reads one document, choosing the format by extension.
    pub fn from_path(path: &Path) -> PolicyResult<Self> {
        let source_name = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|e| PolicyError::InvalidDocument {
            source_name: source_name.clone(),
            message: e.to_string(),
        })?;

        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            Some("yaml" | "yml") => Self::from_yaml(&contents),
            other => {
                return Err(PolicyError::InvalidDocument {
                    source_name,
                    message: format!("unsupported extension {other:?}"),
                })
            }
        };

        parsed.map_err(|e| match e {
            PolicyError::InvalidDocument { message, .. } => PolicyError::InvalidDocument {
                source_name,
                message,
            },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_yaml() {
        let doc = PolicyDocument::from_yaml(
            r"
policy_id: B2C_1A_Base
claims_schema:
  - id: email
    data_type: string
",
        )
        .unwrap();
        assert_eq!(doc.policy_id, "B2C_1A_Base");
        assert!(doc.base_policy.is_none());
        assert_eq!(doc.claims_schema.len(), 1);
    }

    #[test]
    fn accepts_camel_case_base_policy() {
        let doc =
            PolicyDocument::from_json(r#"{"policy_id":"child","basePolicy":"base"}"#).unwrap();
        assert_eq!(doc.base_policy.as_deref(), Some("base"));
    }

    #[test]
    fn malformed_document_is_invalid() {
        let err = PolicyDocument::from_yaml("policy_id: [unclosed").unwrap_err();
        assert!(matches!(err, PolicyError::InvalidDocument { .. }));
    }
}
