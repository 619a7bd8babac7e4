//! Claims schema: claim type declarations and typed claim values.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Claim written by a provider-selection step.
pub const SELECTED_CLAIMS_EXCHANGE: &str = "selectedClaimsExchange";

/// Data type of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClaimDataType {
    String,
    Boolean,
    Int,
    DateTime,
}

impl Display for ClaimDataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Int => "int",
            Self::DateTime => "dateTime",
        })
    }
}

/// A typed claim value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClaimValue {
    String(String),
    Boolean(bool),
    Int(i64),
    DateTime(DateTime<Utc>),
}

/// Raised when an untyped value cannot be read as the declared data type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoercionError {
    pub data_type: ClaimDataType,
    pub raw: String,
}

impl Display for CoercionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' is not a valid {}", self.raw, self.data_type)
    }
}

impl std::error::Error for CoercionError {}

impl ClaimValue {
    #[must_use]
    pub fn data_type(&self) -> ClaimDataType {
        match self {
            Self::String(_) => ClaimDataType::String,
            Self::Boolean(_) => ClaimDataType::Boolean,
            Self::Int(_) => ClaimDataType::Int,
            Self::DateTime(_) => ClaimDataType::DateTime,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Parses a string into a value of `data_type`.
    ///
    /// Booleans accept `true`/`false` in any case, ints accept a signed
    /// decimal, date-times accept RFC 3339 or Unix seconds.
    pub fn coerce(raw: &str, data_type: ClaimDataType) -> Result<Self, CoercionError> {
        let err = || CoercionError {
            data_type,
            raw: raw.to_string(),
        };
        match data_type {
            ClaimDataType::String => Ok(Self::String(raw.to_string())),
            ClaimDataType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Self::Boolean(true)),
                "false" => Ok(Self::Boolean(false)),
                _ => Err(err()),
            },
            ClaimDataType::Int => raw.trim().parse().map(Self::Int).map_err(|_| err()),
            ClaimDataType::DateTime => {
                let trimmed = raw.trim();
                if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
                    return Ok(Self::DateTime(dt.with_timezone(&Utc)));
                }
                trimmed
                    .parse::<i64>()
                    .ok()
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
                    .map(Self::DateTime)
                    .ok_or_else(err)
            }
        }
    }

    /// Converts a JSON value (an ID token claim, for instance) into
    /// `data_type`. A multi-valued claim keeps its first element; an empty
    /// one is rejected.
    pub fn coerce_json(
        value: &serde_json::Value,
        data_type: ClaimDataType,
    ) -> Result<Self, CoercionError> {
        use serde_json::Value;
        match (value, data_type) {
            (Value::Bool(b), ClaimDataType::Boolean) => Ok(Self::Boolean(*b)),
            (Value::Number(n), ClaimDataType::Int) => n.as_i64().map(Self::Int).ok_or(CoercionError {
                data_type,
                raw: n.to_string(),
            }),
            (Value::Number(n), ClaimDataType::DateTime) => n
                .as_i64()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(Self::DateTime)
                .ok_or(CoercionError {
                    data_type,
                    raw: n.to_string(),
                }),
            (Value::String(s), _) => Self::coerce(s, data_type),
            (Value::Null, _) => Err(CoercionError {
                data_type,
                raw: "null".to_string(),
            }),
            (Value::Array(items), _) => match items.as_slice() {
                [] => Err(CoercionError {
                    data_type,
                    raw: "[]".to_string(),
                }),
                [first, rest @ ..] => {
                    if !rest.is_empty() {
                        tracing::debug!(
                            data_type = %data_type,
                            discarded = rest.len(),
                            "Multi-valued claim reduced to its first value"
                        );
                    }
                    Self::coerce_json(first, data_type)
                }
            },
            (other, _) => Self::coerce(&other.to_string(), data_type),
        }
    }

    /// Canonical string form, used by formatting transformations,
    /// preconditions and token issuance.
    #[must_use]
    pub fn to_claim_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Boolean(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::DateTime(dt) => serde_json::Value::from(dt.timestamp()),
        }
    }
}

/// Declaration of a claim type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimType {
    pub id: String,
    pub data_type: ClaimDataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Sensitive claims are encrypted whenever journey state leaves the
    /// process.
    #[serde(default)]
    pub sensitive: bool,
}

impl ClaimType {
    #[must_use]
    pub fn new(id: impl Into<String>, data_type: ClaimDataType) -> Self {
        Self {
            id: id.into(),
            data_type,
            display_name: None,
            default: None,
            sensitive: false,
        }
    }

    /// The declared default, typed. `None` if absent or invalid; invalid
    /// defaults are rejected when the policy is loaded.
    #[must_use]
    pub fn default_value(&self) -> Option<ClaimValue> {
        self.default
            .as_deref()
            .and_then(|raw| ClaimValue::coerce(raw, self.data_type).ok())
    }

    pub(crate) fn builtins() -> Vec<ClaimType> {
        vec![ClaimType::new(SELECTED_CLAIMS_EXCHANGE, ClaimDataType::String)]
    }
}

/// The resolved set of claim types of one policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimsSchema {
    types: BTreeMap<String, ClaimType>,
}

impl ClaimsSchema {
    pub(crate) fn new(types: BTreeMap<String, ClaimType>) -> Self {
        Self { types }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ClaimType> {
        self.types.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.types.contains_key(id)
    }

    #[must_use]
    pub fn is_sensitive(&self, id: &str) -> bool {
        self.types.get(id).is_some_and(|t| t.sensitive)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClaimType> {
        self.types.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerces_strings_to_declared_types() {
        assert_eq!(
            ClaimValue::coerce("TRUE", ClaimDataType::Boolean),
            Ok(ClaimValue::Boolean(true))
        );
        assert_eq!(ClaimValue::coerce(" 42 ", ClaimDataType::Int), Ok(ClaimValue::Int(42)));
        assert!(ClaimValue::coerce("yes", ClaimDataType::Boolean).is_err());
        assert!(ClaimValue::coerce("4.2", ClaimDataType::Int).is_err());
    }

    #[test]
    fn coerces_datetimes_from_rfc3339_and_epoch() {
        let a = ClaimValue::coerce("2024-01-02T03:04:05Z", ClaimDataType::DateTime).unwrap();
        let b = ClaimValue::coerce("1704164645", ClaimDataType::DateTime).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_claim_string(), "2024-01-02T03:04:05Z");
    }

    #[test]
    fn coerces_json_values() {
        assert_eq!(
            ClaimValue::coerce_json(&json!(true), ClaimDataType::Boolean),
            Ok(ClaimValue::Boolean(true))
        );
        assert_eq!(
            ClaimValue::coerce_json(&json!(["first", "second"]), ClaimDataType::String),
            Ok(ClaimValue::String("first".into()))
        );
        assert_eq!(
            ClaimValue::coerce_json(&json!(7), ClaimDataType::String),
            Ok(ClaimValue::String("7".into()))
        );
        assert!(ClaimValue::coerce_json(&json!("x"), ClaimDataType::Int).is_err());
    }

    #[test]
    fn multi_valued_json_claims_keep_the_first_value() {
        assert_eq!(
            ClaimValue::coerce_json(&json!(["42", "x"]), ClaimDataType::Int),
            Ok(ClaimValue::Int(42))
        );
        assert_eq!(
            ClaimValue::coerce_json(&json!([true]), ClaimDataType::Boolean),
            Ok(ClaimValue::Boolean(true))
        );
        assert_eq!(
            ClaimValue::coerce_json(&json!([]), ClaimDataType::String),
            Err(CoercionError {
                data_type: ClaimDataType::String,
                raw: "[]".into(),
            })
        );
    }

    #[test]
    fn value_serialization_is_tagged() {
        let v = ClaimValue::DateTime(DateTime::from_timestamp(0, 0).unwrap());
        let s = serde_json::to_string(&v).unwrap();
        assert!(s.starts_with("{\"dateTime\":"));
        let back: ClaimValue = serde_json::from_str(&s).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn default_value_is_typed() {
        let mut ct = ClaimType::new("isNew", ClaimDataType::Boolean);
        ct.default = Some("false".into());
        assert_eq!(ct.default_value(), Some(ClaimValue::Boolean(false)));
        ct.default = Some("nope".into());
        assert_eq!(ct.default_value(), None);
    }
}
