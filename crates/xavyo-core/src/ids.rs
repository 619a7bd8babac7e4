//! Strongly typed identifiers.
//!
//! A journey has two identities: the [`JourneyId`] that names one execution
//! of a user journey in logs and traces, and the [`CorrelationId`] that the
//! continuity layer uses to find the latest persisted state across
//! redirects. Keeping them as distinct newtypes stops one being passed where
//! the other is expected.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error returned when an identifier string is not a UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// Name of the identifier type being parsed.
    pub id_type: &'static str,
    /// Underlying UUID parser message.
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Raw bytes of the id.
            #[must_use]
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self).map_err(|e| ParseIdError {
                    id_type: stringify!($name),
                    message: e.to_string(),
                })
            }
        }
    };
}

define_id!(
    /// Identifier of one user-journey execution.
    ///
    /// Logged as the `journey_id` field on every span the engine opens.
    JourneyId
);

define_id!(
    /// Identifier the continuity layer keys its version ledger and
    /// per-journey locks by.
    ///
    /// ```
    /// use xavyo_core::CorrelationId;
    ///
    /// let id: CorrelationId = "6f1c4d2e-8a0b-4c57-9d3e-2b7a1f0e9c44".parse().unwrap();
    /// assert_eq!(id.to_string(), "6f1c4d2e-8a0b-4c57-9d3e-2b7a1f0e9c44");
    /// ```
    CorrelationId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(JourneyId::new(), JourneyId::new());
        assert_ne!(CorrelationId::default(), CorrelationId::default());
    }

    #[test]
    fn serializes_as_plain_string() {
        let uuid = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let id = CorrelationId::from_uuid(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"550e8400-e29b-41d4-a716-446655440000\"");

        let back: CorrelationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn parse_error_names_the_type() {
        let err = "not-a-uuid".parse::<JourneyId>().unwrap_err();
        assert_eq!(err.id_type, "JourneyId");
        assert!(err.to_string().starts_with("invalid JourneyId"));
    }

    #[test]
    fn bytes_match_uuid() {
        let id = JourneyId::new();
        assert_eq!(id.as_bytes(), id.as_uuid().as_bytes());
    }
}
