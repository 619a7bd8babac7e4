//! Serializable journey state.
//!
//! A journey survives browser round trips as a [`JourneySnapshot`] sealed in
//! a continuity token; nothing about an in-flight journey lives in server
//! memory except the continuity ledger.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use xavyo_claims::ClaimsBag;
use xavyo_core::JourneyId;
use xavyo_federation::PendingState;
use xavyo_policy::{Protocol, StepType};

use crate::error::ErrorKind;

/// Engine state. `n` is the step's declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum JourneyState {
    NotStarted,
    AtStep(u32),
    AwaitingExternalCallback(u32),
    Completed,
    Failed(ErrorKind),
}

impl JourneyState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

impl Display for JourneyState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not started"),
            Self::AtStep(n) => write!(f, "at step {n}"),
            Self::AwaitingExternalCallback(n) => write!(f, "awaiting callback for step {n}"),
            Self::Completed => f.write_str("completed"),
            Self::Failed(kind) => write!(f, "failed ({kind:?})"),
        }
    }
}

/// The relying party's original request, replayed when the journey ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingPartyRequest {
    pub protocol: Protocol,
    /// OAuth client id, or the SAML service provider entity id.
    pub client_id: String,
    /// Redirect URI, or assertion consumer service URL.
    pub reply_to: String,
    /// OAuth `state` or SAML `RelayState` of the caller, echoed back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// ID of the caller's SAML `AuthnRequest`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Claims remembered per session-management profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SsoRecord {
    sessions: BTreeMap<String, ClaimsBag>,
}

impl SsoRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn session(&self, profile_id: &str) -> Option<&ClaimsBag> {
        self.sessions.get(profile_id)
    }

    pub fn remember(&mut self, profile_id: impl Into<String>, claims: ClaimsBag) {
        self.sessions.insert(profile_id.into(), claims);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// One offered provider of a selection step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionCandidate {
    pub claims_exchange: String,
    pub technical_profile: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StepEvent {
    /// Precondition at `precondition` (declaration index) matched.
    Skipped { precondition: usize },
    SelectionOffered { candidates: usize },
    Selected { claims_exchange: String },
    Redirected { technical_profile: String },
    SessionRestored { technical_profile: String },
    Exchanged { technical_profile: String, claims: usize },
    Retried { technical_profile: String, attempt: u32 },
    ClaimsSent,
    Failed { kind: ErrorKind },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub order: u32,
    pub step_type: StepType,
    #[serde(flatten)]
    pub event: StepEvent,
    pub at: DateTime<Utc>,
}

/// Per-journey secret keying `CreateRandomString`.
///
/// Drawn from the OS RNG when the journey starts and only ever persisted
/// inside the sealed part of a continuity token. All zeroes means unset.
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JourneySeed([u8; 32]);

impl JourneySeed {
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl std::fmt::Debug for JourneySeed {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("JourneySeed(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneySnapshot {
    pub journey_id: JourneyId,
    #[serde(default, skip_serializing_if = "JourneySeed::is_unset")]
    pub seed: JourneySeed,
    pub policy_id: String,
    pub user_journey: String,
    pub state: JourneyState,
    pub bag: ClaimsBag,
    pub request: RelyingPartyRequest,
    /// Protocol state of the adapter call awaiting its callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingState>,
    /// Claims exchange being executed by an `AwaitingExternalCallback` step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_exchange: Option<String>,
    /// Candidates offered by an `AtStep` selection suspension.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offered: Vec<SelectionCandidate>,
    #[serde(default)]
    pub sso: SsoRecord,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub trace: Vec<TraceEntry>,
}

impl JourneySnapshot {
    #[must_use]
    pub fn new(
        policy_id: impl Into<String>,
        user_journey: impl Into<String>,
        request: RelyingPartyRequest,
        sso: SsoRecord,
    ) -> Self {
        Self {
            journey_id: JourneyId::new(),
            seed: JourneySeed::generate(),
            policy_id: policy_id.into(),
            user_journey: user_journey.into(),
            state: JourneyState::NotStarted,
            bag: ClaimsBag::new(),
            request,
            pending: None,
            current_exchange: None,
            offered: Vec::new(),
            sso,
            started_at: Utc::now(),
            trace: Vec::new(),
        }
    }

    /// True while suspended on a provider selection.
    #[must_use]
    pub fn awaiting_selection(&self) -> bool {
        matches!(self.state, JourneyState::AtStep(_)) && !self.offered.is_empty()
    }

    pub(crate) fn record(&mut self, order: u32, step_type: StepType, event: StepEvent) {
        self.trace.push(TraceEntry {
            order,
            step_type,
            event,
            at: Utc::now(),
        });
    }

    /// Orders of the steps that were executed, in execution order, without
    /// repeats.
    #[must_use]
    pub fn executed_steps(&self) -> Vec<u32> {
        let mut orders: Vec<u32> = Vec::new();
        for entry in &self.trace {
            if matches!(entry.event, StepEvent::Skipped { .. }) {
                continue;
            }
            if orders.last() != Some(&entry.order) {
                orders.push(entry.order);
            }
        }
        orders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xavyo_claims::ClaimValue;

    fn request() -> RelyingPartyRequest {
        RelyingPartyRequest {
            protocol: Protocol::OpenIdConnect,
            client_id: "webapp".into(),
            reply_to: "https://app.example.com/cb".into(),
            state: Some("s".into()),
            nonce: None,
            request_id: None,
        }
    }

    #[test]
    fn state_serializes_with_step() {
        let json = serde_json::to_value(JourneyState::AwaitingExternalCallback(2)).unwrap();
        assert_eq!(json["state"], "awaiting_external_callback");
        assert_eq!(json["step"], 2);
        let failed = serde_json::to_value(JourneyState::Failed(ErrorKind::Internal)).unwrap();
        assert_eq!(failed["step"], "internal");
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut snapshot = JourneySnapshot::new("B2C_1A_Demo", "SignIn", request(), SsoRecord::new());
        snapshot.bag.set("email", ClaimValue::String("ada@example.com".into()));
        snapshot.state = JourneyState::AtStep(3);
        snapshot.record(1, StepType::ClaimsProviderSelection, StepEvent::SelectionOffered { candidates: 2 });

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: JourneySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn journeys_get_distinct_seeds() {
        let a = JourneySnapshot::new("p", "j", request(), SsoRecord::new());
        let b = JourneySnapshot::new("p", "j", request(), SsoRecord::new());
        assert!(!a.seed.is_unset());
        assert_ne!(a.seed, b.seed);
        assert_eq!(format!("{:?}", a.seed), "JourneySeed(..)");
    }

    #[test]
    fn executed_steps_ignore_skips() {
        let mut snapshot = JourneySnapshot::new("p", "j", request(), SsoRecord::new());
        snapshot.record(1, StepType::ClaimsProviderSelection, StepEvent::SelectionOffered { candidates: 2 });
        snapshot.record(1, StepType::ClaimsProviderSelection, StepEvent::Selected { claims_exchange: "a".into() });
        snapshot.record(2, StepType::ClaimsExchange, StepEvent::Skipped { precondition: 0 });
        snapshot.record(3, StepType::SendClaims, StepEvent::ClaimsSent);
        assert_eq!(snapshot.executed_steps(), vec![1, 3]);
    }
}
