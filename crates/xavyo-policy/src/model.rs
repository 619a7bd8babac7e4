//! Policy building blocks: technical profiles, claims providers,
//! transformations, user journeys and the relying party.
//!
//! The same types are used for the raw documents and for the resolved
//! graph. Field names follow the YAML/JSON document layout.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Wire protocol a technical profile speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    OpenIdConnect,
    #[serde(rename = "SAML2", alias = "Saml2")]
    Saml2,
    Proprietary,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::OpenIdConnect => "OpenIdConnect",
            Self::Saml2 => "SAML2",
            Self::Proprietary => "Proprietary",
        })
    }
}

/// Reference to a claim type with an optional partner-side name and default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRef {
    pub claim_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_claim: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ClaimRef {
    #[must_use]
    pub fn new(claim_type: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            partner_claim: None,
            default: None,
        }
    }

    #[must_use]
    pub fn partner(mut self, partner_claim: impl Into<String>) -> Self {
        self.partner_claim = Some(partner_claim.into());
        self
    }

    /// Name of the claim on the partner side of the exchange.
    #[must_use]
    pub fn partner_name(&self) -> &str {
        self.partner_claim.as_deref().unwrap_or(&self.claim_type)
    }
}

/// Opaque key reference, resolved through the key store at call time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRef {
    pub purpose: String,
    pub id: String,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

/// Retry policy for retryable adapter failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Backoff before attempt `attempt + 1`, with `attempt` starting at 1.
    #[must_use]
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(32);
        self.initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms)
    }
}

/// Protocol-specific configuration for exchanging claims with one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnicalProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub protocol: Protocol,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub input_claims: Vec<ClaimRef>,
    #[serde(default)]
    pub output_claims: Vec<ClaimRef>,
    #[serde(default)]
    pub input_claims_transformations: Vec<String>,
    #[serde(default)]
    pub output_claims_transformations: Vec<String>,
    #[serde(default)]
    pub keys: Vec<KeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_management: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl TechnicalProfile {
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Key id referenced for `purpose` (`signing`, `client_secret`, ...).
    #[must_use]
    pub fn key(&self, purpose: &str) -> Option<&str> {
        self.keys
            .iter()
            .find(|k| k.purpose == purpose)
            .map(|k| k.id.as_str())
    }
}

/// A named group of technical profiles, typically one external identity
/// provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsProvider {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub technical_profiles: Vec<TechnicalProfile>,
}

/// Built-in transformation kinds.
///
/// Documents carry the kind as a string; names that match no built-in are
/// kept as [`TransformationKind::Unknown`] so the loader can report them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransformationKind {
    CreateRandomString,
    FormatStringClaim,
    FormatStringMultipleClaims,
    StringConcat,
    CreateAlternativeSecurityId,
    CreateStringClaim,
    CompareClaimToValue,
    ChangeCase,
    Unknown(String),
}

impl From<String> for TransformationKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "CreateRandomString" => Self::CreateRandomString,
            "FormatStringClaim" => Self::FormatStringClaim,
            "FormatStringMultipleClaims" => Self::FormatStringMultipleClaims,
            "StringConcat" => Self::StringConcat,
            "CreateAlternativeSecurityId" => Self::CreateAlternativeSecurityId,
            "CreateStringClaim" => Self::CreateStringClaim,
            "CompareClaimToValue" => Self::CompareClaimToValue,
            "ChangeCase" => Self::ChangeCase,
            _ => Self::Unknown(s),
        }
    }
}

impl From<TransformationKind> for String {
    fn from(kind: TransformationKind) -> Self {
        kind.to_string()
    }
}

impl Display for TransformationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::CreateRandomString => "CreateRandomString",
            Self::FormatStringClaim => "FormatStringClaim",
            Self::FormatStringMultipleClaims => "FormatStringMultipleClaims",
            Self::StringConcat => "StringConcat",
            Self::CreateAlternativeSecurityId => "CreateAlternativeSecurityId",
            Self::CreateStringClaim => "CreateStringClaim",
            Self::CompareClaimToValue => "CompareClaimToValue",
            Self::ChangeCase => "ChangeCase",
            Self::Unknown(name) => name,
        })
    }
}

/// Binds a claim type to a transformation parameter name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationClaim {
    pub claim_type: String,
    pub parameter_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsTransformation {
    pub id: String,
    pub kind: TransformationKind,
    #[serde(default)]
    pub input_claims: Vec<TransformationClaim>,
    #[serde(default)]
    pub input_parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub output_claims: Vec<TransformationClaim>,
}

impl ClaimsTransformation {
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.input_parameters.get(name).map(String::as_str)
    }

    /// Claim type bound to the input parameter `name`.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&str> {
        self.input_claims
            .iter()
            .find(|c| c.parameter_name == name)
            .map(|c| c.claim_type.as_str())
    }

    /// The single output claim type, if exactly one is declared.
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        match self.output_claims.as_slice() {
            [only] => Some(only.claim_type.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepType {
    ClaimsProviderSelection,
    ClaimsExchange,
    SendClaims,
}

impl Display for StepType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ClaimsProviderSelection => "ClaimsProviderSelection",
            Self::ClaimsExchange => "ClaimsExchange",
            Self::SendClaims => "SendClaims",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreconditionKind {
    ClaimsExist,
    ClaimEquals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreconditionAction {
    SkipThisOrchestrationStep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precondition {
    pub kind: PreconditionKind,
    pub claim: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default = "default_precondition_action")]
    pub action: PreconditionAction,
}

fn default_precondition_action() -> PreconditionAction {
    PreconditionAction::SkipThisOrchestrationStep
}

/// A candidate exchange of a `ClaimsExchange` step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsExchange {
    pub id: String,
    pub technical_profile: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationStep {
    pub order: u32,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    #[serde(default)]
    pub claims_exchanges: Vec<ClaimsExchange>,
    /// Claims-exchange ids offered by a `ClaimsProviderSelection` step.
    #[serde(default)]
    pub selections: Vec<String>,
    /// Token issuer profile of a `SendClaims` step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_profile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserJourney {
    pub id: String,
    pub steps: Vec<OrchestrationStep>,
}

impl UserJourney {
    #[must_use]
    pub fn step(&self, order: u32) -> Option<&OrchestrationStep> {
        self.steps.iter().find(|s| s.order == order)
    }

    #[must_use]
    pub fn first_step(&self) -> Option<&OrchestrationStep> {
        self.steps.first()
    }

    /// The step following `order`.
    #[must_use]
    pub fn next_step(&self, order: u32) -> Option<&OrchestrationStep> {
        self.steps.iter().find(|s| s.order > order)
    }

    /// Finds a claims exchange by id anywhere in the journey.
    #[must_use]
    pub fn claims_exchange(&self, id: &str) -> Option<&ClaimsExchange> {
        self.steps
            .iter()
            .flat_map(|s| s.claims_exchanges.iter())
            .find(|e| e.id == id)
    }
}

/// A registered caller of the relying-party surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingPartyClient {
    /// OAuth client id, or the service provider entity id for SAML.
    pub client_id: String,
    /// Allowed redirect URIs, or assertion consumer service URLs for SAML.
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

fn default_token_lifetime_secs() -> u64 {
    3600
}

fn default_subject_claim() -> String {
    "objectId".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingParty {
    pub default_user_journey: String,
    pub protocol: Protocol,
    /// Request parameters copied into the bag when a journey starts,
    /// matched by partner claim name.
    #[serde(default)]
    pub input_claims: Vec<ClaimRef>,
    #[serde(default)]
    pub output_claims: Vec<ClaimRef>,
    #[serde(default = "default_subject_claim")]
    pub subject_claim: String,
    #[serde(default = "default_token_lifetime_secs")]
    pub token_lifetime_secs: u64,
    #[serde(default)]
    pub clients: Vec<RelyingPartyClient>,
}

impl RelyingParty {
    #[must_use]
    pub fn client(&self, client_id: &str) -> Option<&RelyingPartyClient> {
        self.clients.iter().find(|c| c.client_id == client_id)
    }
}
