//! Policy store for the xavyo journey engine.
//!
//! Policies are declarative documents (YAML or JSON) describing claim
//! types, claims transformations, technical profiles grouped by claims
//! provider, user journeys and a relying party. A document may extend a base
//! document; [`PolicyStore::load`] resolves every inheritance chain once,
//! validates all references and returns an immutable [`PolicyGraph`].
//!
//! ```
//! use xavyo_policy::{PolicyDocument, PolicyStore};
//!
//! let doc = PolicyDocument::from_yaml(r#"
//! policy_id: B2C_1A_Demo
//! claims_schema:
//!   - { id: objectId, data_type: string }
//! user_journeys:
//!   - id: SignIn
//!     steps:
//!       - { order: 1, type: SendClaims }
//! relying_party:
//!   default_user_journey: SignIn
//!   protocol: OpenIdConnect
//!   output_claims: [{ claim_type: objectId, partner_claim: sub }]
//! "#).unwrap();
//!
//! let graph = PolicyStore::load(vec![doc]).unwrap();
//! assert!(graph.journey("B2C_1A_Demo", "SignIn").is_some());
//! ```

pub mod document;
pub mod error;
pub mod graph;
mod merge;
pub mod model;
pub mod schema;
mod validate;

pub use document::PolicyDocument;
pub use error::{PolicyError, PolicyResult, ReferenceKind};
pub use graph::{PolicyGraph, PolicyStore, ResolvedPolicy};
pub use model::{
    ClaimRef, ClaimsExchange, ClaimsProvider, ClaimsTransformation, KeyRef, OrchestrationStep,
    Precondition, PreconditionAction, PreconditionKind, Protocol, RelyingParty,
    RelyingPartyClient, RetryConfig, StepType, TechnicalProfile, TransformationClaim,
    TransformationKind, UserJourney,
};
pub use schema::{
    ClaimDataType, ClaimType, ClaimValue, ClaimsSchema, CoercionError, SELECTED_CLAIMS_EXCHANGE,
};
