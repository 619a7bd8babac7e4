//! User-journey orchestration.
//!
//! [`JourneyEngine`] runs the orchestration steps of a policy's user journey
//! over a serializable [`JourneySnapshot`]. Between browser round trips the
//! snapshot travels in a tamper-evident [`ContinuityToken`] issued by
//! [`ContinuityService`], which also serializes concurrent requests for the
//! same journey and rejects superseded tokens.
//!
//! ```text
//! start ─► advance ─┬─► Redirect   ── persist ─► browser ─► callback ─► resume ─► handle_callback
//!                   ├─► Selection  ── persist ─► browser ─► select   ─► resume ─► select
//!                   ├─► Completed
//!                   └─► Failed(ErrorKind)
//! ```

pub mod continuity;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod snapshot;

pub use continuity::{
    ContinuityError, ContinuityService, ContinuityToken, Resumed, DEFAULT_SSO_TTL_SECS,
    DEFAULT_TTL_SECS, MIN_MASTER_KEY_LEN,
};
pub use engine::{IssuedClaims, JourneyEngine, Outcome};
pub use error::{EngineError, ErrorKind};
pub use ledger::{InMemoryLedger, LedgerMode, StatelessLedger, VersionLedger};
pub use locks::{JourneyGuard, JourneyLocks};
pub use snapshot::{
    JourneySeed, JourneySnapshot, JourneyState, RelyingPartyRequest, SelectionCandidate, SsoRecord, StepEvent,
    TraceEntry,
};
