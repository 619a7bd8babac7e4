//! Version ledgers deciding which continuity token of a journey resumes.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use xavyo_core::CorrelationId;

/// Entries are swept once an in-memory ledger grows past this many journeys.
const SWEEP_THRESHOLD: usize = 10_000;

/// Tracks the latest persisted version of every live journey.
///
/// The ledger is what makes a superseded or finished token unusable. Every
/// node that may resume a journey must see the same ledger; implementations
/// backed by a shared store plug in through
/// [`ContinuityService::with_ledger`](crate::ContinuityService::with_ledger).
pub trait VersionLedger: Send + Sync + std::fmt::Debug {
    /// Records a new version of `correlation_id`, live until `expires_at`
    /// (unix seconds), and returns it.
    fn advance(&self, correlation_id: CorrelationId, expires_at: i64) -> u64;

    /// Latest version recorded for `correlation_id`, if the journey is live.
    fn latest(&self, correlation_id: CorrelationId) -> Option<u64>;

    /// Whether a token carrying `version` may resume.
    fn accepts(&self, correlation_id: CorrelationId, version: u64) -> bool {
        self.latest(correlation_id) == Some(version)
    }

    /// Forgets a finished journey.
    fn retire(&self, correlation_id: CorrelationId);

    /// Drops entries whose journeys expired before `now` (unix seconds).
    fn sweep(&self, _now: i64) {}

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct LedgerEntry {
    version: u64,
    expires_at: i64,
}

/// Per-process ledger. Journeys must resume on the node that persisted them.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    entries: DashMap<CorrelationId, LedgerEntry>,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionLedger for InMemoryLedger {
    fn advance(&self, correlation_id: CorrelationId, expires_at: i64) -> u64 {
        let mut entry = self.entries.entry(correlation_id).or_insert(LedgerEntry {
            version: 0,
            expires_at,
        });
        entry.version += 1;
        entry.version
    }

    fn latest(&self, correlation_id: CorrelationId) -> Option<u64> {
        self.entries.get(&correlation_id).map(|e| e.version)
    }

    fn retire(&self, correlation_id: CorrelationId) {
        self.entries.remove(&correlation_id);
    }

    fn sweep(&self, now: i64) {
        if self.entries.len() <= SWEEP_THRESHOLD {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        debug!(removed = before - self.entries.len(), "Swept expired journeys");
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Keeps nothing: any unexpired token with a valid MAC resumes, on any node
/// sharing the master key.
///
/// Superseded and finished tokens stay usable until they expire.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatelessLedger;

impl VersionLedger for StatelessLedger {
    fn advance(&self, _correlation_id: CorrelationId, _expires_at: i64) -> u64 {
        0
    }

    fn latest(&self, _correlation_id: CorrelationId) -> Option<u64> {
        None
    }

    fn accepts(&self, _correlation_id: CorrelationId, _version: u64) -> bool {
        true
    }

    fn retire(&self, _correlation_id: CorrelationId) {}

    fn len(&self) -> usize {
        0
    }
}

/// Ledger selected by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LedgerMode {
    #[default]
    Memory,
    Stateless,
}

impl LedgerMode {
    #[must_use]
    pub fn build(self) -> Arc<dyn VersionLedger> {
        match self {
            Self::Memory => Arc::new(InMemoryLedger::new()),
            Self::Stateless => Arc::new(StatelessLedger),
        }
    }
}

impl FromStr for LedgerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "stateless" => Ok(Self::Stateless),
            other => Err(format!("unknown ledger '{other}', expected memory or stateless")),
        }
    }
}

impl Display for LedgerMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Stateless => f.write_str("stateless"),
        }
    }
}
