//! Session continuity: journey snapshots carried across browser round trips
//! in tamper-evident tokens.
//!
//! ```text
//! token    = base64url(envelope JSON) "." base64url(HMAC-SHA256(envelope))
//! envelope = { v, cid, ver, iat, exp, snapshot (clear part), sealed }
//! sealed   = base64url(nonce || AES-256-GCM(sensitive claims, pending state, SSO record, seed))
//! ```
//!
//! The MAC and encryption keys are derived from one master key with
//! HKDF-SHA256. A [`VersionLedger`] keeps the latest persisted version of
//! every live journey; only a token carrying that version resumes.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};
use xavyo_claims::ClaimsBag;
use xavyo_core::CorrelationId;
use xavyo_federation::PendingState;
use xavyo_policy::ClaimsSchema;

use crate::ledger::{InMemoryLedger, VersionLedger};
use crate::locks::{JourneyGuard, JourneyLocks};
use crate::snapshot::{JourneySeed, JourneySnapshot, RelyingPartyRequest, SsoRecord};

type HmacSha256 = Hmac<Sha256>;

/// Default journey lifetime, measured from journey start (15 minutes).
pub const DEFAULT_TTL_SECS: i64 = 15 * 60;

/// Default lifetime of a sealed SSO record (8 hours).
pub const DEFAULT_SSO_TTL_SECS: i64 = 8 * 60 * 60;

/// Minimum master key length in bytes.
pub const MIN_MASTER_KEY_LEN: usize = 32;

const TOKEN_FORMAT: u32 = 1;
const NONCE_SIZE: usize = 12;
const HKDF_SALT: &[u8] = b"xavyo-journey-continuity-v1";
const SSO_AAD: &[u8] = b"xavyo-journey-sso";

/// Idle lock entries are pruned once this many are held.
const LOCK_PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContinuityError {
    #[error("continuity token has expired")]
    Expired,

    #[error("continuity token rejected: {0}")]
    Tampered(String),

    /// Not the latest persisted version of its journey, or the journey is
    /// already finished.
    #[error("continuity token has been superseded")]
    Replayed,

    #[error("continuity key error: {0}")]
    Key(String),

    #[error("failed to seal journey state: {0}")]
    Seal(String),
}

fn tampered(detail: impl Into<String>) -> ContinuityError {
    ContinuityError::Tampered(detail.into())
}

/// Opaque token handed to the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuityToken(String);

impl ContinuityToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for ContinuityToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    v: u32,
    cid: CorrelationId,
    ver: u64,
    iat: i64,
    exp: i64,
    snapshot: JourneySnapshot,
    sealed: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SealedPart {
    sensitive: ClaimsBag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending: Option<PendingState>,
    #[serde(default)]
    sso: SsoRecord,
    #[serde(default)]
    seed: JourneySeed,
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedSso {
    exp: i64,
    record: SsoRecord,
}

/// A resumed journey, exclusively held until `guard` is dropped.
#[derive(Debug)]
pub struct Resumed {
    pub correlation_id: CorrelationId,
    pub snapshot: JourneySnapshot,
    pub guard: JourneyGuard,
}

pub struct ContinuityService {
    mac_key: [u8; 32],
    cipher: Aes256Gcm,
    ttl: Duration,
    ledger: Arc<dyn VersionLedger>,
    locks: JourneyLocks,
}

impl std::fmt::Debug for ContinuityService {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuityService")
            .field("ttl_secs", &self.ttl.num_seconds())
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

fn derive(hkdf: &Hkdf<Sha256>, info: &[u8]) -> Result<[u8; 32], ContinuityError> {
    let mut key = [0u8; 32];
    hkdf.expand(info, &mut key)
        .map_err(|e| ContinuityError::Key(format!("HKDF expand failed: {e}")))?;
    Ok(key)
}

impl ContinuityService {
    pub fn new(master_key: &[u8], ttl_secs: i64) -> Result<Self, ContinuityError> {
        if master_key.len() < MIN_MASTER_KEY_LEN {
            return Err(ContinuityError::Key(format!(
                "master key must be at least {MIN_MASTER_KEY_LEN} bytes, got {}",
                master_key.len()
            )));
        }
        let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), master_key);
        let mac_key = derive(&hkdf, b"mac")?;
        let enc_key = derive(&hkdf, b"enc")?;
        let cipher = Aes256Gcm::new_from_slice(&enc_key)
            .map_err(|e| ContinuityError::Key(e.to_string()))?;
        Ok(Self {
            mac_key,
            cipher,
            ttl: Duration::seconds(ttl_secs),
            ledger: Arc::new(InMemoryLedger::new()),
            locks: JourneyLocks::new(),
        })
    }

    /// Replaces the per-process ledger, e.g. with one every node shares.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn VersionLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn locks(&self) -> &JourneyLocks {
        &self.locks
    }

    fn mac(&self) -> Result<HmacSha256, ContinuityError> {
        <HmacSha256 as Mac>::new_from_slice(&self.mac_key).map_err(|e| ContinuityError::Key(e.to_string()))
    }

    fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<String, ContinuityError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| ContinuityError::Seal(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    fn open(&self, sealed: &str, aad: &[u8]) -> Result<Vec<u8>, ContinuityError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(sealed)
            .map_err(|e| tampered(format!("sealed part is not base64url: {e}")))?;
        if bytes.len() < NONCE_SIZE {
            return Err(tampered("sealed part too short"));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| tampered("sealed part does not decrypt"))
    }

    /// Seals `snapshot` into a new token and makes it the only version of
    /// `correlation_id` that [`ContinuityService::resume`] accepts.
    ///
    /// Callers resuming a journey must hold its [`JourneyGuard`] until this
    /// returns.
    pub fn persist(
        &self,
        correlation_id: CorrelationId,
        snapshot: &JourneySnapshot,
        schema: &ClaimsSchema,
    ) -> Result<ContinuityToken, ContinuityError> {
        let now = Utc::now();
        let expires_at = (snapshot.started_at + self.ttl).timestamp();
        if expires_at <= now.timestamp() {
            return Err(ContinuityError::Expired);
        }

        let version = self.ledger.advance(correlation_id, expires_at);
        self.sweep(now.timestamp());

        let (clear_bag, sensitive) = snapshot.bag.partition(schema);
        let secret = SealedPart {
            sensitive,
            pending: snapshot.pending.clone(),
            sso: snapshot.sso.clone(),
            seed: snapshot.seed,
        };
        let mut clear = snapshot.clone();
        clear.bag = clear_bag;
        clear.pending = None;
        clear.sso = SsoRecord::default();
        clear.seed = JourneySeed::default();

        let sealed_json =
            serde_json::to_vec(&secret).map_err(|e| ContinuityError::Seal(e.to_string()))?;
        let envelope = Envelope {
            v: TOKEN_FORMAT,
            cid: correlation_id,
            ver: version,
            iat: now.timestamp(),
            exp: expires_at,
            snapshot: clear,
            sealed: self.seal(&sealed_json, &aad(correlation_id, version))?,
        };
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&envelope).map_err(|e| ContinuityError::Seal(e.to_string()))?,
        );
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let tag = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        debug!(
            correlation_id = %correlation_id,
            journey_id = %snapshot.journey_id,
            version,
            "Journey state persisted"
        );
        Ok(ContinuityToken(format!("{payload}.{tag}")))
    }

    fn verify(&self, token: &str) -> Result<Envelope, ContinuityError> {
        let (payload, tag) = token
            .split_once('.')
            .ok_or_else(|| tampered("token has no MAC"))?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| tampered("MAC is not base64url"))?;
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&tag)
            .map_err(|_| tampered("MAC mismatch"))?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| tampered("payload is not base64url"))?;
        let envelope: Envelope =
            serde_json::from_slice(&json).map_err(|e| tampered(format!("invalid envelope: {e}")))?;
        if envelope.v != TOKEN_FORMAT {
            return Err(tampered(format!("unsupported token format {}", envelope.v)));
        }
        Ok(envelope)
    }

    /// Verifies `token`, takes the journey's lock and returns the snapshot.
    ///
    /// Expired, tampered and superseded tokens are terminal for the journey.
    pub async fn resume(&self, token: &str) -> Result<Resumed, ContinuityError> {
        let envelope = self.verify(token).inspect_err(|e| {
            warn!(error = %e, "Continuity token rejected");
        })?;
        if envelope.exp <= Utc::now().timestamp() {
            debug!(correlation_id = %envelope.cid, "Continuity token expired");
            return Err(ContinuityError::Expired);
        }

        let guard = self.locks.acquire(envelope.cid).await;
        if !self.ledger.accepts(envelope.cid, envelope.ver) {
            warn!(
                correlation_id = %envelope.cid,
                presented = envelope.ver,
                latest = ?self.ledger.latest(envelope.cid),
                "Superseded continuity token presented"
            );
            return Err(ContinuityError::Replayed);
        }

        let sealed = self.open(&envelope.sealed, &aad(envelope.cid, envelope.ver))?;
        let secret: SealedPart = serde_json::from_slice(&sealed)
            .map_err(|e| tampered(format!("invalid sealed part: {e}")))?;

        let mut snapshot = envelope.snapshot;
        snapshot.bag.absorb(secret.sensitive);
        snapshot.pending = secret.pending;
        snapshot.sso = secret.sso;
        snapshot.seed = secret.seed;

        Ok(Resumed {
            correlation_id: envelope.cid,
            snapshot,
            guard,
        })
    }

    /// Reads the policy and relying-party request out of a token whose MAC
    /// verifies, ignoring expiry and version.
    ///
    /// Lets the gateway restart a journey from the beginning once its token
    /// is expired or superseded.
    #[must_use]
    pub fn recover_request(&self, token: &str) -> Option<(String, RelyingPartyRequest)> {
        let envelope = self.verify(token).ok()?;
        Some((envelope.snapshot.policy_id, envelope.snapshot.request))
    }

    /// Retires a journey: none of its tokens resume afterwards, unless the
    /// ledger is stateless. Its lock entry goes when the last guard drops.
    pub fn finish(&self, correlation_id: CorrelationId) {
        self.ledger.retire(correlation_id);
    }

    fn sweep(&self, now: i64) {
        self.ledger.sweep(now);
        if self.locks.len() > LOCK_PRUNE_THRESHOLD {
            self.locks.prune();
        }
    }

    /// Seals an SSO record into a cookie value.
    pub fn seal_sso(&self, record: &SsoRecord, lifetime_secs: i64) -> Result<String, ContinuityError> {
        let sealed = SealedSso {
            exp: Utc::now().timestamp() + lifetime_secs,
            record: record.clone(),
        };
        let json = serde_json::to_vec(&sealed).map_err(|e| ContinuityError::Seal(e.to_string()))?;
        self.seal(&json, SSO_AAD)
    }

    /// Opens an SSO cookie value sealed by [`ContinuityService::seal_sso`].
    pub fn open_sso(&self, value: &str) -> Result<SsoRecord, ContinuityError> {
        let json = self.open(value, SSO_AAD)?;
        let sealed: SealedSso = serde_json::from_slice(&json)
            .map_err(|e| tampered(format!("invalid SSO record: {e}")))?;
        if sealed.exp <= Utc::now().timestamp() {
            return Err(ContinuityError::Expired);
        }
        Ok(sealed.record)
    }
}

fn aad(correlation_id: CorrelationId, version: u64) -> Vec<u8> {
    format!("{correlation_id}:{version}").into_bytes()
}
