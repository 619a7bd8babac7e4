//! TTL cache in front of a secret provider.
//!
//! Key material is read on every federation call, so lookups go through a
//! per-process cache. When the backing provider is unavailable an expired
//! entry is served rather than failing the journey; a missing secret is
//! never served from a stale entry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::{SecretError, SecretProvider, SecretValue};

#[derive(Debug, Clone)]
struct CacheEntry {
    secret: SecretValue,
    expires_at: DateTime<Utc>,
}

pub struct CachedSecretProvider {
    inner: Arc<dyn SecretProvider>,
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl CachedSecretProvider {
    pub fn new(inner: Arc<dyn SecretProvider>, ttl_seconds: u64) -> Self {
        Self {
            inner,
            entries: DashMap::new(),
            ttl: Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(i64::MAX / 1000)),
        }
    }

    /// Drops one entry so the next lookup reaches the provider (key rotation).
    pub fn invalidate(&self, name: &str) {
        self.entries.remove(name);
    }

    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.entries.len()
    }

    fn fresh(&self, name: &str) -> Option<SecretValue> {
        let entry = self.entries.get(name)?;
        (Utc::now() < entry.expires_at).then(|| entry.secret.clone())
    }
}

impl std::fmt::Debug for CachedSecretProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedSecretProvider")
            .field("provider_type", &self.inner.provider_type())
            .field("cached", &self.entries.len())
            .field("ttl_seconds", &self.ttl.num_seconds())
            .finish()
    }
}

#[async_trait]
impl SecretProvider for CachedSecretProvider {
    async fn get_secret(&self, name: &str) -> Result<SecretValue, SecretError> {
        if let Some(secret) = self.fresh(name) {
            tracing::trace!(secret_name = name, "Secret cache hit");
            return Ok(secret);
        }

        match self.inner.get_secret(name).await {
            Ok(secret) => {
                self.entries.insert(
                    name.to_string(),
                    CacheEntry {
                        secret: secret.clone(),
                        expires_at: Utc::now() + self.ttl,
                    },
                );
                Ok(secret)
            }
            Err(SecretError::ProviderUnavailable { provider, detail }) => {
                if let Some(stale) = self.entries.get(name) {
                    tracing::warn!(
                        secret_name = name,
                        provider = %provider,
                        error = %detail,
                        "Secret provider unavailable, serving expired cache entry"
                    );
                    return Ok(stale.secret.clone());
                }
                Err(SecretError::ProviderUnavailable { provider, detail })
            }
            Err(e) => Err(e),
        }
    }

    async fn health_check(&self) -> Result<bool, SecretError> {
        self.inner.health_check().await
    }

    fn provider_type(&self) -> &'static str {
        self.inner.provider_type()
    }
}
