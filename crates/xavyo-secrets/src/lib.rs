//! Key and secret resolution for the journey engine.
//!
//! Policies never embed key material. A technical profile names a key by an
//! opaque id (`B2C_1A_TokenSigningKey`, say) and the adapter resolves it at
//! call time through a [`KeyResolver`]. The default resolver sits on top of a
//! [`SecretProvider`], which reads raw secret bytes from environment
//! variables, files or an in-memory map, wrapped in a TTL cache.
//!
//! ```rust,ignore
//! use xavyo_secrets::{build_provider, KeyResolver, SecretKeyResolver, SecretProviderConfig};
//!
//! let config = SecretProviderConfig::from_env()?;
//! let resolver = SecretKeyResolver::new(build_provider(&config)?);
//! let key = resolver.resolve_key("B2C_1A_TokenSigningKey").await?;
//! let pem = key.private_key_pem()?;
//! ```

pub mod cache;
pub mod config;
pub mod keys;
pub mod provider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use cache::CachedSecretProvider;
pub use config::{ProviderType, SecretProviderConfig};
pub use keys::{KeyMaterial, KeyResolver, SecretKeyResolver};
pub use provider::env::EnvSecretProvider;
pub use provider::file::FileSecretProvider;
pub use provider::memory::StaticSecretProvider;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Secret not found: '{name}'")]
    NotFound { name: String },

    #[error("Secret provider '{provider}' unavailable: {detail}")]
    ProviderUnavailable { provider: String, detail: String },

    /// The secret exists but is not usable as requested (wrong kind of key,
    /// not UTF-8, empty).
    #[error("Invalid secret value for '{name}': {detail}")]
    InvalidValue { name: String, detail: String },

    #[error("Secret provider configuration error: {detail}")]
    ConfigError { detail: String },
}

/// Raw secret bytes with provenance.
#[derive(Clone)]
pub struct SecretValue {
    pub name: String,
    pub value: Vec<u8>,
    pub loaded_at: DateTime<Utc>,
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretValue")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

impl SecretValue {
    pub fn new(name: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            value,
            loaded_at: Utc::now(),
        }
    }

    pub fn as_str(&self) -> Result<&str, SecretError> {
        std::str::from_utf8(&self.value).map_err(|e| SecretError::InvalidValue {
            name: self.name.clone(),
            detail: format!("Not valid UTF-8: {e}"),
        })
    }

    /// Decodes a hex-encoded value (symmetric keys are usually stored so).
    pub fn as_hex_bytes(&self) -> Result<Vec<u8>, SecretError> {
        hex::decode(self.as_str()?.trim()).map_err(|e| SecretError::InvalidValue {
            name: self.name.clone(),
            detail: format!("Not valid hex: {e}"),
        })
    }
}

/// A source of raw secrets addressed by logical name.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<SecretValue, SecretError>;

    /// `Ok(false)` means degraded (some mapped secrets are unreadable).
    async fn health_check(&self) -> Result<bool, SecretError>;

    fn provider_type(&self) -> &'static str;
}

/// Builds the configured provider wrapped in a [`CachedSecretProvider`].
pub fn build_provider(
    config: &SecretProviderConfig,
) -> Result<Arc<dyn SecretProvider>, SecretError> {
    let inner: Arc<dyn SecretProvider> = match config.provider_type {
        ProviderType::Env => Arc::new(EnvSecretProvider::new(config.secret_mappings.clone())),
        ProviderType::File => Arc::new(FileSecretProvider::new(config)?),
        ProviderType::Static => Arc::new(StaticSecretProvider::default()),
    };
    tracing::info!(
        provider = inner.provider_type(),
        cache_ttl_seconds = config.cache_ttl_seconds,
        "Secret provider initialized"
    );
    Ok(Arc::new(CachedSecretProvider::new(
        inner,
        config.cache_ttl_seconds,
    )))
}
