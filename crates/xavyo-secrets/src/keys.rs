//! Key material addressed by the opaque key ids that policies reference.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{SecretError, SecretProvider, SecretValue};

/// A resolved key, classified by its PEM armor.
#[derive(Clone)]
pub enum KeyMaterial {
    /// PKCS#8 or PKCS#1 private key, used for signing.
    RsaPrivateKey { pem: String },
    /// X.509 certificate, used to verify a partner's signatures or published
    /// alongside our own signing key.
    Certificate { pem: String },
    /// Anything without PEM armor: client secrets, HMAC keys.
    Symmetric(Vec<u8>),
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RsaPrivateKey { .. } => f.write_str("KeyMaterial::RsaPrivateKey([REDACTED])"),
            Self::Certificate { pem } => f
                .debug_struct("KeyMaterial::Certificate")
                .field("len", &pem.len())
                .finish(),
            Self::Symmetric(_) => f.write_str("KeyMaterial::Symmetric([REDACTED])"),
        }
    }
}

impl KeyMaterial {
    /// Classifies raw secret bytes.
    #[must_use]
    pub fn detect(raw: Vec<u8>) -> Self {
        let Ok(text) = std::str::from_utf8(&raw) else {
            return Self::Symmetric(raw);
        };
        let trimmed = text.trim();
        if trimmed.starts_with("-----BEGIN CERTIFICATE-----") {
            Self::Certificate {
                pem: trimmed.to_string(),
            }
        } else if trimmed.starts_with("-----BEGIN") && trimmed.contains("PRIVATE KEY-----") {
            Self::RsaPrivateKey {
                pem: trimmed.to_string(),
            }
        } else {
            Self::Symmetric(raw)
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RsaPrivateKey { .. } => "private_key",
            Self::Certificate { .. } => "certificate",
            Self::Symmetric(_) => "symmetric",
        }
    }

    pub fn private_key_pem(&self) -> Result<&str, SecretError> {
        match self {
            Self::RsaPrivateKey { pem } => Ok(pem),
            other => Err(wrong_kind("private_key", other)),
        }
    }

    pub fn certificate_pem(&self) -> Result<&str, SecretError> {
        match self {
            Self::Certificate { pem } => Ok(pem),
            other => Err(wrong_kind("certificate", other)),
        }
    }

    pub fn secret_bytes(&self) -> Result<&[u8], SecretError> {
        match self {
            Self::Symmetric(bytes) => Ok(bytes),
            other => Err(wrong_kind("symmetric", other)),
        }
    }

    /// Symmetric secret as text, trailing newline removed (client secrets).
    pub fn secret_str(&self) -> Result<&str, SecretError> {
        let bytes = self.secret_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::trim_end)
            .map_err(|e| SecretError::InvalidValue {
                name: "symmetric".to_string(),
                detail: format!("Not valid UTF-8: {e}"),
            })
    }
}

fn wrong_kind(expected: &str, actual: &KeyMaterial) -> SecretError {
    SecretError::InvalidValue {
        name: expected.to_string(),
        detail: format!("expected {expected}, key is {}", actual.kind()),
    }
}

/// Resolves a policy key id to key material.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve_key(&self, key_id: &str) -> Result<KeyMaterial, SecretError>;
}

/// [`KeyResolver`] backed by a [`SecretProvider`].
#[derive(Clone)]
pub struct SecretKeyResolver {
    provider: Arc<dyn SecretProvider>,
}

impl SecretKeyResolver {
    pub fn new(provider: Arc<dyn SecretProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl KeyResolver for SecretKeyResolver {
    async fn resolve_key(&self, key_id: &str) -> Result<KeyMaterial, SecretError> {
        let SecretValue { value, .. } = self.provider.get_secret(key_id).await?;
        let material = KeyMaterial::detect(value);
        tracing::debug!(key_id, kind = material.kind(), "Key resolved");
        Ok(material)
    }
}
