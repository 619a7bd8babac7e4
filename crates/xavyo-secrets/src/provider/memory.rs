//! In-memory secret provider.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{SecretError, SecretProvider, SecretValue};

/// Holds secrets supplied by the host process: throwaway development keys
/// generated at startup, or fixtures in tests.
#[derive(Debug, Default)]
pub struct StaticSecretProvider {
    secrets: DashMap<String, Vec<u8>>,
}

impl StaticSecretProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.secrets.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn with(self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.insert(name, value);
        self
    }
}

#[async_trait]
impl SecretProvider for StaticSecretProvider {
    async fn get_secret(&self, name: &str) -> Result<SecretValue, SecretError> {
        self.secrets
            .get(name)
            .map(|v| SecretValue::new(name, v.value().clone()))
            .ok_or_else(|| SecretError::NotFound {
                name: name.to_string(),
            })
    }

    async fn health_check(&self) -> Result<bool, SecretError> {
        Ok(true)
    }

    fn provider_type(&self) -> &'static str {
        "static"
    }
}
