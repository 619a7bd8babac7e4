//! Environment variable secret provider.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::{SecretError, SecretProvider, SecretValue};

/// Reads each key from an environment variable.
///
/// A key id maps to the variable named by `SECRET_MAP_<ID>` if present, and
/// otherwise to the id upper-cased with every non-alphanumeric character
/// replaced by `_` (`B2C_1A_TokenSigningKey` reads `B2C_1A_TOKENSIGNINGKEY`).
#[derive(Debug, Default)]
pub struct EnvSecretProvider {
    mappings: HashMap<String, String>,
}

impl EnvSecretProvider {
    #[must_use]
    pub fn new(mappings: HashMap<String, String>) -> Self {
        Self { mappings }
    }

    fn variable_name(&self, key_id: &str) -> String {
        if let Some(mapped) = self.mappings.get(&key_id.to_lowercase()) {
            return mapped.clone();
        }
        key_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn get_secret(&self, name: &str) -> Result<SecretValue, SecretError> {
        let var = self.variable_name(name);
        match std::env::var(&var) {
            Ok(value) if !value.is_empty() => {
                tracing::debug!(secret_name = name, env_var = %var, "Secret read from environment");
                Ok(SecretValue::new(name, value.into_bytes()))
            }
            _ => Err(SecretError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    async fn health_check(&self) -> Result<bool, SecretError> {
        Ok(true)
    }

    fn provider_type(&self) -> &'static str {
        "env"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_variable_names_from_key_ids() {
        let provider = EnvSecretProvider::default();
        assert_eq!(provider.variable_name("B2C_1A_TokenSigningKey"), "B2C_1A_TOKENSIGNINGKEY");
        assert_eq!(provider.variable_name("contoso.client-secret"), "CONTOSO_CLIENT_SECRET");
    }

    #[tokio::test]
    async fn reads_mapped_variable() {
        std::env::set_var("JOURNEY_TEST_MAPPED_SECRET", "s3cret");
        let mut mappings = HashMap::new();
        mappings.insert(
            "b2c_1a_contososecret".to_string(),
            "JOURNEY_TEST_MAPPED_SECRET".to_string(),
        );
        let provider = EnvSecretProvider::new(mappings);

        let secret = provider.get_secret("B2C_1A_ContosoSecret").await.unwrap();
        assert_eq!(secret.as_str().unwrap(), "s3cret");
        std::env::remove_var("JOURNEY_TEST_MAPPED_SECRET");
    }

    #[tokio::test]
    async fn empty_or_missing_variable_is_not_found() {
        std::env::set_var("JOURNEY_TEST_EMPTY_SECRET", "");
        let provider = EnvSecretProvider::default();
        for id in ["journey_test_empty_secret", "journey_test_absent_secret"] {
            let err = provider.get_secret(id).await.unwrap_err();
            assert!(matches!(err, SecretError::NotFound { .. }));
        }
        std::env::remove_var("JOURNEY_TEST_EMPTY_SECRET");
    }
}
