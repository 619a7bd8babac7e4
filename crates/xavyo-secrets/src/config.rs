//! Secret provider configuration parsed from environment variables.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use crate::SecretError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderType {
    /// Environment variables.
    #[default]
    Env,
    /// One file per key, for mounted secret volumes.
    File,
    /// In-memory map populated by the host process.
    Static,
}

impl ProviderType {
    /// Case-insensitive parse of a `SECRET_PROVIDER` value.
    pub fn from_str_value(s: &str) -> Result<Self, SecretError> {
        match s.to_lowercase().as_str() {
            "env" | "environment" => Ok(Self::Env),
            "file" | "filesystem" => Ok(Self::File),
            "static" | "memory" => Ok(Self::Static),
            other => Err(SecretError::ConfigError {
                detail: format!(
                    "Unknown SECRET_PROVIDER value '{other}'. Valid options: env, file, static"
                ),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecretProviderConfig {
    pub provider_type: ProviderType,
    /// Key id to provider-specific location (variable name or file path).
    pub secret_mappings: HashMap<String, String>,
    /// Directory searched by the file provider for unmapped key ids.
    pub secret_dir: Option<PathBuf>,
    pub cache_ttl_seconds: u64,
}

impl Default for SecretProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: ProviderType::Env,
            secret_mappings: HashMap::new(),
            secret_dir: None,
            cache_ttl_seconds: 300,
        }
    }
}

impl SecretProviderConfig {
    /// Reads:
    /// - `SECRET_PROVIDER` (default `env`)
    /// - `SECRET_CACHE_TTL_SECONDS` (default 300)
    /// - `SECRET_DIR` for the file provider
    /// - `SECRET_MAP_<KEY_ID>` explicit mappings
    pub fn from_env() -> Result<Self, SecretError> {
        let provider_type = match env::var("SECRET_PROVIDER") {
            Ok(s) if !s.is_empty() => ProviderType::from_str_value(&s)?,
            _ => ProviderType::Env,
        };

        let cache_ttl_seconds = match env::var("SECRET_CACHE_TTL_SECONDS") {
            Ok(s) => s.parse::<u64>().map_err(|_| SecretError::ConfigError {
                detail: format!("SECRET_CACHE_TTL_SECONDS must be a number, got '{s}'"),
            })?,
            Err(_) => 300,
        };

        let secret_dir = env::var("SECRET_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            provider_type,
            secret_mappings: Self::parse_secret_mappings(env::vars()),
            secret_dir,
            cache_ttl_seconds,
        })
    }

    /// `SECRET_MAP_B2C_1A_CONTOSOSECRET=/run/secrets/contoso` maps the key id
    /// `b2c_1a_contososecret`. Key ids are matched case-insensitively.
    fn parse_secret_mappings(vars: impl Iterator<Item = (String, String)>) -> HashMap<String, String> {
        vars.filter_map(|(key, value)| {
            key.strip_prefix("SECRET_MAP_")
                .map(|name| (name.to_lowercase(), value))
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_type_parsing() {
        assert_eq!(ProviderType::from_str_value("ENV").unwrap(), ProviderType::Env);
        assert_eq!(ProviderType::from_str_value("file").unwrap(), ProviderType::File);
        assert_eq!(ProviderType::from_str_value("memory").unwrap(), ProviderType::Static);
        assert!(ProviderType::from_str_value("vault").is_err());
    }

    #[test]
    fn mappings_are_lowercased_and_filtered() {
        let vars = vec![
            ("SECRET_MAP_B2C_1A_CONTOSOSECRET".to_string(), "/run/a".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
        ];
        let mappings = SecretProviderConfig::parse_secret_mappings(vars.into_iter());
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings["b2c_1a_contososecret"], "/run/a");
    }
}
