//! Service configuration loaded from environment variables.
//!
//! Loading fails fast: a missing or malformed value stops the service with
//! a message naming the variable. Insecure development defaults are
//! tolerated with a warning, and refused when `APP_ENV=production`.

use std::env;
use std::path::PathBuf;

use thiserror::Error;
use xavyo_journey::{LedgerMode, DEFAULT_SSO_TTL_SECS, DEFAULT_TTL_SECS};

/// Development continuity master key: 64 hex '0' characters.
pub const INSECURE_MASTER_KEY: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Application environment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Production,
}

impl AppEnvironment {
    /// Parses `APP_ENV`, defaulting to `Development`.
    pub fn from_env_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => {
                tracing::warn!(
                    value = other,
                    "Unrecognized APP_ENV value, defaulting to Development"
                );
                Self::Development
            }
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        *self == Self::Production
    }
}

impl std::fmt::Display for AppEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Signing key and certificate ids resolved through the secret provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKeyIds {
    pub key_id: String,
    pub certificate_id: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: AppEnvironment,
    /// Directory of policy documents (`*.yaml`, `*.yml`, `*.json`).
    pub policy_dir: PathBuf,
    /// Externally visible base URL of the gateway.
    pub public_base_url: String,
    /// Continuity master key, hex-decoded.
    pub master_key: Vec<u8>,
    /// `None` in development means an ephemeral key is generated at startup.
    pub signing: Option<SigningKeyIds>,
    pub journey_ttl_secs: i64,
    pub sso_lifetime_secs: i64,
    /// `Memory` pins a journey to the node that persisted it.
    pub continuity_ledger: LedgerMode,
    pub rust_log: String,
    pub cors_origins: Vec<String>,
    pub host: String,
    pub port: u16,
}

impl Config {
    /// Loads configuration from the process environment and `.env`.
    ///
    /// # Required Variables
    ///
    /// - `POLICY_DIR` - Directory holding the policy documents
    /// - `PUBLIC_BASE_URL` - Base URL relying parties and browsers use
    ///
    /// # Optional Variables
    ///
    /// - `APP_ENV` - `development` (default) or `production`
    /// - `JOURNEY_MASTER_KEY` - 64 hex characters (insecure default in development)
    /// - `SIGNING_KEY_ID` / `SIGNING_CERTIFICATE_ID` - Secret ids of the issuing key pair
    /// - `JOURNEY_TTL_SECONDS` - Continuity token lifetime (default: 900)
    /// - `SSO_LIFETIME_SECONDS` - SSO cookie lifetime (default: 28800)
    /// - `JOURNEY_CONTINUITY_LEDGER` - `memory` (default) or `stateless`
    /// - `RUST_LOG` - Log filter (default: "info")
    /// - `CORS_ORIGINS` - Comma-separated allowed origins (default: "*")
    /// - `HOST` / `PORT` - Bind address (default: 0.0.0.0:8080)
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let app_env =
            AppEnvironment::from_env_str(&var("APP_ENV").unwrap_or_else(|| "development".into()));

        let policy_dir = var("POLICY_DIR")
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingVar("POLICY_DIR".to_string()))?;

        let public_base_url = var("PUBLIC_BASE_URL")
            .ok_or_else(|| ConfigError::MissingVar("PUBLIC_BASE_URL".to_string()))?;
        if !public_base_url.starts_with("https://") && !public_base_url.starts_with("http://") {
            return Err(ConfigError::InvalidValue {
                var: "PUBLIC_BASE_URL".to_string(),
                message: "Must be an absolute http(s) URL".to_string(),
            });
        }
        let public_base_url = public_base_url.trim_end_matches('/').to_string();

        let master_key_hex = var("JOURNEY_MASTER_KEY").unwrap_or_else(|| INSECURE_MASTER_KEY.into());
        let master_key = hex::decode(master_key_hex.trim()).map_err(|e| {
            ConfigError::InvalidValue {
                var: "JOURNEY_MASTER_KEY".to_string(),
                message: format!("Must be hex: {e}"),
            }
        })?;
        if master_key.len() < 32 {
            return Err(ConfigError::InvalidValue {
                var: "JOURNEY_MASTER_KEY".to_string(),
                message: format!("Must be at least 32 bytes, got {}", master_key.len()),
            });
        }

        let signing = match (var("SIGNING_KEY_ID"), var("SIGNING_CERTIFICATE_ID")) {
            (Some(key_id), Some(certificate_id)) => Some(SigningKeyIds {
                key_id,
                certificate_id,
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::MissingVar("SIGNING_CERTIFICATE_ID".to_string()))
            }
            (None, Some(_)) => return Err(ConfigError::MissingVar("SIGNING_KEY_ID".to_string())),
        };

        let journey_ttl_secs = parse_secs(&var, "JOURNEY_TTL_SECONDS", DEFAULT_TTL_SECS)?;
        let sso_lifetime_secs = parse_secs(&var, "SSO_LIFETIME_SECONDS", DEFAULT_SSO_TTL_SECS)?;

        let continuity_ledger = match var("JOURNEY_CONTINUITY_LEDGER") {
            Some(raw) => raw.parse::<LedgerMode>().map_err(|message| ConfigError::InvalidValue {
                var: "JOURNEY_CONTINUITY_LEDGER".to_string(),
                message,
            })?,
            None => LedgerMode::default(),
        };

        let rust_log = var("RUST_LOG").unwrap_or_else(|| "info".to_string());
        let cors_origins = var("CORS_ORIGINS")
            .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
            .unwrap_or_else(|| vec!["*".to_string()]);
        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match var("PORT") {
            Some(p) => p.parse().map_err(|e| ConfigError::InvalidValue {
                var: "PORT".to_string(),
                message: format!("{e}"),
            })?,
            None => 8080,
        };

        Ok(Self {
            app_env,
            policy_dir,
            public_base_url,
            master_key,
            signing,
            journey_ttl_secs,
            sso_lifetime_secs,
            continuity_ledger,
            rust_log,
            cors_origins,
            host,
            port,
        })
    }

    /// The SSO cookie is marked `Secure` whenever the gateway is served
    /// over HTTPS.
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.public_base_url.starts_with("https://")
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Lists insecure settings. `Ok` carries warnings in development,
    /// `Err` carries the same findings in production.
    pub fn validate_security_config(&self) -> Result<Vec<String>, Vec<String>> {
        let mut issues = Vec::new();

        if self.master_key.iter().all(|b| *b == 0) {
            issues.push(
                "JOURNEY_MASTER_KEY is using the default insecure value (all zeros)".to_string(),
            );
        }
        if self.signing.is_none() {
            issues.push(
                "SIGNING_KEY_ID is not set; an ephemeral signing key will be generated".to_string(),
            );
        }
        if !self.secure_cookies() {
            issues.push("PUBLIC_BASE_URL is not HTTPS; SSO cookies are not Secure".to_string());
        }
        if self.cors_origins.iter().any(|o| o == "*") {
            issues.push(
                "CORS_ORIGINS contains wildcard '*' which is not allowed in production".to_string(),
            );
        }

        if issues.is_empty() {
            return Ok(Vec::new());
        }
        if self.app_env.is_production() {
            Err(issues)
        } else {
            Ok(issues)
        }
    }
}

fn parse_secs(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: i64,
) -> Result<i64, ConfigError> {
    let Some(raw) = var(name) else {
        return Ok(default);
    };
    match raw.parse::<i64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(ConfigError::InvalidValue {
            var: name.to_string(),
            message: format!("Must be a positive number of seconds, got '{raw}'"),
        }),
    }
}
