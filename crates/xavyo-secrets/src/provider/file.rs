//! File-based secret provider for mounted secret volumes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::SecretProviderConfig;
use crate::{SecretError, SecretProvider, SecretValue};

/// Reads each key from its own file.
///
/// A key id resolves to its explicit `SECRET_MAP_<ID>` path, or else to
/// `<SECRET_DIR>/<id>` or `<SECRET_DIR>/<id>.pem`, whichever exists.
#[derive(Debug)]
pub struct FileSecretProvider {
    paths: HashMap<String, PathBuf>,
    dir: Option<PathBuf>,
}

impl FileSecretProvider {
    pub fn new(config: &SecretProviderConfig) -> Result<Self, SecretError> {
        let paths: HashMap<String, PathBuf> = config
            .secret_mappings
            .iter()
            .map(|(name, path)| (name.clone(), PathBuf::from(path)))
            .collect();

        if paths.is_empty() && config.secret_dir.is_none() {
            return Err(SecretError::ConfigError {
                detail: "SECRET_PROVIDER=file needs SECRET_DIR or SECRET_MAP_* entries"
                    .to_string(),
            });
        }
        Ok(Self {
            paths,
            dir: config.secret_dir.clone(),
        })
    }

    fn candidates(&self, key_id: &str) -> Vec<PathBuf> {
        if let Some(path) = self.paths.get(&key_id.to_lowercase()) {
            return vec![path.clone()];
        }
        self.dir
            .as_ref()
            .map(|dir| vec![dir.join(key_id), dir.join(format!("{key_id}.pem"))])
            .unwrap_or_default()
    }

    #[cfg(unix)]
    fn warn_if_world_readable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode();
            if mode & 0o004 != 0 {
                tracing::warn!(
                    path = %path.display(),
                    mode = format!("{mode:o}"),
                    "Secret file is world-readable"
                );
            }
        }
    }

    #[cfg(not(unix))]
    fn warn_if_world_readable(_path: &Path) {}
}

#[async_trait]
impl SecretProvider for FileSecretProvider {
    async fn get_secret(&self, name: &str) -> Result<SecretValue, SecretError> {
        for path in self.candidates(name) {
            let contents = match tokio::fs::read(&path).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(SecretError::ProviderUnavailable {
                        provider: "file".to_string(),
                        detail: format!("Failed to read '{}': {e}", path.display()),
                    })
                }
            };
            Self::warn_if_world_readable(&path);

            if contents.is_empty() {
                return Err(SecretError::InvalidValue {
                    name: name.to_string(),
                    detail: format!("Secret file '{}' is empty", path.display()),
                });
            }
            tracing::debug!(secret_name = name, path = %path.display(), "Secret read from file");
            return Ok(SecretValue::new(name, contents));
        }

        Err(SecretError::NotFound {
            name: name.to_string(),
        })
    }

    async fn health_check(&self) -> Result<bool, SecretError> {
        let mapped_ok = self.paths.values().all(|p| p.is_file());
        let dir_ok = self.dir.as_ref().map_or(true, |d| d.is_dir());
        Ok(mapped_ok && dir_ok)
    }

    fn provider_type(&self) -> &'static str {
        "file"
    }
}
