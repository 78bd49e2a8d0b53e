//! Durable storage of Vault init material (unseal keys + root token).
//!
//! The key file is written once, right after a successful `operator init`,
//! and only read afterwards. There is deliberately no update or delete.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::BootstrapError;
use crate::secure_file::{self, SecureFileError};
use crate::vault::InitMaterial;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key file {0} does not exist")]
    Missing(PathBuf),

    #[error("key file {0} already exists and will not be overwritten")]
    AlreadyExists(PathBuf),

    #[error("failed to read key file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("key file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to write key file: {0}")]
    Write(#[source] SecureFileError),
}

impl From<KeyStoreError> for BootstrapError {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::Missing(path) => BootstrapError::InconsistentState(format!(
                "Vault is initialized but keys file '{}' is missing",
                path.display()
            )),
            other => BootstrapError::Storage(other.to_string()),
        }
    }
}

/// Write-once store for [`InitMaterial`].
#[derive(Debug, Clone)]
pub struct KeyMaterialStore {
    path: PathBuf,
    default_threshold: usize,
}

impl KeyMaterialStore {
    /// `default_threshold` is used for key files that carry no threshold field.
    pub fn new(path: impl Into<PathBuf>, default_threshold: usize) -> Self {
        Self {
            path: path.into(),
            default_threshold,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Persist freshly generated material. Fails if a key file already exists.
    pub fn save(&self, material: &InitMaterial) -> Result<(), KeyStoreError> {
        let content = serde_json::to_vec_pretty(&material.to_persisted()).map_err(|e| {
            KeyStoreError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            }
        })?;

        secure_file::write_private(&self.path, &content, false).map_err(|e| match e {
            SecureFileError::AlreadyExists(path) => KeyStoreError::AlreadyExists(path),
            other => KeyStoreError::Write(other),
        })?;

        info!("Saved Vault init material to {}", self.path.display());
        Ok(())
    }

    pub fn load(&self) -> Result<InitMaterial, KeyStoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeyStoreError::Missing(self.path.clone()));
            }
            Err(source) => {
                return Err(KeyStoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let raw: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| KeyStoreError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let material = InitMaterial::from_response(raw, self.default_threshold).map_err(|e| {
            KeyStoreError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            }
        })?;

        debug!(
            "Loaded {} unseal key(s), threshold {}, from {}",
            material.unseal_keys.len(),
            material.key_threshold,
            self.path.display()
        );
        Ok(material)
    }

    /// Move a key file left over from a previous server instance out of the way.
    ///
    /// Only called when the server reports it is *not* initialized, so the
    /// old material cannot unseal it anyway. The file is renamed, never deleted.
    pub fn quarantine_stale(&self) -> Result<Option<PathBuf>, KeyStoreError> {
        if !self.exists() {
            return Ok(None);
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "vault_keys".to_string());
        let target = self.path.with_file_name(format!(
            "{}.stale-{}",
            file_name,
            chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        ));

        std::fs::rename(&self.path, &target).map_err(|e| {
            KeyStoreError::Write(SecureFileError::Io {
                path: self.path.clone(),
                source: e,
            })
        })?;

        warn!(
            "Vault is not initialized but a key file exists; moved it to {}",
            target.display()
        );
        Ok(Some(target))
    }
}
