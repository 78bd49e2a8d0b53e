//! Credential storage for the Vault root token.
//!
//! Mirrors the OS keyring model (service + account → secret) in a single
//! owner-only JSON file, so later invocations can authenticate without the
//! unseal key file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BootstrapError, BootstrapResult};
use crate::secure_file;

/// Keyring service name the root token is stored under.
pub const DEFAULT_SERVICE_NAME: &str = "private-orchestrator-vault";

/// Keyring account the root token is stored under.
pub const ROOT_TOKEN_ACCOUNT: &str = "root-token";

const CREDENTIALS_FILE: &str = "credentials.json";

/// Where the bootstrap stores and finds its Vault token.
pub trait CredentialStore: Send + Sync {
    fn set_token(&self, value: &str) -> BootstrapResult<()>;
    fn get_token(&self) -> BootstrapResult<Option<String>>;
}

/// On-disk layout: `{ "<service>": { "<account>": "<secret>" } }`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(flatten)]
    services: BTreeMap<String, BTreeMap<String, String>>,
}

/// File-backed keyring stand-in.
pub struct FileCredentialStore {
    path: PathBuf,
    service: String,
}

impl FileCredentialStore {
    /// Create a store in `dir`, defaulting to `<config dir>/vault-bootstrap`.
    pub fn new(dir: Option<PathBuf>, service: &str) -> BootstrapResult<Self> {
        let base_dir = match dir {
            Some(dir) => dir,
            None => dirs::config_dir()
                .ok_or_else(|| {
                    BootstrapError::Config("Could not determine config directory".to_string())
                })?
                .join("vault-bootstrap"),
        };

        Ok(Self {
            path: base_dir.join(CREDENTIALS_FILE),
            service: service.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> BootstrapResult<CredentialFile> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CredentialFile::default());
            }
            Err(e) => {
                return Err(BootstrapError::Storage(format!(
                    "Failed to read credential store {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        match serde_json::from_str(&content) {
            Ok(file) => Ok(file),
            Err(e) => {
                warn!(
                    "Credential store {} is unreadable ({}), treating as empty",
                    self.path.display(),
                    e
                );
                Ok(CredentialFile::default())
            }
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn set_token(&self, value: &str) -> BootstrapResult<()> {
        let mut file = self.read_file()?;
        file.services
            .entry(self.service.clone())
            .or_default()
            .insert(ROOT_TOKEN_ACCOUNT.to_string(), value.to_string());

        let content = serde_json::to_vec_pretty(&file)
            .map_err(|e| BootstrapError::Storage(format!("Failed to serialize credentials: {}", e)))?;
        secure_file::write_private(&self.path, &content, true)
            .map_err(|e| BootstrapError::Storage(e.to_string()))?;

        info!("Stored Vault token for '{}'", self.service);
        debug!("Credential store: {}", self.path.display());
        Ok(())
    }

    fn get_token(&self) -> BootstrapResult<Option<String>> {
        let file = self.read_file()?;
        Ok(file
            .services
            .get(&self.service)
            .and_then(|accounts| accounts.get(ROOT_TOKEN_ACCOUNT))
            .filter(|token| !token.is_empty())
            .cloned())
    }
}
