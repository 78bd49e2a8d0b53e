//! Bootstrap configuration.
//!
//! Resolved once, in this order (later wins):
//! 1. built-in defaults
//! 2. a TOML file (`--config`, or `vault-bootstrap.toml` in the working directory)
//! 3. environment variables (`VAULT_ADDR`, `VAULT_KEYS_FILE`, ...)
//! 4. command-line flags, applied by the caller

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credentials::DEFAULT_SERVICE_NAME;
use crate::error::{BootstrapError, BootstrapResult};

/// File picked up automatically from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "vault-bootstrap.toml";

pub const DEFAULT_VAULT_ADDR: &str = "http://127.0.0.1:8200";

/// Key file name inside the service directory.
pub const KEYS_FILE_NAME: &str = ".vault_keys";

/// How `operator init` / `operator unseal` are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperatorKind {
    /// `docker exec <container> vault operator ...`
    #[default]
    Container,
    /// `PUT /v1/sys/init` and `PUT /v1/sys/unseal`
    Http,
}

impl std::str::FromStr for OperatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "container" | "cli" => Ok(OperatorKind::Container),
            "http" | "api" => Ok(OperatorKind::Http),
            other => Err(format!("unknown operator '{}'", other)),
        }
    }
}

/// Waits, intervals and retry counts, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timings {
    /// Deadline for the health endpoint to start answering.
    pub max_wait_ms: u64,
    /// Pause between reachability probes.
    pub health_interval_ms: u64,
    /// Timeout of a single health probe.
    pub probe_timeout_ms: u64,
    /// Deadline for an ambiguous state to settle before init.
    pub init_ready_wait_ms: u64,
    pub init_ready_interval_ms: u64,
    pub init_attempts: u32,
    /// Linear init backoff: `step * attempt`, capped.
    pub init_backoff_step_ms: u64,
    pub init_backoff_cap_ms: u64,
    /// Convergence wait after each unseal key.
    pub unseal_step_wait_ms: u64,
    /// Convergence wait after the last unseal key.
    pub unseal_final_wait_ms: u64,
    pub unseal_poll_initial_ms: u64,
    pub unseal_poll_step_ms: u64,
    pub unseal_poll_cap_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            max_wait_ms: 90_000,
            health_interval_ms: 3_000,
            probe_timeout_ms: crate::vault::DEFAULT_PROBE_TIMEOUT_MS,
            init_ready_wait_ms: 45_000,
            init_ready_interval_ms: 2_000,
            init_attempts: 5,
            init_backoff_step_ms: 2_000,
            init_backoff_cap_ms: 6_000,
            unseal_step_wait_ms: 20_000,
            unseal_final_wait_ms: 10_000,
            unseal_poll_initial_ms: 1_000,
            unseal_poll_step_ms: 1_000,
            unseal_poll_cap_ms: 5_000,
        }
    }
}

impl Timings {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn init_ready_wait(&self) -> Duration {
        Duration::from_millis(self.init_ready_wait_ms)
    }

    pub fn init_ready_interval(&self) -> Duration {
        Duration::from_millis(self.init_ready_interval_ms)
    }

    pub fn unseal_step_wait(&self) -> Duration {
        Duration::from_millis(self.unseal_step_wait_ms)
    }

    pub fn unseal_final_wait(&self) -> Duration {
        Duration::from_millis(self.unseal_final_wait_ms)
    }
}

/// Everything the bootstrap needs to know about its environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Vault address as seen from the host.
    pub vault_addr: String,
    /// Vault address as seen from inside the container.
    pub vault_addr_container: String,
    pub container_name: String,
    /// Directory holding the Vault `docker-compose.yml`.
    pub service_dir: Option<PathBuf>,
    /// Explicit key file location. Unset means `<service_dir>/.vault_keys`.
    pub keys_file: Option<PathBuf>,
    /// External Docker network shared by all services.
    pub network: Option<String>,
    /// Keyring service name for the stored root token.
    pub keychain_service: String,
    /// Directory of the credential store (defaults to the user config dir).
    pub credentials_dir: Option<PathBuf>,
    pub operator: OperatorKind,
    pub key_shares: usize,
    pub key_threshold: usize,
    /// Mount path of the KV v2 engine, without slashes.
    pub kv_mount: String,
    /// Guard the bootstrap with an advisory lock file next to the key file.
    pub lock: bool,
    pub timings: Timings,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            vault_addr: DEFAULT_VAULT_ADDR.to_string(),
            vault_addr_container: DEFAULT_VAULT_ADDR.to_string(),
            container_name: "vault".to_string(),
            service_dir: Some(PathBuf::from("services").join("vault")),
            keys_file: None,
            network: None,
            keychain_service: DEFAULT_SERVICE_NAME.to_string(),
            credentials_dir: None,
            operator: OperatorKind::default(),
            key_shares: 5,
            key_threshold: 3,
            kv_mount: "secret".to_string(),
            lock: true,
            timings: Timings::default(),
        }
    }
}

impl BootstrapConfig {
    /// Load defaults, an optional TOML file and the process environment.
    pub fn load(config_file: Option<&Path>) -> BootstrapResult<Self> {
        let mut config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => {
                let implicit = Path::new(DEFAULT_CONFIG_FILE);
                if implicit.exists() {
                    Self::from_file(implicit)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> BootstrapResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BootstrapError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            BootstrapError::Config(format!("Invalid config file {}: {}", path.display(), e))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("VAULT_ADDR") {
            self.vault_addr = v;
        }
        if let Some(v) = get("VAULT_ADDR_CONTAINER") {
            self.vault_addr_container = v;
        }
        if let Some(v) = get("VAULT_CONTAINER_NAME") {
            self.container_name = v;
        }
        if let Some(v) = get("VAULT_SERVICE_DIR") {
            self.service_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("VAULT_KEYS_FILE") {
            self.keys_file = Some(PathBuf::from(v));
        }
        if let Some(v) = get("DOCKER_EXTERNAL_NETWORK") {
            self.network = Some(v);
        }
        if let Some(v) = get("VAULT_BOOTSTRAP_OPERATOR") {
            match v.parse() {
                Ok(kind) => self.operator = kind,
                Err(e) => tracing::warn!("Ignoring VAULT_BOOTSTRAP_OPERATOR: {}", e),
            }
        }
    }

    pub fn validate(&self) -> BootstrapResult<()> {
        if self.key_shares == 0 {
            return Err(BootstrapError::Config(
                "key_shares must be at least 1".to_string(),
            ));
        }
        if self.key_threshold == 0 || self.key_threshold > self.key_shares {
            return Err(BootstrapError::Config(format!(
                "key_threshold must be between 1 and key_shares ({}), got {}",
                self.key_shares, self.key_threshold
            )));
        }
        if self.kv_mount.trim_matches('/').is_empty() {
            return Err(BootstrapError::Config("kv_mount must not be empty".to_string()));
        }
        if self.timings.init_attempts == 0 {
            return Err(BootstrapError::Config(
                "init_attempts must be at least 1".to_string(),
            ));
        }
        crate::vault::endpoint_url(&self.vault_addr, "v1/")?;
        Ok(())
    }

    /// KV mount path without surrounding slashes.
    pub fn kv_mount(&self) -> &str {
        self.kv_mount.trim_matches('/')
    }

    /// Compose directory, required to start the container.
    pub fn require_service_dir(&self) -> BootstrapResult<&Path> {
        let dir = self.service_dir.as_deref().ok_or_else(|| {
            BootstrapError::Config(
                "compose directory for Vault not provided and not found in settings".to_string(),
            )
        })?;
        if !dir.is_dir() {
            return Err(BootstrapError::Config(format!(
                "Vault service directory {} does not exist",
                dir.display()
            )));
        }
        Ok(dir)
    }

    /// Where the key material lives: the explicit `keys_file`, otherwise
    /// beside the compose file in the service directory.
    pub fn keys_file(&self) -> PathBuf {
        match (&self.keys_file, &self.service_dir) {
            (Some(path), _) => path.clone(),
            (None, Some(dir)) => dir.join(KEYS_FILE_NAME),
            (None, None) => PathBuf::from(KEYS_FILE_NAME),
        }
    }

    /// Advisory lock file guarding concurrent bootstraps.
    pub fn lock_file(&self) -> PathBuf {
        let keys_file = self.keys_file();
        let mut name = keys_file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| KEYS_FILE_NAME.into());
        name.push(".lock");
        keys_file.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = BootstrapConfig::default();
        assert_eq!(config.vault_addr, "http://127.0.0.1:8200");
        assert_eq!(config.key_shares, 5);
        assert_eq!(config.key_threshold, 3);
        assert_eq!(config.kv_mount(), "secret");
        assert_eq!(config.operator, OperatorKind::Container);
        assert_eq!(config.timings.max_wait(), Duration::from_secs(90));
        assert_eq!(config.timings.probe_timeout(), Duration::from_millis(1500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("VAULT_ADDR", "http://10.0.0.5:8200"),
            ("VAULT_KEYS_FILE", "/tmp/keys.json"),
            ("DOCKER_EXTERNAL_NETWORK", "orchestrator"),
            ("VAULT_BOOTSTRAP_OPERATOR", "http"),
            ("VAULT_CONTAINER_NAME", ""),
        ]
        .into_iter()
        .collect();

        let mut config = BootstrapConfig::default();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.vault_addr, "http://10.0.0.5:8200");
        assert_eq!(config.keys_file(), PathBuf::from("/tmp/keys.json"));
        assert_eq!(config.network.as_deref(), Some("orchestrator"));
        assert_eq!(config.operator, OperatorKind::Http);
        // Empty values do not override
        assert_eq!(config.container_name, "vault");
    }

    #[test]
    fn test_keys_file_follows_service_dir() {
        assert_eq!(
            BootstrapConfig::default().keys_file(),
            PathBuf::from("services/vault/.vault_keys")
        );

        let mut config = BootstrapConfig::default();
        config.apply_env(|name| (name == "VAULT_SERVICE_DIR").then(|| "/srv/vault".to_string()));
        assert_eq!(config.keys_file(), PathBuf::from("/srv/vault/.vault_keys"));
        assert_eq!(config.lock_file(), PathBuf::from("/srv/vault/.vault_keys.lock"));

        let config = BootstrapConfig {
            service_dir: None,
            ..Default::default()
        };
        assert_eq!(config.keys_file(), PathBuf::from(".vault_keys"));
    }

    #[test]
    fn test_explicit_keys_file_wins_over_service_dir() {
        let env: HashMap<&str, &str> = [
            ("VAULT_SERVICE_DIR", "/srv/vault"),
            ("VAULT_KEYS_FILE", "/secure/keys.json"),
        ]
        .into_iter()
        .collect();

        let mut config = BootstrapConfig::default();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(config.keys_file(), PathBuf::from("/secure/keys.json"));
    }

    #[test]
    fn test_from_file_partial() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("vault-bootstrap.toml");
        std::fs::write(
            &path,
            r#"
vault_addr = "https://vault.internal:8200"
key_shares = 3
key_threshold = 2
operator = "http"

[timings]
max_wait_ms = 1000
"#,
        )
        .unwrap();

        let config = BootstrapConfig::from_file(&path).unwrap();
        assert_eq!(config.vault_addr, "https://vault.internal:8200");
        assert_eq!(config.key_threshold, 2);
        assert_eq!(config.operator, OperatorKind::Http);
        assert_eq!(config.timings.max_wait_ms, 1000);
        // untouched fields keep defaults
        assert_eq!(config.timings.health_interval_ms, 3000);
        assert_eq!(config.container_name, "vault");
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "key_shares = \"five\"").unwrap();

        let err = BootstrapConfig::from_file(&path).unwrap_err();
        assert_eq!(err.kind(), "config");

        let err = BootstrapConfig::from_file(&tmp.path().join("missing.toml")).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_validate_threshold() {
        let config = BootstrapConfig {
            key_shares: 3,
            key_threshold: 4,
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().kind(), "config");

        let config = BootstrapConfig {
            key_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_require_service_dir() {
        let tmp = tempdir().unwrap();
        let config = BootstrapConfig {
            service_dir: None,
            ..Default::default()
        };
        assert_eq!(config.require_service_dir().unwrap_err().kind(), "config");

        let config = BootstrapConfig {
            service_dir: Some(tmp.path().join("nope")),
            ..Default::default()
        };
        assert!(config.require_service_dir().is_err());

        let config = BootstrapConfig {
            service_dir: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(config.require_service_dir().unwrap(), tmp.path());
    }

    #[test]
    fn test_lock_file_next_to_keys() {
        let config = BootstrapConfig {
            keys_file: Some(PathBuf::from("/srv/vault/.vault_keys")),
            ..Default::default()
        };
        assert_eq!(config.lock_file(), PathBuf::from("/srv/vault/.vault_keys.lock"));
    }
}
