//! KV v2 engine and AppRole machine identity provisioning.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::{BootstrapError, BootstrapResult};
use crate::secure_file;
use crate::vault::{AppRoleCredentials, VaultApi};

const KV_ENGINE: &str = "kv";
const KV_VERSION: &str = "2";
const APPROLE_PATH: &str = "approle";

/// What `ensure_kv_v2` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOutcome {
    AlreadyPresent,
    Enabled,
    /// A non-v2 engine was disabled and re-enabled as v2. Its data is gone.
    Migrated,
}

impl EngineOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineOutcome::AlreadyPresent => "already present",
            EngineOutcome::Enabled => "enabled",
            EngineOutcome::Migrated => "migrated to v2",
        }
    }
}

impl std::fmt::Display for EngineOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Provisioner {
    client: Arc<dyn VaultApi>,
    kv_mount: String,
}

impl Provisioner {
    pub fn new(client: Arc<dyn VaultApi>, kv_mount: &str) -> Self {
        Self {
            client,
            kv_mount: kv_mount.trim_matches('/').to_string(),
        }
    }

    /// Make sure a version 2 KV engine is mounted at the configured path.
    pub async fn ensure_kv_v2(&self) -> BootstrapResult<EngineOutcome> {
        self.ensure_kv_v2_inner()
            .await
            .map_err(|e| e.into_provisioning(&format!("KV v2 engine at '{}/'", self.kv_mount)))
    }

    async fn ensure_kv_v2_inner(&self) -> BootstrapResult<EngineOutcome> {
        let mounts = self.client.list_mounts().await?;
        let key = format!("{}/", self.kv_mount);

        let outcome = match mounts.get(&key) {
            Some(mount) if mount.version().as_deref() == Some(KV_VERSION) => {
                info!("KV v2 engine already enabled at '{}'", key);
                return Ok(EngineOutcome::AlreadyPresent);
            }
            Some(mount) => {
                warn!(
                    "Engine at '{}' is {} (version {}), re-enabling as KV v2; existing data is discarded",
                    key,
                    mount.mount_type,
                    mount.version().unwrap_or_else(|| "1".to_string())
                );
                self.client.disable_secrets_engine(&self.kv_mount).await?;
                EngineOutcome::Migrated
            }
            None => EngineOutcome::Enabled,
        };

        let mut options = Map::new();
        options.insert("version".to_string(), json!(KV_VERSION));
        self.client
            .enable_secrets_engine(&self.kv_mount, KV_ENGINE, options)
            .await?;
        info!("KV v2 engine enabled at '{}'", key);
        Ok(outcome)
    }

    /// Enable the AppRole auth method if absent. Returns whether it was enabled now.
    pub async fn ensure_approle_auth(&self) -> BootstrapResult<bool> {
        self.ensure_approle_auth_inner()
            .await
            .map_err(|e| e.into_provisioning("AppRole auth method"))
    }

    async fn ensure_approle_auth_inner(&self) -> BootstrapResult<bool> {
        let methods = self.client.list_auth_methods().await?;
        if methods.contains_key(&format!("{}/", APPROLE_PATH)) {
            debug!("AppRole auth method already enabled");
            return Ok(false);
        }
        self.client
            .enable_auth_method(APPROLE_PATH, "approle")
            .await?;
        info!("AppRole auth method enabled");
        Ok(true)
    }

    /// Create or update a role with a token TTL and policy list.
    pub async fn create_role(
        &self,
        name: &str,
        policies: &[String],
        token_ttl: &str,
    ) -> BootstrapResult<()> {
        validate_role_name(name)?;
        let body = json!({
            "token_ttl": token_ttl,
            "policies": policies.join(","),
        });
        self.client
            .write(&role_path(name), body)
            .await
            .map_err(|e| e.into_provisioning(&format!("AppRole role '{}'", name)))?;
        info!("AppRole role '{}' written", name);
        Ok(())
    }

    /// Read the role id and mint a fresh secret id.
    pub async fn issue_credentials(&self, name: &str) -> BootstrapResult<AppRoleCredentials> {
        validate_role_name(name)?;
        let what = format!("AppRole credentials for '{}'", name);

        let role = self
            .client
            .read(&format!("{}/role-id", role_path(name)))
            .await
            .map_err(|e| e.into_provisioning(&what))?;
        let role_id = data_field(role.as_ref(), "role_id").ok_or_else(|| {
            BootstrapError::EngineProvisioning(format!("{}: response has no role_id", what))
        })?;

        let secret = self
            .client
            .write(&format!("{}/secret-id", role_path(name)), json!({}))
            .await
            .map_err(|e| e.into_provisioning(&what))?;
        let secret_id = data_field(secret.as_ref(), "secret_id").ok_or_else(|| {
            BootstrapError::EngineProvisioning(format!("{}: response has no secret_id", what))
        })?;

        Ok(AppRoleCredentials { role_id, secret_id })
    }

    /// Enable AppRole, upsert the role, issue credentials and optionally save
    /// them as owner-only JSON.
    pub async fn setup_approle(
        &self,
        name: &str,
        policies: &[String],
        token_ttl: &str,
        save_to: Option<&Path>,
    ) -> BootstrapResult<AppRoleCredentials> {
        self.ensure_approle_auth().await?;
        self.create_role(name, policies, token_ttl).await?;
        let credentials = self.issue_credentials(name).await?;

        if let Some(path) = save_to {
            let content = serde_json::to_vec_pretty(&credentials).map_err(|e| {
                BootstrapError::Storage(format!("Failed to serialize AppRole credentials: {}", e))
            })?;
            secure_file::write_private(path, &content, true)
                .map_err(|e| BootstrapError::Storage(e.to_string()))?;
            info!("AppRole credentials saved to {}", path.display());
        }

        Ok(credentials)
    }
}

fn role_path(name: &str) -> String {
    format!("auth/{}/role/{}", APPROLE_PATH, name)
}

fn validate_role_name(name: &str) -> BootstrapResult<()> {
    if name.is_empty() || name.contains('/') || name.chars().any(char::is_whitespace) {
        return Err(BootstrapError::Config(format!(
            "invalid AppRole role name '{}'",
            name
        )));
    }
    Ok(())
}

fn data_field(response: Option<&Value>, field: &str) -> Option<String> {
    response?
        .get("data")?
        .get(field)?
        .as_str()
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
