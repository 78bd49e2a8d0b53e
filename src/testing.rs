//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::credentials::CredentialStore;
use crate::docker::ContainerLifecycle;
use crate::error::{BootstrapError, BootstrapResult};
use crate::shell::{CommandOutput, ShellCommand, ShellRunner};
use crate::vault::{
    ClientFactory, HealthProbe, HealthProbeResult, MountInfo, VaultApi, VaultOperator,
};

// ---------------------------------------------------------------------------
// Shell
// ---------------------------------------------------------------------------

/// Replays canned outputs in order and records every command.
#[derive(Default)]
pub struct ScriptedShell {
    outputs: Mutex<VecDeque<CommandOutput>>,
    calls: Mutex<Vec<ShellCommand>>,
}

impl ScriptedShell {
    pub fn new(outputs: Vec<CommandOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ShellCommand> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShellRunner for ScriptedShell {
    async fn run(&self, command: &ShellCommand) -> BootstrapResult<CommandOutput> {
        self.calls.lock().unwrap().push(command.clone());
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| CommandOutput::ok("")))
    }
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeContainers {
    up: Mutex<Vec<PathBuf>>,
    fail: bool,
}

impl FakeContainers {
    pub fn failing() -> Self {
        Self {
            up: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn up_calls(&self) -> Vec<PathBuf> {
        self.up.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerLifecycle for FakeContainers {
    async fn compose_up(&self, directory: &Path) -> BootstrapResult<()> {
        self.up.lock().unwrap().push(directory.to_path_buf());
        if self.fail {
            return Err(BootstrapError::Container("compose up failed".to_string()));
        }
        Ok(())
    }

    async fn compose_down(&self, _directory: &Path) -> BootstrapResult<()> {
        Ok(())
    }

    async fn compose_ps(&self, _directory: &Path) -> BootstrapResult<String> {
        Ok(String::new())
    }
}

// ---------------------------------------------------------------------------
// Credential store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
    writes: Mutex<Vec<String>>,
}

impl MemoryCredentialStore {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn set_token(&self, value: &str) -> BootstrapResult<()> {
        *self.token.lock().unwrap() = Some(value.to_string());
        self.writes.lock().unwrap().push(value.to_string());
        Ok(())
    }

    fn get_token(&self) -> BootstrapResult<Option<String>> {
        Ok(self.token.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

struct VaultModel {
    down_probes: usize,
    initialized: bool,
    sealed: bool,
    /// Number of key submissions after which the server unseals.
    unseal_after: Option<usize>,
    init_failures: usize,
    init_response: Value,
    fail_unseal_command: bool,
    probe_count: usize,
    init_calls: usize,
    applied_keys: Vec<String>,
    accepted_tokens: HashSet<String>,
    connected: Vec<String>,
    mounts: HashMap<String, MountInfo>,
    auth_methods: HashMap<String, MountInfo>,
    mutations: Vec<String>,
    roles: HashMap<String, Value>,
    secret_ids_issued: usize,
}

/// A single Vault server simulated in memory.
///
/// Implements the health probe, the operator, the client factory and (via
/// the handles it hands out) the authenticated API.
#[derive(Clone)]
pub struct FakeVault {
    model: Arc<Mutex<VaultModel>>,
}

pub fn default_init_response() -> Value {
    json!({
        "unseal_keys_b64": ["k1", "k2", "k3", "k4", "k5"],
        "unseal_keys_hex": ["01", "02", "03", "04", "05"],
        "unseal_shares": 5,
        "unseal_threshold": 3,
        "root_token": "r1"
    })
}

fn mount(mount_type: &str, version: Option<&str>) -> MountInfo {
    let options = version.map(|v| {
        let mut options = Map::new();
        options.insert("version".to_string(), json!(v));
        options
    });
    MountInfo {
        mount_type: mount_type.to_string(),
        description: String::new(),
        options,
    }
}

impl FakeVault {
    fn with_model(initialized: bool, sealed: bool, tokens: &[&str]) -> Self {
        let mut auth_methods = HashMap::new();
        auth_methods.insert("token/".to_string(), mount("token", None));

        Self {
            model: Arc::new(Mutex::new(VaultModel {
                down_probes: 0,
                initialized,
                sealed,
                unseal_after: Some(3),
                init_failures: 0,
                init_response: default_init_response(),
                fail_unseal_command: false,
                probe_count: 0,
                init_calls: 0,
                applied_keys: Vec::new(),
                accepted_tokens: tokens.iter().map(|t| t.to_string()).collect(),
                connected: Vec::new(),
                mounts: HashMap::new(),
                auth_methods,
                mutations: Vec::new(),
                roles: HashMap::new(),
                secret_ids_issued: 0,
            })),
        }
    }

    pub fn uninitialized() -> Self {
        Self::with_model(false, true, &[])
    }

    pub fn sealed(root: &str) -> Self {
        Self::with_model(true, true, &[root])
    }

    pub fn unsealed(root: &str) -> Self {
        Self::with_model(true, false, &[root])
    }

    pub fn with_down_probes(self, n: usize) -> Self {
        self.model.lock().unwrap().down_probes = n;
        self
    }

    pub fn with_unseal_after(self, n: Option<usize>) -> Self {
        self.model.lock().unwrap().unseal_after = n;
        self
    }

    pub fn with_init_failures(self, n: usize) -> Self {
        self.model.lock().unwrap().init_failures = n;
        self
    }

    pub fn with_init_response(self, response: Value) -> Self {
        self.model.lock().unwrap().init_response = response;
        self
    }

    pub fn with_failing_unseal_command(self) -> Self {
        self.model.lock().unwrap().fail_unseal_command = true;
        self
    }

    /// Mount a `kv` engine at `path/` with the given version option.
    pub fn with_kv_mount(self, path: &str, version: Option<&str>) -> Self {
        self.model
            .lock()
            .unwrap()
            .mounts
            .insert(format!("{}/", path), mount("kv", version));
        self
    }

    pub fn with_approle_enabled(self) -> Self {
        self.model
            .lock()
            .unwrap()
            .auth_methods
            .insert("approle/".to_string(), mount("approle", None));
        self
    }

    /// Flip the server to initialized behind the driver's back.
    pub fn mark_initialized(&self) {
        let mut model = self.model.lock().unwrap();
        model.initialized = true;
        model.sealed = true;
    }

    pub fn accept_token(&self, token: &str) {
        self.model
            .lock()
            .unwrap()
            .accepted_tokens
            .insert(token.to_string());
    }

    pub fn revoke_token(&self, token: &str) {
        self.model.lock().unwrap().accepted_tokens.remove(token);
    }

    pub fn probe_count(&self) -> usize {
        self.model.lock().unwrap().probe_count
    }

    pub fn init_calls(&self) -> usize {
        self.model.lock().unwrap().init_calls
    }

    pub fn applied_keys(&self) -> Vec<String> {
        self.model.lock().unwrap().applied_keys.clone()
    }

    pub fn connected_tokens(&self) -> Vec<String> {
        self.model.lock().unwrap().connected.clone()
    }

    /// Log of state-changing API calls (`enable-engine`, `disable-engine`, ...).
    pub fn mutations(&self) -> Vec<String> {
        self.model.lock().unwrap().mutations.clone()
    }

    pub fn mount_version(&self, path: &str) -> Option<String> {
        self.model
            .lock()
            .unwrap()
            .mounts
            .get(&format!("{}/", path))
            .and_then(MountInfo::version)
    }

    pub fn role(&self, name: &str) -> Option<Value> {
        self.model.lock().unwrap().roles.get(name).cloned()
    }
}

#[async_trait]
impl HealthProbe for FakeVault {
    async fn probe(&self) -> HealthProbeResult {
        let mut model = self.model.lock().unwrap();
        model.probe_count += 1;

        if model.down_probes > 0 {
            model.down_probes -= 1;
            return HealthProbeResult::unreachable();
        }

        let (status, payload) = if !model.initialized {
            (
                501,
                json!({"initialized": false, "sealed": true, "standby": true}),
            )
        } else if model.sealed {
            (
                503,
                json!({"initialized": true, "sealed": true, "standby": true}),
            )
        } else {
            (
                200,
                json!({"initialized": true, "sealed": false, "standby": false}),
            )
        };

        HealthProbeResult {
            reachable: true,
            http_status: Some(status),
            payload: Some(payload),
        }
    }
}

#[async_trait]
impl VaultOperator for FakeVault {
    async fn initialize(&self, _shares: usize, _threshold: usize) -> BootstrapResult<Value> {
        let mut model = self.model.lock().unwrap();
        model.init_calls += 1;

        if model.initialized {
            return Err(BootstrapError::Initialization(
                "Vault is already initialized".to_string(),
            ));
        }
        if model.init_failures > 0 {
            model.init_failures -= 1;
            return Err(BootstrapError::Initialization(
                "server is not ready".to_string(),
            ));
        }

        model.initialized = true;
        model.sealed = true;
        let response = model.init_response.clone();
        if let Some(root) = response.get("root_token").and_then(Value::as_str) {
            model.accepted_tokens.insert(root.to_string());
        }
        Ok(response)
    }

    async fn unseal(&self, key: &str) -> BootstrapResult<()> {
        let mut model = self.model.lock().unwrap();
        model.applied_keys.push(key.to_string());

        if model.fail_unseal_command {
            return Err(BootstrapError::Unseal("exec failed".to_string()));
        }

        if let Some(needed) = model.unseal_after {
            if model.applied_keys.len() >= needed {
                model.sealed = false;
            }
        }
        Ok(())
    }
}

impl ClientFactory for FakeVault {
    fn connect(&self, token: &str) -> BootstrapResult<Arc<dyn VaultApi>> {
        self.model
            .lock()
            .unwrap()
            .connected
            .push(token.to_string());
        Ok(Arc::new(FakeVaultClient {
            model: self.model.clone(),
            token: token.to_string(),
        }))
    }
}

/// Authenticated handle onto a [`FakeVault`].
pub struct FakeVaultClient {
    model: Arc<Mutex<VaultModel>>,
    token: String,
}

impl FakeVaultClient {
    fn authorize(&self, model: &VaultModel) -> BootstrapResult<()> {
        if model.sealed {
            return Err(BootstrapError::Api {
                status: 503,
                message: "Vault is sealed".to_string(),
            });
        }
        if !model.accepted_tokens.contains(&self.token) {
            return Err(BootstrapError::Api {
                status: 403,
                message: "permission denied".to_string(),
            });
        }
        Ok(())
    }
}

fn role_name(path: &str) -> Option<(&str, Option<&str>)> {
    let rest = path.strip_prefix("auth/approle/role/")?;
    match rest.split_once('/') {
        Some((name, suffix)) => Some((name, Some(suffix))),
        None => Some((rest, None)),
    }
}

#[async_trait]
impl VaultApi for FakeVaultClient {
    async fn is_authenticated(&self) -> bool {
        let model = self.model.lock().unwrap();
        self.authorize(&model).is_ok()
    }

    async fn list_mounts(&self) -> BootstrapResult<HashMap<String, MountInfo>> {
        let model = self.model.lock().unwrap();
        self.authorize(&model)?;
        Ok(model.mounts.clone())
    }

    async fn enable_secrets_engine(
        &self,
        path: &str,
        engine_type: &str,
        options: Map<String, Value>,
    ) -> BootstrapResult<()> {
        let mut model = self.model.lock().unwrap();
        self.authorize(&model)?;
        let key = format!("{}/", path.trim_matches('/'));
        if model.mounts.contains_key(&key) {
            return Err(BootstrapError::Api {
                status: 400,
                message: format!("path is already in use at {}", key),
            });
        }
        let info = MountInfo {
            mount_type: engine_type.to_string(),
            description: String::new(),
            options: Some(options),
        };
        let version = info.version().unwrap_or_default();
        model.mounts.insert(key.clone(), info);
        model
            .mutations
            .push(format!("enable-engine {} {} v{}", key, engine_type, version));
        Ok(())
    }

    async fn disable_secrets_engine(&self, path: &str) -> BootstrapResult<()> {
        let mut model = self.model.lock().unwrap();
        self.authorize(&model)?;
        let key = format!("{}/", path.trim_matches('/'));
        model.mounts.remove(&key);
        model.mutations.push(format!("disable-engine {}", key));
        Ok(())
    }

    async fn list_auth_methods(&self) -> BootstrapResult<HashMap<String, MountInfo>> {
        let model = self.model.lock().unwrap();
        self.authorize(&model)?;
        Ok(model.auth_methods.clone())
    }

    async fn enable_auth_method(&self, path: &str, method_type: &str) -> BootstrapResult<()> {
        let mut model = self.model.lock().unwrap();
        self.authorize(&model)?;
        let key = format!("{}/", path.trim_matches('/'));
        if model.auth_methods.contains_key(&key) {
            return Err(BootstrapError::Api {
                status: 400,
                message: format!("path is already in use at {}", key),
            });
        }
        model.auth_methods.insert(key.clone(), mount(method_type, None));
        model
            .mutations
            .push(format!("enable-auth {} {}", key, method_type));
        Ok(())
    }

    async fn read(&self, path: &str) -> BootstrapResult<Option<Value>> {
        let model = self.model.lock().unwrap();
        self.authorize(&model)?;
        match role_name(path) {
            Some((name, Some("role-id"))) if model.roles.contains_key(name) => {
                Ok(Some(json!({"data": {"role_id": format!("role-id-{}", name)}})))
            }
            _ => Err(BootstrapError::Api {
                status: 404,
                message: format!("no handler for route {}", path),
            }),
        }
    }

    async fn write(&self, path: &str, body: Value) -> BootstrapResult<Option<Value>> {
        let mut model = self.model.lock().unwrap();
        self.authorize(&model)?;
        if !model.auth_methods.contains_key("approle/") {
            return Err(BootstrapError::Api {
                status: 404,
                message: format!("no handler for route {}", path),
            });
        }
        match role_name(path) {
            Some((name, None)) => {
                model.roles.insert(name.to_string(), body);
                model.mutations.push(format!("write-role {}", name));
                Ok(None)
            }
            Some((name, Some("secret-id"))) if model.roles.contains_key(name) => {
                model.secret_ids_issued += 1;
                let n = model.secret_ids_issued;
                Ok(Some(json!({
                    "data": {
                        "secret_id": format!("secret-id-{}", n),
                        "secret_id_accessor": format!("accessor-{}", n)
                    }
                })))
            }
            _ => Err(BootstrapError::Api {
                status: 404,
                message: format!("no handler for route {}", path),
            }),
        }
    }
}
