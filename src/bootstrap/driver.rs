//! The init/unseal state machine.
//!
//! ```text
//! Starting -> WaitingReachable -> AlreadyInitialized | NeedsInit
//!          -> Unsealing -> BuildingSession -> EnsuringEngine
//!          -> PersistingCredential -> Ready
//! ```
//!
//! Any step failure moves the driver to `Failed(reason)` and returns the
//! error unchanged. Partial progress (a saved key file) is kept.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::backoff::{linear_delay, poll_state, LinearBackoff};
use super::lock::BootstrapLock;
use super::provision::{EngineOutcome, Provisioner};
use super::session::SessionResolver;
use crate::config::{BootstrapConfig, OperatorKind};
use crate::credentials::{CredentialStore, FileCredentialStore};
use crate::docker::{ComposeDriver, ContainerLifecycle};
use crate::error::{BootstrapError, BootstrapResult};
use crate::keys::KeyMaterialStore;
use crate::shell::ShellRunner;
use crate::vault::{
    AppRoleCredentials, ClientFactory, ContainerOperator, HealthProbe, HttpClientFactory,
    HttpHealthProbe, HttpOperator, InitMaterial, VaultOperator, VaultState, DEFAULT_TIMEOUT_SECS,
};

/// Where the driver currently is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BootstrapPhase {
    #[default]
    Starting,
    WaitingReachable,
    AlreadyInitialized,
    NeedsInit,
    Unsealing,
    BuildingSession,
    EnsuringEngine,
    PersistingCredential,
    Ready,
    Failed(String),
}

impl BootstrapPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BootstrapPhase::Ready | BootstrapPhase::Failed(_))
    }
}

/// Outcome of a successful [`Bootstrapper::setup`].
#[derive(Clone)]
pub struct BootstrapReport {
    pub state: VaultState,
    /// Whether this run performed `operator init`.
    pub initialized_now: bool,
    /// Unseal keys submitted by this run (0 if already unsealed).
    pub unseal_keys_applied: usize,
    pub engine: EngineOutcome,
    pub keys_file: PathBuf,
    pub address: String,
    pub root_token: String,
    pub completed_at: DateTime<Utc>,
}

impl std::fmt::Debug for BootstrapReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapReport")
            .field("state", &self.state)
            .field("initialized_now", &self.initialized_now)
            .field("unseal_keys_applied", &self.unseal_keys_applied)
            .field("engine", &self.engine)
            .field("keys_file", &self.keys_file)
            .field("address", &self.address)
            .field("root_token", &"[REDACTED]")
            .field("completed_at", &self.completed_at)
            .finish()
    }
}

/// External collaborators the driver talks to.
pub struct Collaborators {
    pub containers: Arc<dyn ContainerLifecycle>,
    pub probe: Arc<dyn HealthProbe>,
    pub operator: Arc<dyn VaultOperator>,
    pub clients: Arc<dyn ClientFactory>,
    pub credentials: Arc<dyn CredentialStore>,
}

pub struct Bootstrapper {
    config: BootstrapConfig,
    containers: Arc<dyn ContainerLifecycle>,
    probe: Arc<dyn HealthProbe>,
    operator: Arc<dyn VaultOperator>,
    keys: KeyMaterialStore,
    sessions: SessionResolver,
    credentials: Arc<dyn CredentialStore>,
    phase: BootstrapPhase,
    history: Vec<BootstrapPhase>,
}

impl Bootstrapper {
    pub fn new(config: BootstrapConfig, deps: Collaborators) -> Self {
        let keys = KeyMaterialStore::new(config.keys_file(), config.key_threshold);
        let sessions = SessionResolver::new(deps.clients, deps.credentials.clone());
        Self {
            config,
            containers: deps.containers,
            probe: deps.probe,
            operator: deps.operator,
            keys,
            sessions,
            credentials: deps.credentials,
            phase: BootstrapPhase::default(),
            history: Vec::new(),
        }
    }

    /// Wire up the real collaborators: Compose through `shell`, the HTTP
    /// health endpoint and API, the configured operator and the file
    /// credential store.
    pub fn from_config(
        config: BootstrapConfig,
        shell: Arc<dyn ShellRunner>,
    ) -> BootstrapResult<Self> {
        let probe = HttpHealthProbe::new(&config.vault_addr, config.timings.probe_timeout())?;
        let operator: Arc<dyn VaultOperator> = match config.operator {
            OperatorKind::Container => Arc::new(ContainerOperator::new(
                shell.clone(),
                &config.container_name,
                &config.vault_addr_container,
            )),
            OperatorKind::Http => Arc::new(HttpOperator::new(
                &config.vault_addr,
                Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            )?),
        };
        let credentials =
            FileCredentialStore::new(config.credentials_dir.clone(), &config.keychain_service)?;

        let deps = Collaborators {
            containers: Arc::new(ComposeDriver::new(shell)),
            probe: Arc::new(probe),
            operator,
            clients: Arc::new(HttpClientFactory::new(&config.vault_addr)),
            credentials: Arc::new(credentials),
        };
        Ok(Self::new(config, deps))
    }

    pub fn phase(&self) -> &BootstrapPhase {
        &self.phase
    }

    /// Every phase entered so far, in order.
    pub fn history(&self) -> &[BootstrapPhase] {
        &self.history
    }

    fn enter(&mut self, phase: BootstrapPhase) {
        debug!("Bootstrap phase: {:?}", phase);
        self.history.push(phase.clone());
        self.phase = phase;
    }

    /// Drive the service to an unsealed, authenticated, provisioned state.
    pub async fn setup(&mut self) -> BootstrapResult<BootstrapReport> {
        match self.run().await {
            Ok(report) => {
                self.enter(BootstrapPhase::Ready);
                info!("Vault is ready at {}", report.address);
                Ok(report)
            }
            Err(e) => {
                error!("Vault bootstrap failed: {}", e);
                self.enter(BootstrapPhase::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// [`setup`](Self::setup) followed by AppRole provisioning for `role`.
    pub async fn setup_with_approle(
        &mut self,
        role: &str,
        policies: &[String],
        token_ttl: &str,
        save_to: Option<&Path>,
    ) -> BootstrapResult<(BootstrapReport, AppRoleCredentials)> {
        let report = self.setup().await?;
        let client = self.sessions.get_client().await?;
        let credentials = Provisioner::new(client, self.config.kv_mount())
            .setup_approle(role, policies, token_ttl, save_to)
            .await?;
        Ok((report, credentials))
    }

    async fn run(&mut self) -> BootstrapResult<BootstrapReport> {
        self.enter(BootstrapPhase::Starting);
        self.start_container().await?;

        self.enter(BootstrapPhase::WaitingReachable);
        self.wait_until_reachable().await?;

        let _lock = if self.config.lock {
            Some(BootstrapLock::acquire(&self.config.lock_file())?)
        } else {
            None
        };

        let (material, initialized_now) = self.initialize_or_load().await?;

        self.enter(BootstrapPhase::Unsealing);
        let unseal_keys_applied = self.unseal(&material).await?;

        self.enter(BootstrapPhase::BuildingSession);
        let client = self.sessions.adopt(&material.root_token).await?;

        self.enter(BootstrapPhase::EnsuringEngine);
        let engine = Provisioner::new(client, self.config.kv_mount())
            .ensure_kv_v2()
            .await?;

        self.enter(BootstrapPhase::PersistingCredential);
        self.credentials.set_token(&material.root_token)?;

        Ok(BootstrapReport {
            state: self.probe.state().await,
            initialized_now,
            unseal_keys_applied,
            engine,
            keys_file: self.keys.path().to_path_buf(),
            address: self.config.vault_addr.clone(),
            root_token: material.root_token,
            completed_at: Utc::now(),
        })
    }

    async fn start_container(&self) -> BootstrapResult<()> {
        let dir = self.config.require_service_dir()?;
        info!("Starting Vault container from {}", dir.display());
        self.containers.compose_up(dir).await
    }

    async fn wait_until_reachable(&self) -> BootstrapResult<()> {
        let timings = &self.config.timings;
        info!("Waiting for Vault to become reachable...");

        let interval = timings.health_interval();
        let reached = poll_state(
            self.probe.as_ref(),
            timings.max_wait(),
            LinearBackoff::new(interval, Duration::ZERO, interval),
            |state| state != VaultState::Down,
        )
        .await;

        match reached {
            Some(state) => {
                info!("Vault is reachable (state: {})", state);
                Ok(())
            }
            None => Err(BootstrapError::Connectivity(format!(
                "Vault did not become reachable at {} within {}s",
                self.config.vault_addr,
                timings.max_wait().as_secs()
            ))),
        }
    }

    /// Branch on the live state: load existing material or run `operator init`.
    async fn initialize_or_load(&mut self) -> BootstrapResult<(InitMaterial, bool)> {
        let state = self.wait_for_init_ready().await?;

        if state.is_initialized() {
            info!("Vault is already initialized ({})", state);
            self.enter(BootstrapPhase::AlreadyInitialized);
            return Ok((self.keys.load()?, false));
        }

        self.enter(BootstrapPhase::NeedsInit);
        self.keys.quarantine_stale()?;

        let timings = self.config.timings.clone();
        let attempts = timings.init_attempts;
        for attempt in 1..=attempts {
            info!("Initializing Vault (attempt {}/{})", attempt, attempts);
            match self.try_initialize().await {
                Ok(material) => {
                    self.keys.save(&material)?;
                    info!(
                        "Vault initialized with {} key share(s), threshold {}",
                        material.unseal_keys.len(),
                        material.key_threshold
                    );
                    return Ok((material, true));
                }
                Err(e) => warn!("Initialization attempt {} failed: {}", attempt, e),
            }

            if attempt == attempts {
                break;
            }

            let delay = linear_delay(
                Duration::from_millis(timings.init_backoff_step_ms),
                attempt,
                Duration::from_millis(timings.init_backoff_cap_ms),
            );
            sleep(delay).await;

            let state = self.probe.state().await;
            if state.is_initialized() {
                warn!("Vault reports initialized by another process; loading existing key material");
                self.enter(BootstrapPhase::AlreadyInitialized);
                return Ok((self.keys.load()?, false));
            }
        }

        Err(BootstrapError::Initialization(format!(
            "Vault initialization failed after {} attempt(s)",
            attempts
        )))
    }

    /// Re-probe until the state is actionable: uninitialized or initialized.
    async fn wait_for_init_ready(&self) -> BootstrapResult<VaultState> {
        let timings = &self.config.timings;
        let interval = timings.init_ready_interval();
        let ready = |state: VaultState| state == VaultState::NotInitialized || state.is_initialized();

        let state = self.probe.state().await;
        if ready(state) {
            return Ok(state);
        }

        info!("Vault is {}, waiting until it can be initialized", state);
        poll_state(
            self.probe.as_ref(),
            timings.init_ready_wait(),
            LinearBackoff::new(interval, Duration::ZERO, interval),
            ready,
        )
        .await
        .ok_or_else(|| {
            BootstrapError::Initialization(format!(
                "Vault did not become ready for initialization within {}s",
                timings.init_ready_wait().as_secs()
            ))
        })
    }

    async fn try_initialize(&self) -> BootstrapResult<InitMaterial> {
        let raw = self
            .operator
            .initialize(self.config.key_shares, self.config.key_threshold)
            .await?;
        InitMaterial::from_response(raw, self.config.key_threshold).map_err(|e| {
            BootstrapError::Initialization(format!("unusable init response: {}", e))
        })
    }

    /// Apply the threshold prefix of keys one at a time until unsealed.
    /// Returns how many keys were submitted.
    async fn unseal(&self, material: &InitMaterial) -> BootstrapResult<usize> {
        let state = self.probe.state().await;
        if state == VaultState::Unsealed {
            info!("Vault is already unsealed");
            return Ok(0);
        }

        let keys = material.threshold_keys();
        if keys.is_empty() {
            return Err(BootstrapError::Unseal(
                "no unseal keys found in init data".to_string(),
            ));
        }

        let timings = &self.config.timings;
        for (index, key) in keys.iter().enumerate() {
            info!("Applying unseal key {}/{}", index + 1, keys.len());
            self.operator.unseal(key).await.map_err(|e| {
                BootstrapError::Unseal(format!("unseal key {} was rejected: {}", index + 1, e))
            })?;

            if self.wait_until_unsealed(timings.unseal_step_wait()).await {
                info!("Vault unsealed after {} key(s)", index + 1);
                return Ok(index + 1);
            }
            debug!("Vault still sealed after key {}", index + 1);
        }

        if self.wait_until_unsealed(timings.unseal_final_wait()).await {
            info!("Vault unsealed after {} key(s)", keys.len());
            return Ok(keys.len());
        }

        Err(BootstrapError::Unseal(format!(
            "Vault is still sealed after applying {} key(s)",
            keys.len()
        )))
    }

    async fn wait_until_unsealed(&self, wait: Duration) -> bool {
        let timings = &self.config.timings;
        let backoff = LinearBackoff::new(
            Duration::from_millis(timings.unseal_poll_initial_ms),
            Duration::from_millis(timings.unseal_poll_step_ms),
            Duration::from_millis(timings.unseal_poll_cap_ms),
        );
        poll_state(self.probe.as_ref(), wait, backoff, |state| {
            state == VaultState::Unsealed
        })
        .await
        .is_some()
    }
}
