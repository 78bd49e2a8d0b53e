//! Error taxonomy for the bootstrap flow.
//!
//! Every step of the bootstrap state machine fails with exactly one of these
//! variants. The CLI prints `kind()` next to the message and exits non-zero.

use thiserror::Error;

/// A step-level bootstrap failure.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The health endpoint never answered within the deadline.
    #[error("Vault did not become reachable: {0}")]
    Connectivity(String),

    /// Vault reports it is initialized but the local key file is absent.
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    /// `operator init` failed or returned unusable data after all retries.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Threshold keys were applied without reaching the unsealed state.
    #[error("Unseal failed: {0}")]
    Unseal(String),

    /// A client built from a token failed its own authentication check.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Required configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Enabling the secret engine or the AppRole auth method failed.
    #[error("Engine provisioning failed: {0}")]
    EngineProvisioning(String),

    /// A container or shell collaborator failed.
    #[error("Container error: {0}")]
    Container(String),

    /// Reading or writing local secret material failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The Vault HTTP API answered with an unexpected status or body.
    #[error("Vault API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
}

impl BootstrapError {
    /// Short, stable name of the failure kind for user-facing output.
    pub fn kind(&self) -> &'static str {
        match self {
            BootstrapError::Connectivity(_) => "connectivity",
            BootstrapError::InconsistentState(_) => "inconsistent-state",
            BootstrapError::Initialization(_) => "initialization",
            BootstrapError::Unseal(_) => "unseal",
            BootstrapError::Authentication(_) => "authentication",
            BootstrapError::Config(_) => "config",
            BootstrapError::EngineProvisioning(_) => "engine-provisioning",
            BootstrapError::Container(_) => "container",
            BootstrapError::Storage(_) => "storage",
            BootstrapError::Api { .. } => "api",
        }
    }

    /// Re-wrap an error as an engine provisioning failure, keeping the message.
    pub fn into_provisioning(self, what: &str) -> Self {
        match self {
            BootstrapError::EngineProvisioning(_) => self,
            other => BootstrapError::EngineProvisioning(format!("{}: {}", what, other)),
        }
    }
}

impl From<reqwest::Error> for BootstrapError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            BootstrapError::Connectivity(err.to_string())
        } else {
            BootstrapError::Api {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: err.to_string(),
            }
        }
    }
}

/// Result type for bootstrap operations
pub type BootstrapResult<T> = std::result::Result<T, BootstrapError>;
