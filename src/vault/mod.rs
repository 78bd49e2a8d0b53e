//! Vault-facing building blocks: health probing, state classification,
//! operator actions and the authenticated HTTP client.

mod client;
mod health;
mod http;
mod operator;
mod state;
mod types;

#[cfg(test)]
pub mod testing;

pub use client::{ClientFactory, HttpClientFactory, VaultApi, DEFAULT_TIMEOUT_SECS};
pub use health::{HealthProbe, HealthProbeResult, HttpHealthProbe, DEFAULT_PROBE_TIMEOUT_MS};
pub use http::endpoint_url;
pub use operator::{ContainerOperator, HttpOperator, VaultOperator};
pub use state::VaultState;
pub use types::{AppRoleCredentials, InitMaterial, MountInfo};
