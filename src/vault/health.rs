//! Health probing against `/v1/sys/health`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::http::endpoint_url;
use super::state::{classify, VaultState};
use crate::error::{BootstrapError, BootstrapResult};

/// Default probe timeout (milliseconds).
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1500;

const HEALTH_PATH: &str = "v1/sys/health";

/// Raw outcome of a single health probe.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthProbeResult {
    pub reachable: bool,
    pub http_status: Option<u16>,
    pub payload: Option<Value>,
}

impl HealthProbeResult {
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            http_status: None,
            payload: None,
        }
    }

    pub fn state(&self) -> VaultState {
        if !self.reachable {
            return VaultState::Down;
        }
        classify(self.http_status, self.payload.as_ref())
    }
}

/// Something that can tell us how the Vault server is doing right now.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Issue one probe. Never fails: transport problems yield `reachable = false`.
    async fn probe(&self) -> HealthProbeResult;

    /// Probe and classify in one go.
    async fn state(&self) -> VaultState {
        let result = self.probe().await;
        let state = result.state();
        debug!(
            "Health probe: reachable={} status={:?} state={}",
            result.reachable, result.http_status, state
        );
        state
    }
}

/// Probe backed by a plain HTTP GET.
pub struct HttpHealthProbe {
    client: Client,
    url: Url,
}

impl HttpHealthProbe {
    pub fn new(base_addr: &str, timeout: Duration) -> BootstrapResult<Self> {
        let url = endpoint_url(base_addr, HEALTH_PATH)?;

        // Local dev servers frequently run with self-signed certificates.
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| BootstrapError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> HealthProbeResult {
        let response = match self.client.get(self.url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Health probe to {} failed: {}", self.url, e);
                return HealthProbeResult::unreachable();
            }
        };

        let status = response.status().as_u16();
        let payload = match response.text().await {
            Ok(body) => serde_json::from_str::<Value>(&body).ok(),
            Err(e) => {
                debug!("Failed to read health body: {}", e);
                None
            }
        };

        HealthProbeResult {
            reachable: true,
            http_status: Some(status),
            payload,
        }
    }
}
