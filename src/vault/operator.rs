//! `operator init` / `operator unseal`, either through the `vault` binary
//! inside the container or through the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::debug;

use super::http::{endpoint_url, send_with_retry, RetryPolicy};
use super::types::{InitRequest, UnsealRequest, UnsealResponse};
use crate::error::{BootstrapError, BootstrapResult};
use crate::shell::{ShellCommand, ShellRunner};

/// Unauthenticated operator actions used while bootstrapping.
#[async_trait]
pub trait VaultOperator: Send + Sync {
    /// Run `operator init`, returning the raw JSON response.
    async fn initialize(&self, shares: usize, threshold: usize) -> BootstrapResult<Value>;

    /// Submit one unseal key share.
    async fn unseal(&self, key: &str) -> BootstrapResult<()>;
}

/// Runs the `vault` CLI inside the server container via `docker exec`.
pub struct ContainerOperator {
    shell: Arc<dyn ShellRunner>,
    container_name: String,
    container_addr: String,
}

impl ContainerOperator {
    pub fn new(shell: Arc<dyn ShellRunner>, container_name: &str, container_addr: &str) -> Self {
        Self {
            shell,
            container_name: container_name.to_string(),
            container_addr: container_addr.to_string(),
        }
    }

    fn exec(&self, vault_args: &str) -> ShellCommand {
        let inner = format!(
            "VAULT_ADDR={} PATH=$PATH:/bin:/usr/bin:/usr/local/bin vault {}",
            self.container_addr, vault_args
        );
        ShellCommand::new("docker").args([
            "exec",
            self.container_name.as_str(),
            "sh",
            "-c",
            inner.as_str(),
        ])
    }
}

#[async_trait]
impl VaultOperator for ContainerOperator {
    async fn initialize(&self, shares: usize, threshold: usize) -> BootstrapResult<Value> {
        let command = self.exec(&format!(
            "operator init -key-shares={} -key-threshold={} -format=json",
            shares, threshold
        ));
        let output = self.shell.run(&command).await?;

        if !output.success || output.stdout.trim().is_empty() {
            return Err(BootstrapError::Initialization(format!(
                "vault operator init failed: {}",
                output.stderr
            )));
        }

        serde_json::from_str(&output.stdout).map_err(|e| {
            BootstrapError::Initialization(format!("Failed to parse init JSON: {}", e))
        })
    }

    async fn unseal(&self, key: &str) -> BootstrapResult<()> {
        let command = self
            .exec(&format!("operator unseal {}", key))
            .redact(key);
        debug!("Running in container: {}", command.display());

        let output = self.shell.run(&command).await?;
        if !output.success {
            return Err(BootstrapError::Unseal(format!(
                "vault operator unseal failed: {}",
                output.stderr.replace(key, "[REDACTED]")
            )));
        }
        Ok(())
    }
}

/// Uses `PUT /v1/sys/init` and `PUT /v1/sys/unseal`.
pub struct HttpOperator {
    client: Client,
    addr: String,
}

impl HttpOperator {
    pub fn new(addr: &str, timeout: Duration) -> BootstrapResult<Self> {
        endpoint_url(addr, "v1/")?;
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| BootstrapError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            addr: addr.to_string(),
        })
    }

    /// Init is never retried at the transport level: a lost response to a
    /// successful init must not be followed by a second init.
    async fn put(&self, path: &str, body: Value) -> BootstrapResult<(u16, String)> {
        let url = endpoint_url(&self.addr, path)?;
        let response = send_with_retry(RetryPolicy::none(), || {
            self.client.request(Method::PUT, url.clone()).json(&body)
        })
        .await?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        Ok((status, text))
    }
}

#[async_trait]
impl VaultOperator for HttpOperator {
    async fn initialize(&self, shares: usize, threshold: usize) -> BootstrapResult<Value> {
        let body = serde_json::to_value(InitRequest {
            secret_shares: shares,
            secret_threshold: threshold,
        })
        .map_err(|e| BootstrapError::Initialization(e.to_string()))?;

        let (status, text) = self
            .put("v1/sys/init", body)
            .await
            .map_err(|e| BootstrapError::Initialization(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(BootstrapError::Initialization(format!(
                "sys/init returned HTTP {}: {}",
                status, text
            )));
        }

        serde_json::from_str(&text).map_err(|e| {
            BootstrapError::Initialization(format!("Failed to parse init JSON: {}", e))
        })
    }

    async fn unseal(&self, key: &str) -> BootstrapResult<()> {
        let body = serde_json::to_value(UnsealRequest { key })
            .map_err(|e| BootstrapError::Unseal(e.to_string()))?;

        let (status, text) = self
            .put("v1/sys/unseal", body)
            .await
            .map_err(|e| BootstrapError::Unseal(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(BootstrapError::Unseal(format!(
                "sys/unseal returned HTTP {}: {}",
                status, text
            )));
        }

        if let Ok(progress) = serde_json::from_str::<UnsealResponse>(&text) {
            debug!(
                "Unseal progress {}/{} (sealed={})",
                progress.progress, progress.threshold, progress.sealed
            );
        }
        Ok(())
    }
}
