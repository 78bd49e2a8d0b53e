//! Authenticated Vault HTTP client.
//!
//! Only the handful of endpoints the bootstrap flow needs: token
//! self-lookup, secrets engine mounts, auth method mounts and generic
//! logical reads/writes for AppRole management.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use tracing::debug;

use super::http::{endpoint_url, send_with_retry, RetryPolicy};
use super::types::{EnableAuthRequest, EnableEngineRequest, MountInfo};
use crate::error::{BootstrapError, BootstrapResult};

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Operations the provisioner and session resolver need from Vault.
#[async_trait]
pub trait VaultApi: Send + Sync {
    /// Whether the token this handle carries is currently accepted.
    async fn is_authenticated(&self) -> bool;

    /// Mounted secrets engines, keyed by path with trailing slash (`secret/`).
    async fn list_mounts(&self) -> BootstrapResult<HashMap<String, MountInfo>>;

    async fn enable_secrets_engine(
        &self,
        path: &str,
        engine_type: &str,
        options: Map<String, Value>,
    ) -> BootstrapResult<()>;

    async fn disable_secrets_engine(&self, path: &str) -> BootstrapResult<()>;

    /// Enabled auth methods, keyed by path with trailing slash (`approle/`).
    async fn list_auth_methods(&self) -> BootstrapResult<HashMap<String, MountInfo>>;

    async fn enable_auth_method(&self, path: &str, method_type: &str) -> BootstrapResult<()>;

    /// Logical read (`GET /v1/<path>`).
    async fn read(&self, path: &str) -> BootstrapResult<Option<Value>>;

    /// Logical write (`POST /v1/<path>`).
    async fn write(&self, path: &str, body: Value) -> BootstrapResult<Option<Value>>;
}

/// Builds authenticated handles from a token.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, token: &str) -> BootstrapResult<Arc<dyn VaultApi>>;
}

/// Pull the mount table out of a `sys/mounts` or `sys/auth` response.
///
/// Vault returns the table both under `data` and (for older clients) at the
/// top level; prefer `data` when present.
pub fn parse_mount_table(response: &Value) -> HashMap<String, MountInfo> {
    let table = response
        .get("data")
        .and_then(Value::as_object)
        .or_else(|| response.as_object());

    let Some(table) = table else {
        return HashMap::new();
    };

    table
        .iter()
        .filter(|(path, value)| path.ends_with('/') && value.is_object())
        .filter_map(|(path, value)| {
            serde_json::from_value::<MountInfo>(value.clone())
                .ok()
                .map(|info| (path.clone(), info))
        })
        .collect()
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("errors").and_then(Value::as_array).map(|errors| {
                errors
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("; ")
            })
        })
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if body.is_empty() {
                "no response body".to_string()
            } else {
                body.to_string()
            }
        })
}

/// Vault HTTP API client carrying a token.
#[derive(Clone)]
pub struct HttpVaultClient {
    client: Client,
    addr: String,
    token: String,
    retry: RetryPolicy,
}

impl HttpVaultClient {
    pub fn new(addr: &str, token: &str, timeout: Duration) -> BootstrapResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| BootstrapError::Config(format!("Failed to build HTTP client: {}", e)))?;

        // Validate the address once up front.
        endpoint_url(addr, "v1/")?;

        Ok(Self {
            client,
            addr: addr.to_string(),
            token: token.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> BootstrapResult<Option<Value>> {
        let url = endpoint_url(&self.addr, &format!("v1/{}", path.trim_start_matches('/')))?;
        debug!("Vault {} {}", method, url);

        let response = send_with_retry(self.retry, || {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .header("X-Vault-Token", &self.token);
            if let Some(body) = body {
                request = request.json(body);
            }
            request
        })
        .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(BootstrapError::Api {
                status: status.as_u16(),
                message: api_error_message(&text),
            });
        }

        if text.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&text).map(Some).map_err(|e| BootstrapError::Api {
            status: status.as_u16(),
            message: format!("Failed to parse response from {}: {}", path, e),
        })
    }
}

#[async_trait]
impl VaultApi for HttpVaultClient {
    async fn is_authenticated(&self) -> bool {
        match self
            .request(Method::GET, "auth/token/lookup-self", None)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!("Token self-lookup failed: {}", e);
                false
            }
        }
    }

    async fn list_mounts(&self) -> BootstrapResult<HashMap<String, MountInfo>> {
        let response = self
            .request(Method::GET, "sys/mounts", None)
            .await?
            .unwrap_or(Value::Null);
        Ok(parse_mount_table(&response))
    }

    async fn enable_secrets_engine(
        &self,
        path: &str,
        engine_type: &str,
        options: Map<String, Value>,
    ) -> BootstrapResult<()> {
        let body = serde_json::to_value(EnableEngineRequest {
            engine_type: engine_type.to_string(),
            options,
        })
        .map_err(|e| BootstrapError::EngineProvisioning(e.to_string()))?;
        self.request(
            Method::POST,
            &format!("sys/mounts/{}", path.trim_matches('/')),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn disable_secrets_engine(&self, path: &str) -> BootstrapResult<()> {
        self.request(
            Method::DELETE,
            &format!("sys/mounts/{}", path.trim_matches('/')),
            None,
        )
        .await?;
        Ok(())
    }

    async fn list_auth_methods(&self) -> BootstrapResult<HashMap<String, MountInfo>> {
        let response = self
            .request(Method::GET, "sys/auth", None)
            .await?
            .unwrap_or(Value::Null);
        Ok(parse_mount_table(&response))
    }

    async fn enable_auth_method(&self, path: &str, method_type: &str) -> BootstrapResult<()> {
        let body = serde_json::to_value(EnableAuthRequest {
            method_type: method_type.to_string(),
        })
        .map_err(|e| BootstrapError::EngineProvisioning(e.to_string()))?;
        self.request(
            Method::POST,
            &format!("sys/auth/{}", path.trim_matches('/')),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn read(&self, path: &str) -> BootstrapResult<Option<Value>> {
        self.request(Method::GET, path, None).await
    }

    async fn write(&self, path: &str, body: Value) -> BootstrapResult<Option<Value>> {
        self.request(Method::POST, path, Some(&body)).await
    }
}

impl std::fmt::Debug for HttpVaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpVaultClient")
            .field("addr", &self.addr)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Factory producing [`HttpVaultClient`] handles for one address.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    addr: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpClientFactory {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl ClientFactory for HttpClientFactory {
    fn connect(&self, token: &str) -> BootstrapResult<Arc<dyn VaultApi>> {
        let client = HttpVaultClient::new(&self.addr, token, self.timeout)?.with_retry(self.retry);
        Ok(Arc::new(client))
    }
}
