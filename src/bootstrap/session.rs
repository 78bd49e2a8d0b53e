//! Authenticated session resolution.
//!
//! Hands out a Vault client only after an explicit authentication check. A
//! cached handle that fails the check is dropped, never reused. This module
//! reads the credential store but never writes it; persisting a new token is
//! the bootstrap driver's job once unseal has succeeded.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::credentials::CredentialStore;
use crate::error::{BootstrapError, BootstrapResult};
use crate::vault::{ClientFactory, VaultApi};

pub struct SessionResolver {
    factory: Arc<dyn ClientFactory>,
    store: Arc<dyn CredentialStore>,
    cached: Option<Arc<dyn VaultApi>>,
}

impl SessionResolver {
    pub fn new(factory: Arc<dyn ClientFactory>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            factory,
            store,
            cached: None,
        }
    }

    /// Return an authenticated client, re-authenticating from the credential
    /// store if the cached one no longer passes its check.
    pub async fn get_client(&mut self) -> BootstrapResult<Arc<dyn VaultApi>> {
        if let Some(client) = &self.cached {
            if client.is_authenticated().await {
                return Ok(client.clone());
            }
            warn!("Cached Vault session is no longer authenticated, discarding it");
            self.cached = None;
        }

        let token = self.store.get_token()?.ok_or_else(|| {
            BootstrapError::Authentication(
                "Cannot find Vault root token in the credential store. Please run 'setup' first."
                    .to_string(),
            )
        })?;

        let client = self.factory.connect(&token)?;
        if !client.is_authenticated().await {
            return Err(BootstrapError::Authentication(
                "Vault authentication failed with the stored token; \
                 the credential store is stale, re-run 'setup'"
                    .to_string(),
            ));
        }

        debug!("Authenticated Vault session from credential store");
        self.cached = Some(client.clone());
        Ok(client)
    }

    /// Build and cache a session from an explicit token (the root token right
    /// after unseal). Fails if the token is not accepted.
    pub async fn adopt(&mut self, token: &str) -> BootstrapResult<Arc<dyn VaultApi>> {
        let client = self.factory.connect(token)?;
        if !client.is_authenticated().await {
            self.cached = None;
            return Err(BootstrapError::Authentication(
                "client could not authenticate with the root token after unseal; \
                 the key file does not match this Vault instance"
                    .to_string(),
            ));
        }

        info!("Authenticated Vault session established");
        self.cached = Some(client.clone());
        Ok(client)
    }

    pub fn has_cached(&self) -> bool {
        self.cached.is_some()
    }
}
