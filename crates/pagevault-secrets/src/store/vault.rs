//! KV v2 secret store backed by Vault

use super::{PageEncryptionRecord, SecretStore};
use crate::error::StoreError;
use crate::kms::SessionHandle;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use vaultrs::client::{Client, VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::kv2;

/// Stores records in a KV v2 mount, authenticating with the KMS session token
pub struct VaultSecretStore {
    address: String,
    namespace: Option<String>,
    timeout: Duration,
    mount: String,
    session: SessionHandle,
}

impl VaultSecretStore {
    pub fn new(
        address: impl Into<String>,
        namespace: Option<String>,
        timeout: Duration,
        mount: impl Into<String>,
        session: SessionHandle,
    ) -> Self {
        Self {
            address: address.into(),
            namespace,
            timeout,
            mount: mount.into(),
            session,
        }
    }

    /// Build a client carrying the current session token.
    ///
    /// Created per call so a renewed token is picked up immediately.
    async fn create_client(&self, path: &str) -> Result<VaultClient, StoreError> {
        let token = self
            .session
            .token()
            .await
            .map_err(|e| StoreError::unavailable(path, e.to_string()))?;

        let mut settings = VaultClientSettingsBuilder::default();
        settings.address(&self.address);
        settings.timeout(Some(self.timeout));
        if let Some(ns) = &self.namespace {
            settings.namespace(Some(ns.clone()));
        }

        let settings = settings
            .build()
            .map_err(|e| StoreError::unavailable(path, e.to_string()))?;
        let mut client =
            VaultClient::new(settings).map_err(|e| StoreError::unavailable(path, e.to_string()))?;
        client.set_token(token.expose());
        Ok(client)
    }
}

fn is_not_found(err: &ClientError) -> bool {
    matches!(err, ClientError::APIError { code: 404, .. })
}

#[async_trait]
impl SecretStore for VaultSecretStore {
    async fn put(&self, path: &str, record: &PageEncryptionRecord) -> Result<(), StoreError> {
        let client = self.create_client(path).await?;
        kv2::set(&client, &self.mount, path, record)
            .await
            .map_err(|e| StoreError::unavailable(path, e.to_string()))?;
        debug!(mount = %self.mount, path, "Stored encryption record");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<PageEncryptionRecord, StoreError> {
        let client = self.create_client(path).await?;
        let value = match kv2::read::<serde_json::Value>(&client, &self.mount, path).await {
            Ok(value) => value,
            Err(e) if is_not_found(&e) => return Err(StoreError::not_found(path)),
            Err(e) => return Err(StoreError::unavailable(path, e.to_string())),
        };
        serde_json::from_value(value).map_err(|e| StoreError::malformed(path, e.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let client = self.create_client(path).await?;
        match kv2::delete_metadata(&client, &self.mount, path).await {
            Ok(()) => {
                debug!(mount = %self.mount, path, "Deleted encryption record");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(StoreError::unavailable(path, e.to_string())),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let client = self.create_client(prefix).await?;
        match kv2::list(&client, &self.mount, prefix).await {
            // Sub-directories come back with a trailing slash
            Ok(keys) => Ok(keys.into_iter().filter(|k| !k.ends_with('/')).collect()),
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(StoreError::unavailable(prefix, e.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "vault-kv2"
    }
}
