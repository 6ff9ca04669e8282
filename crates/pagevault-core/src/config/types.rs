//! Configuration file types (pagevault.yaml)

use crate::resource::Deployment;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PagevaultConfigFile {
    pub deployment: Deployment,
    pub storage: StorageConfig,
    pub vault: VaultConnectionConfig,
    pub kms: KmsConfig,
    pub secret_store: SecretStoreConfig,
    pub crypto: CryptoConfig,
    /// Upper bound for any single KMS or secret-store call
    pub operation_timeout_secs: Option<u64>,
}

impl PagevaultConfigFile {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs.unwrap_or(30))
    }
}

/// Where ciphertext blobs live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: Utf8PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
        }
    }
}

/// Connection settings shared by the KMS client and the secret store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConnectionConfig {
    pub address: String,
    pub namespace: Option<String>,
    pub timeout_secs: u64,
}

impl Default for VaultConnectionConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8200".to_string(),
            namespace: None,
            timeout_secs: 30,
        }
    }
}

impl VaultConnectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Key-management (transit engine + AppRole) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KmsConfig {
    pub transit_mount: String,
    /// Key used to mint and unseal per-write data keys
    pub data_key_name: String,
    /// Key used for small-blob encrypt/decrypt of auxiliary secrets
    pub aux_key_name: String,
    pub approle: AppRoleConfig,
    /// Requested lease extension on renew-self
    pub renew_increment_secs: u64,
    /// Renew this long before the lease expires
    pub renewal_margin_secs: u64,
    /// Lease assumed for tokens that report no TTL
    pub default_lease_secs: u64,
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            transit_mount: "transit".to_string(),
            data_key_name: "notebook".to_string(),
            aux_key_name: "notebook".to_string(),
            approle: AppRoleConfig::default(),
            renew_increment_secs: 120,
            renewal_margin_secs: 20,
            default_lease_secs: 600,
        }
    }
}

/// AppRole login settings
///
/// `role_id`, `secret_id` and `secret_id_accessor` are normally supplied
/// through the environment rather than the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppRoleConfig {
    pub mount: String,
    pub role_name: String,
    pub role_id: Option<String>,
    pub secret_id: Option<String>,
    pub secret_id_accessor: Option<String>,
}

impl Default for AppRoleConfig {
    fn default() -> Self {
        Self {
            mount: "approle".to_string(),
            role_name: "notebook".to_string(),
            role_id: None,
            secret_id: None,
            secret_id_accessor: None,
        }
    }
}

/// Secret store (KV) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretStoreConfig {
    pub mount: String,
    pub prefix: String,
}

impl Default for SecretStoreConfig {
    fn default() -> Self {
        Self {
            mount: "secret".to_string(),
            prefix: "notes".to_string(),
        }
    }
}

/// Local key-sealing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Domain-separation constant mixed into every wrapping key
    pub domain: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            domain: "PAGEVAULT-HMAC-SHA256".to_string(),
        }
    }
}
