//! Envelope storage
//!
//! The secret store holds one [`PageEncryptionRecord`] per resource at the
//! path given by `pagevault_core::SecretLayout`.

mod memory;
mod vault;

pub use memory::MemorySecretStore;
pub use vault::VaultSecretStore;

use crate::error::StoreError;
use crate::keys::SealedDataKey;
use crate::sealer::KeyEnvelope;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The only artifact persisted for a resource: the KMS-sealed data key
/// together with the locally sealed resource key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEncryptionRecord {
    pub sealed_data_key: SealedDataKey,
    pub key: KeyEnvelope,
}

/// Key-value storage for encryption records.
///
/// `delete` of a missing path succeeds; `get` of a missing path returns
/// `StoreError::NotFound`.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn put(&self, path: &str, record: &PageEncryptionRecord) -> Result<(), StoreError>;

    async fn get(&self, path: &str) -> Result<PageEncryptionRecord, StoreError>;

    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Names of the records directly under `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    fn name(&self) -> &'static str;
}
