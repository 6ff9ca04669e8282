//! Key-management service clients
//!
//! - [`VaultKmsClient`]: transit engine and AppRole login over HTTP
//! - [`LocalKms`]: in-process implementation for tests and `--local` mode
//!
//! Both sit behind the [`KeyManagement`] trait so the write coordinator
//! never knows which one it is talking to.

mod client;
mod memory;
mod renewal;
mod session;

pub use client::{AppRoleCredentials, KmsClientConfig, VaultKmsClient};
pub use memory::LocalKms;
pub use renewal::{
    spawn_renewal, RenewalFailureAction, RenewalOutcome, RenewalPolicy, RenewalTask,
    SessionRenewer,
};
pub use session::{Session, SessionHandle, SessionStatus, SessionToken};

use crate::error::KmsError;
use crate::keys::{DataKey, GeneratedDataKey, KeyContext, SealedDataKey};
use async_trait::async_trait;

/// Data-key and small-blob operations offered by a KMS
#[async_trait]
pub trait KeyManagement: Send + Sync {
    /// Mint a fresh data key bound to `context`
    async fn generate_data_key(&self, context: &KeyContext) -> Result<GeneratedDataKey, KmsError>;

    /// Recover a data key. Fails with `AuthMismatch` when `context` differs
    /// from the one used at generation time.
    async fn unseal_data_key(
        &self,
        sealed: &SealedDataKey,
        context: &KeyContext,
    ) -> Result<DataKey, KmsError>;

    /// Encrypt a small blob under the named key
    async fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<String, KmsError>;

    /// Decrypt a blob produced by [`KeyManagement::encrypt`]
    async fn decrypt(&self, key_id: &str, ciphertext: &str) -> Result<Vec<u8>, KmsError>;

    /// Implementation name for logs and status output
    fn name(&self) -> &'static str;
}
