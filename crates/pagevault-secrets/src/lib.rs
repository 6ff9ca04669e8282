//! # pagevault-secrets
//!
//! Key custody for pagevault:
//! - KMS client with AppRole login and background session renewal
//! - Resource key derivation and sealing with HMAC domain separation
//! - Envelope storage in a KV secret store
//!
//! # Example
//!
//! ```no_run
//! use pagevault_secrets::{KeyContext, KeyManagement, KeySealer, LocalKms};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let kms = LocalKms::new("notebook");
//! let sealer = KeySealer::new("PAGEVAULT-HMAC-SHA256");
//!
//! let data_key = kms
//!     .generate_data_key(&KeyContext::new().with("resourceID", "p1"))
//!     .await?;
//! let resource_key = sealer.derive_resource_key(&data_key.plaintext);
//! let envelope = sealer.seal(&data_key.plaintext, &resource_key, "nb1/p1")?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod keys;
pub mod kms;
pub mod sealer;
pub mod store;

pub use error::{KmsError, SealError, StoreError, UnsealError};
pub use keys::{DataKey, GeneratedDataKey, KeyContext, ResourceKey, SealedDataKey, KEY_LEN};
pub use kms::{
    spawn_renewal, KeyManagement, KmsClientConfig, LocalKms, RenewalOutcome, RenewalPolicy,
    RenewalTask, SessionHandle, SessionStatus, VaultKmsClient,
};
pub use sealer::{KeyEnvelope, KeySealer};
pub use store::{MemorySecretStore, PageEncryptionRecord, SecretStore, VaultSecretStore};
