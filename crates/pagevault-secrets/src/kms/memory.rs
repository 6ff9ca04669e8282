//! In-process KMS
//!
//! Wraps data keys with ChaCha20-Poly1305 under a per-key-name subkey of a
//! random master key, with the context JSON as associated data. Used by the
//! CLI's `--local` mode and by tests across the workspace.

use super::KeyManagement;
use crate::error::KmsError;
use crate::keys::{DataKey, GeneratedDataKey, KeyContext, SealedDataKey, KEY_LEN};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use std::sync::atomic::{AtomicBool, Ordering};
use zeroize::Zeroizing;

const SEALED_PREFIX: &str = "local:v1:";
const NONCE_LEN: usize = 12;

pub struct LocalKms {
    master: Zeroizing<[u8; KEY_LEN]>,
    data_key_name: String,
    unavailable: AtomicBool,
}

impl LocalKms {
    /// A KMS with a fresh random master key
    pub fn new(data_key_name: impl Into<String>) -> Self {
        let mut master = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(master.as_mut());
        Self {
            master,
            data_key_name: data_key_name.into(),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: every call fails with `Unavailable` until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), KmsError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KmsError::Unavailable("local KMS offline".to_string()));
        }
        Ok(())
    }

    fn cipher_for(&self, key_name: &str) -> Result<ChaCha20Poly1305, KmsError> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(self.master.as_ref())
            .map_err(|_| KmsError::Malformed("invalid master key".to_string()))?;
        mac.update(key_name.as_bytes());
        let mut subkey = Zeroizing::new([0u8; KEY_LEN]);
        subkey.copy_from_slice(&mac.finalize().into_bytes());
        Ok(ChaCha20Poly1305::new(Key::from_slice(subkey.as_ref())))
    }

    fn seal_blob(&self, key_name: &str, plaintext: &[u8], aad: &[u8]) -> Result<String, KmsError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher_for(key_name)?
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| KmsError::Malformed("local wrap failed".to_string()))?;

        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", SEALED_PREFIX, BASE64.encode(out)))
    }

    fn open_blob(&self, key_name: &str, sealed: &str, aad: &[u8]) -> Result<Vec<u8>, KmsError> {
        let encoded = sealed
            .strip_prefix(SEALED_PREFIX)
            .ok_or_else(|| KmsError::Malformed("not a local KMS ciphertext".to_string()))?;
        let raw = BASE64
            .decode(encoded)
            .map_err(|e| KmsError::Malformed(format!("ciphertext is not base64: {}", e)))?;
        if raw.len() < NONCE_LEN {
            return Err(KmsError::Malformed("ciphertext too short".to_string()));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher_for(key_name)?
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| KmsError::AuthMismatch)
    }
}

#[async_trait]
impl KeyManagement for LocalKms {
    async fn generate_data_key(&self, context: &KeyContext) -> Result<GeneratedDataKey, KmsError> {
        self.check_available()?;

        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(bytes.as_mut());
        let sealed = self.seal_blob(
            &self.data_key_name,
            bytes.as_ref(),
            context.to_json().as_bytes(),
        )?;

        Ok(GeneratedDataKey {
            plaintext: DataKey::from_bytes(*bytes),
            sealed: SealedDataKey::new(sealed),
        })
    }

    async fn unseal_data_key(
        &self,
        sealed: &SealedDataKey,
        context: &KeyContext,
    ) -> Result<DataKey, KmsError> {
        self.check_available()?;

        let bytes = Zeroizing::new(self.open_blob(
            &self.data_key_name,
            sealed.as_str(),
            context.to_json().as_bytes(),
        )?);
        DataKey::from_slice(&bytes)
            .ok_or_else(|| KmsError::Malformed("data key must be 32 bytes".to_string()))
    }

    async fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<String, KmsError> {
        self.check_available()?;
        self.seal_blob(key_id, plaintext, &[])
    }

    async fn decrypt(&self, key_id: &str, ciphertext: &str) -> Result<Vec<u8>, KmsError> {
        self.check_available()?;
        self.open_blob(key_id, ciphertext, &[])
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_data_key_roundtrip() {
        let kms = LocalKms::new("notebook");
        let ctx = KeyContext::new().with("resourceID", "p1");

        let generated = kms.generate_data_key(&ctx).await.unwrap();
        assert!(generated.sealed.as_str().starts_with(SEALED_PREFIX));

        let unsealed = kms.unseal_data_key(&generated.sealed, &ctx).await.unwrap();
        assert_eq!(unsealed.as_bytes(), generated.plaintext.as_bytes());
    }

    #[tokio::test]
    async fn test_context_binding() {
        let kms = LocalKms::new("notebook");
        let generated = kms
            .generate_data_key(&KeyContext::new().with("resourceID", "p1"))
            .await
            .unwrap();

        let err = kms
            .unseal_data_key(
                &generated.sealed,
                &KeyContext::new().with("resourceID", "p2"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KmsError::AuthMismatch));
    }

    #[tokio::test]
    async fn test_master_keys_are_independent() {
        let a = LocalKms::new("notebook");
        let b = LocalKms::new("notebook");
        let ctx = KeyContext::new();
        let generated = a.generate_data_key(&ctx).await.unwrap();

        assert!(matches!(
            b.unseal_data_key(&generated.sealed, &ctx).await,
            Err(KmsError::AuthMismatch)
        ));
    }

    #[tokio::test]
    async fn test_aux_encrypt_decrypt_is_key_scoped() {
        let kms = LocalKms::new("notebook");
        let ciphertext = kms.encrypt("aux", b"api-token").await.unwrap();

        assert_eq!(kms.decrypt("aux", &ciphertext).await.unwrap(), b"api-token");
        assert!(matches!(
            kms.decrypt("other", &ciphertext).await,
            Err(KmsError::AuthMismatch)
        ));
        assert!(matches!(
            kms.decrypt("aux", "vault:v1:abc").await,
            Err(KmsError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_outage() {
        let kms = LocalKms::new("notebook");
        kms.set_unavailable(true);
        let err = kms.generate_data_key(&KeyContext::new()).await.unwrap_err();
        assert!(err.is_transient());

        kms.set_unavailable(false);
        assert!(kms.generate_data_key(&KeyContext::new()).await.is_ok());
    }
}
