//! Resource key derivation and sealing
//!
//! A resource key is derived from a KMS data key and a random nonce with a
//! one-way hash, then sealed for storage:
//!
//! ```text
//! resource_key = SHA-256(data_key || nonce)
//! wrapping_key = HMAC-SHA256(data_key, iv || label || domain)
//! sealed       = header(16) || ChaCha20-Poly1305(wrapping_key, resource_key, aad = header)
//! ```
//!
//! The label binds an envelope to exactly one resource, and the domain
//! constant keeps envelopes from one deployment product unusable in another.

use crate::error::{SealError, UnsealError};
use crate::keys::{DataKey, ResourceKey, KEY_LEN};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// IV size in bytes
pub const IV_LEN: usize = 32;

/// Size of a sealed 32-byte key: 16-byte header + 32-byte ciphertext + 16-byte tag
pub const SEALED_KEY_LEN: usize = 64;

/// Oldest sealing protocol version accepted (2.0)
pub const MIN_PROTOCOL_VERSION: u8 = 0x20;

const HEADER_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const CIPHER_CHACHA20_POLY1305: u8 = 0x01;

/// The persisted, sealed form of a resource key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEnvelope {
    /// Base64 of the 32-byte IV mixed into the wrapping key
    pub iv: String,
    /// Base64 of the 64-byte sealed key
    pub sealed_key: String,
    /// Resource label (`<collection>/<resource>`) the envelope is bound to
    pub label: String,
}

/// Seals and unseals resource keys under a data key
#[derive(Debug, Clone)]
pub struct KeySealer {
    domain: Vec<u8>,
}

impl KeySealer {
    /// Create a sealer for a deployment's domain-separation constant
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into().into_bytes(),
        }
    }

    /// Derive a fresh resource key from a data key.
    ///
    /// One-way: the nonce is discarded, so the key can only be recovered
    /// by unsealing its envelope.
    pub fn derive_resource_key(&self, data_key: &DataKey) -> ResourceKey {
        let mut nonce = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(nonce.as_mut());

        let digest = Sha256::new()
            .chain_update(data_key.as_bytes())
            .chain_update(nonce.as_ref())
            .finalize();

        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&digest);
        ResourceKey::from_bytes(bytes)
    }

    /// Seal a resource key for the resource identified by `label`
    pub fn seal(
        &self,
        data_key: &DataKey,
        resource_key: &ResourceKey,
        label: &str,
    ) -> Result<KeyEnvelope, SealError> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut header = [0u8; HEADER_LEN];
        header[0] = MIN_PROTOCOL_VERSION;
        header[1] = CIPHER_CHACHA20_POLY1305;
        OsRng.fill_bytes(&mut header[HEADER_LEN - NONCE_LEN..]);

        let wrapping_key = self
            .wrapping_key(data_key, &iv, label)
            .ok_or(SealError::Cipher)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(wrapping_key.as_ref()));
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&header[HEADER_LEN - NONCE_LEN..]),
                Payload {
                    msg: resource_key.as_bytes(),
                    aad: &header,
                },
            )
            .map_err(|_| SealError::Cipher)?;

        let mut sealed = Vec::with_capacity(SEALED_KEY_LEN);
        sealed.extend_from_slice(&header);
        sealed.extend_from_slice(&ciphertext);

        if sealed.len() != SEALED_KEY_LEN {
            return Err(SealError::OutputSize {
                expected: SEALED_KEY_LEN,
                actual: sealed.len(),
            });
        }

        Ok(KeyEnvelope {
            iv: BASE64.encode(iv),
            sealed_key: BASE64.encode(&sealed),
            label: label.to_string(),
        })
    }

    /// Unseal the resource key for `expected_label`.
    ///
    /// The wrapping key is recomputed from the caller's label, not the one
    /// recorded in the envelope, so an envelope moved to another resource
    /// fails authentication.
    pub fn unseal(
        &self,
        data_key: &DataKey,
        envelope: &KeyEnvelope,
        expected_label: &str,
    ) -> Result<ResourceKey, UnsealError> {
        let iv = BASE64
            .decode(&envelope.iv)
            .map_err(|e| UnsealError::MalformedInput(format!("iv: {}", e)))?;
        if iv.len() != IV_LEN {
            return Err(UnsealError::MalformedInput(format!(
                "iv must be {} bytes, got {}",
                IV_LEN,
                iv.len()
            )));
        }

        let sealed = BASE64
            .decode(&envelope.sealed_key)
            .map_err(|e| UnsealError::MalformedInput(format!("sealed key: {}", e)))?;
        if sealed.len() != SEALED_KEY_LEN {
            return Err(UnsealError::MalformedInput(format!(
                "sealed key must be {} bytes, got {}",
                SEALED_KEY_LEN,
                sealed.len()
            )));
        }

        let (header, ciphertext) = sealed.split_at(HEADER_LEN);
        if header[0] < MIN_PROTOCOL_VERSION {
            return Err(UnsealError::UnsupportedVersion(header[0]));
        }
        if header[1] != CIPHER_CHACHA20_POLY1305 {
            return Err(UnsealError::MalformedInput(format!(
                "unknown cipher id {:#04x}",
                header[1]
            )));
        }

        if envelope.label != expected_label {
            return Err(UnsealError::AuthenticationFailed);
        }

        let wrapping_key = self
            .wrapping_key(data_key, &iv, expected_label)
            .ok_or(UnsealError::AuthenticationFailed)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(wrapping_key.as_ref()));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(&header[HEADER_LEN - NONCE_LEN..]),
                    Payload {
                        msg: ciphertext,
                        aad: header,
                    },
                )
                .map_err(|_| UnsealError::AuthenticationFailed)?,
        );

        let bytes: [u8; KEY_LEN] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| UnsealError::AuthenticationFailed)?;
        Ok(ResourceKey::from_bytes(bytes))
    }

    fn wrapping_key(
        &self,
        data_key: &DataKey,
        iv: &[u8],
        label: &str,
    ) -> Option<Zeroizing<[u8; KEY_LEN]>> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(data_key.as_bytes()).ok()?;
        mac.update(iv);
        mac.update(label.as_bytes());
        mac.update(&self.domain);

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&mac.finalize().into_bytes());
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = "TEST-HMAC-SHA256";

    fn data_key(byte: u8) -> DataKey {
        DataKey::from_bytes([byte; KEY_LEN])
    }

    #[test]
    fn test_seal_unseal_roundtrip() {
        let sealer = KeySealer::new(DOMAIN);
        let dk = data_key(1);
        let rk = sealer.derive_resource_key(&dk);

        let envelope = sealer.seal(&dk, &rk, "nb1/p1").unwrap();
        let unsealed = sealer.unseal(&dk, &envelope, "nb1/p1").unwrap();

        assert_eq!(unsealed.as_bytes(), rk.as_bytes());
        assert_eq!(envelope.label, "nb1/p1");
        assert_eq!(BASE64.decode(&envelope.sealed_key).unwrap().len(), SEALED_KEY_LEN);
        assert_eq!(BASE64.decode(&envelope.iv).unwrap().len(), IV_LEN);
    }

    #[test]
    fn test_unseal_with_wrong_data_key_fails() {
        let sealer = KeySealer::new(DOMAIN);
        let rk = sealer.derive_resource_key(&data_key(1));
        let envelope = sealer.seal(&data_key(1), &rk, "nb1/p1").unwrap();

        let err = sealer.unseal(&data_key(2), &envelope, "nb1/p1").unwrap_err();
        assert_eq!(err, UnsealError::AuthenticationFailed);
    }

    #[test]
    fn test_unseal_with_wrong_label_fails() {
        let sealer = KeySealer::new(DOMAIN);
        let dk = data_key(1);
        let rk = sealer.derive_resource_key(&dk);
        let envelope = sealer.seal(&dk, &rk, "nb1/p1").unwrap();

        let err = sealer.unseal(&dk, &envelope, "nb1/p2").unwrap_err();
        assert_eq!(err, UnsealError::AuthenticationFailed);

        // Relabelling the envelope itself does not help either
        let mut relabelled = envelope.clone();
        relabelled.label = "nb1/p2".to_string();
        let err = sealer.unseal(&dk, &relabelled, "nb1/p2").unwrap_err();
        assert_eq!(err, UnsealError::AuthenticationFailed);
    }

    #[test]
    fn test_domain_separation() {
        let dk = data_key(1);
        let ours = KeySealer::new(DOMAIN);
        let theirs = KeySealer::new("OTHER-HMAC-SHA256");
        let rk = ours.derive_resource_key(&dk);
        let envelope = ours.seal(&dk, &rk, "nb1/p1").unwrap();

        assert_eq!(
            theirs.unseal(&dk, &envelope, "nb1/p1").unwrap_err(),
            UnsealError::AuthenticationFailed
        );
    }

    #[test]
    fn test_tampered_iv_fails() {
        let sealer = KeySealer::new(DOMAIN);
        let dk = data_key(1);
        let rk = sealer.derive_resource_key(&dk);
        let mut envelope = sealer.seal(&dk, &rk, "nb1/p1").unwrap();

        let mut iv = BASE64.decode(&envelope.iv).unwrap();
        iv[0] ^= 0x01;
        envelope.iv = BASE64.encode(iv);

        assert_eq!(
            sealer.unseal(&dk, &envelope, "nb1/p1").unwrap_err(),
            UnsealError::AuthenticationFailed
        );
    }

    #[test]
    fn test_malformed_base64() {
        let sealer = KeySealer::new(DOMAIN);
        let envelope = KeyEnvelope {
            iv: "not base64!".to_string(),
            sealed_key: String::new(),
            label: "nb1/p1".to_string(),
        };
        let err = sealer.unseal(&data_key(1), &envelope, "nb1/p1").unwrap_err();
        assert!(matches!(err, UnsealError::MalformedInput(_)));
    }

    #[test]
    fn test_rejects_downgraded_version() {
        let sealer = KeySealer::new(DOMAIN);
        let dk = data_key(1);
        let rk = sealer.derive_resource_key(&dk);
        let mut envelope = sealer.seal(&dk, &rk, "nb1/p1").unwrap();

        let mut sealed = BASE64.decode(&envelope.sealed_key).unwrap();
        sealed[0] = 0x10;
        envelope.sealed_key = BASE64.encode(sealed);

        assert_eq!(
            sealer.unseal(&dk, &envelope, "nb1/p1").unwrap_err(),
            UnsealError::UnsupportedVersion(0x10)
        );
    }

    #[test]
    fn test_fresh_iv_per_seal() {
        let sealer = KeySealer::new(DOMAIN);
        let dk = data_key(1);
        let rk = sealer.derive_resource_key(&dk);

        let a = sealer.seal(&dk, &rk, "nb1/p1").unwrap();
        let b = sealer.seal(&dk, &rk, "nb1/p1").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.sealed_key, b.sealed_key);
    }

    #[test]
    fn test_derived_resource_keys_are_unique() {
        let sealer = KeySealer::new(DOMAIN);
        let dk = data_key(1);
        let a = sealer.derive_resource_key(&dk);
        let b = sealer.derive_resource_key(&dk);
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), dk.as_bytes());
    }
}
