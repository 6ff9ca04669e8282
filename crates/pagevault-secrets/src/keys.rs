//! Key material types
//!
//! Plaintext keys live only in memory, are zeroed on drop and never
//! implement `Serialize`. Only their sealed forms are persisted.

use pagevault_core::ResourceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric key size in bytes (256 bits)
pub const KEY_LEN: usize = 32;

/// A KMS-issued data key in plaintext form
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    bytes: [u8; KEY_LEN],
}

impl DataKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Build from a decoded KMS response, rejecting anything but 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataKey([REDACTED])")
    }
}

/// The KMS ciphertext of a data key. Opaque; only the KMS can open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedDataKey(String);

impl SealedDataKey {
    pub fn new(ciphertext: impl Into<String>) -> Self {
        Self(ciphertext.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Both forms of a freshly minted data key
#[derive(Debug)]
pub struct GeneratedDataKey {
    pub plaintext: DataKey,
    pub sealed: SealedDataKey,
}

/// Per-write content encryption key
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ResourceKey {
    bytes: [u8; KEY_LEN],
}

impl ResourceKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceKey([REDACTED])")
    }
}

/// Context forwarded verbatim to the KMS. Unsealing must present the same
/// map that was used at generation time.
///
/// Backed by a `BTreeMap` so equal maps always serialize to equal bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyContext(BTreeMap<String, String>);

impl KeyContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The context a resource's data key is bound to
    pub fn for_resource(id: &ResourceId) -> Self {
        Self::new().with("resourceID", id.resource())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Canonical JSON encoding sent to the KMS
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}
