//! Error types for key management, sealing and envelope storage
//!
//! Messages say what failed without echoing key material or tokens.

use std::time::Duration;
use thiserror::Error;

/// Failures talking to the key-management service
#[derive(Error, Debug)]
pub enum KmsError {
    /// Login failed, or the session token is missing, invalid or expired
    #[error("KMS authentication failed: {0}")]
    Auth(String),

    /// The KMS refused to unseal because the context differs from the one
    /// used at generation time (or the sealed key was tampered with)
    #[error("KMS refused to unseal: context or ciphertext mismatch")]
    AuthMismatch,

    /// Network or service failure
    #[error("KMS unavailable: {0}")]
    Unavailable(String),

    /// The request did not complete within the allotted time
    #[error("KMS request timed out after {0:?}")]
    Timeout(Duration),

    /// The KMS rejected the request for a reason other than authentication
    #[error("KMS rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The KMS answered with something we could not interpret
    #[error("Malformed KMS response: {0}")]
    Malformed(String),

    /// Renewing the session lease failed
    #[error("KMS session renewal failed: {0}")]
    Renewal(String),
}

impl KmsError {
    /// Whether retrying the whole operation from the start could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, KmsError::Unavailable(_) | KmsError::Timeout(_))
    }
}

/// Failures sealing a resource key
#[derive(Error, Debug)]
pub enum SealError {
    /// The AEAD primitive produced an unexpected amount of output
    #[error("Sealed key has wrong size: expected {expected} bytes, got {actual}")]
    OutputSize { expected: usize, actual: usize },

    /// The AEAD primitive reported a failure
    #[error("Key sealing failed")]
    Cipher,
}

/// Failures unsealing a resource key
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UnsealError {
    /// Tag verification failed: wrong data key, tampered ciphertext, or a
    /// label/IV that does not match the one used at seal time
    #[error("Key envelope authentication failed")]
    AuthenticationFailed,

    /// Base64 decoding or length checks failed
    #[error("Malformed key envelope: {0}")]
    MalformedInput(String),

    /// The sealed key was produced by a protocol version we refuse to read
    #[error("Unsupported key envelope version: {0:#04x}")]
    UnsupportedVersion(u8),
}

/// Failures reading or writing the secret store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Nothing is stored at the path
    #[error("No envelope stored at {path}")]
    NotFound { path: String },

    /// Network or service failure
    #[error("Secret store unavailable at {path}: {message}")]
    Unavailable { path: String, message: String },

    /// A value exists but is not a valid encryption record
    #[error("Malformed envelope at {path}: {message}")]
    Malformed { path: String, message: String },
}

impl StoreError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn unavailable(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn malformed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
