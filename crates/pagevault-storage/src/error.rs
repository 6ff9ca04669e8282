//! Coordinator error type
//!
//! Every lower-layer failure is wrapped with the operation and the resource
//! it was performed on.

use crate::cipher::DecryptError;
use crate::coordinator::WriteState;
use pagevault_secrets::{KmsError, SealError, StoreError, UnsealError};
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("{op} {resource}: {source}")]
    Kms {
        op: &'static str,
        resource: String,
        #[source]
        source: KmsError,
    },

    #[error("{op} {resource}: {source}")]
    Seal {
        op: &'static str,
        resource: String,
        #[source]
        source: SealError,
    },

    /// The sealed key did not open; content is unavailable or corrupted
    #[error("{op} {resource}: {source}")]
    Unseal {
        op: &'static str,
        resource: String,
        #[source]
        source: UnsealError,
    },

    #[error("{op} {resource}: {source}")]
    Store {
        op: &'static str,
        resource: String,
        #[source]
        source: StoreError,
    },

    #[error("{op} {resource}: {source}")]
    Decrypt {
        op: &'static str,
        resource: String,
        #[source]
        source: DecryptError,
    },

    #[error("{op} {resource}: {source}")]
    Io {
        op: &'static str,
        resource: String,
        #[source]
        source: io::Error,
    },

    /// Neither a blob nor an envelope exists
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Blob and envelope disagree on existence; run `recover`
    #[error(
        "{resource} is inconsistent (blob present: {blob_present}, envelope present: {envelope_present})"
    )]
    Inconsistent {
        resource: String,
        blob_present: bool,
        envelope_present: bool,
    },

    /// Exactly one side of a delete succeeded; run `recover`
    #[error("delete {resource} only partially succeeded: {failed} not removed: {message}")]
    PartialDelete {
        resource: String,
        failed: DeleteSide,
        message: String,
    },

    /// Both sides of a delete failed
    #[error("delete {resource} failed: blob: {blob_error}; envelope: {envelope_error}")]
    DeleteFailed {
        resource: String,
        blob_error: String,
        envelope_error: String,
    },

    /// A simulated crash stopped the write without rolling back
    #[error("write {resource} halted after {state}")]
    Halted { resource: String, state: WriteState },

    #[error(transparent)]
    Core(#[from] pagevault_core::Error),
}

/// Which half of a resource a delete failed to remove
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteSide {
    Blob,
    Envelope,
}

impl std::fmt::Display for DeleteSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteSide::Blob => write!(f, "blob"),
            DeleteSide::Envelope => write!(f, "envelope"),
        }
    }
}

impl VaultError {
    pub fn kms(op: &'static str, resource: impl ToString, source: KmsError) -> Self {
        Self::Kms {
            op,
            resource: resource.to_string(),
            source,
        }
    }

    pub fn seal(op: &'static str, resource: impl ToString, source: SealError) -> Self {
        Self::Seal {
            op,
            resource: resource.to_string(),
            source,
        }
    }

    pub fn unseal(op: &'static str, resource: impl ToString, source: UnsealError) -> Self {
        Self::Unseal {
            op,
            resource: resource.to_string(),
            source,
        }
    }

    pub fn store(op: &'static str, resource: impl ToString, source: StoreError) -> Self {
        Self::Store {
            op,
            resource: resource.to_string(),
            source,
        }
    }

    pub fn decrypt(op: &'static str, resource: impl ToString, source: DecryptError) -> Self {
        Self::Decrypt {
            op,
            resource: resource.to_string(),
            source,
        }
    }

    pub fn io(op: &'static str, resource: impl ToString, source: io::Error) -> Self {
        Self::Io {
            op,
            resource: resource.to_string(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VaultError::NotFound { .. })
    }

    /// Whether the reconciliation sweep can repair the state this error left
    pub fn needs_recovery(&self) -> bool {
        matches!(
            self,
            VaultError::Inconsistent { .. }
                | VaultError::PartialDelete { .. }
                | VaultError::Halted { .. }
        )
    }

    /// Content could not be authenticated: wrong key, tampering or a
    /// misplaced envelope
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            VaultError::Unseal {
                source: UnsealError::AuthenticationFailed,
                ..
            } | VaultError::Decrypt {
                source: DecryptError::AuthenticationFailed,
                ..
            } | VaultError::Kms {
                source: KmsError::AuthMismatch,
                ..
            }
        )
    }
}
