//! # pagevault-storage
//!
//! Content encryption and crash-safe persistence for pagevault:
//! - Streaming authenticated encryption of resource content
//! - Write coordination across the blob filesystem and the secret store
//! - Reconciliation of state left behind by crashes or partial deletes

pub mod cipher;
pub mod coordinator;
pub mod error;

pub use cipher::{ContentCipher, DecryptError};
pub use coordinator::{
    CoordinatorSettings, FaultAction, FaultAt, FaultInjector, NoFaults, RecoveryReport,
    WriteCoordinator, WriteState,
};
pub use error::{DeleteSide, Result, VaultError};
