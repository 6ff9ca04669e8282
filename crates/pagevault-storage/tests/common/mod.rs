//! Shared fixture for coordinator integration tests

#![allow(dead_code)]

use camino::Utf8PathBuf;
use pagevault_core::{BlobLayout, Deployment, ResourceId, SecretLayout};
use pagevault_secrets::{LocalKms, MemorySecretStore};
use pagevault_storage::{CoordinatorSettings, FaultInjector, WriteCoordinator};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const DOMAIN: &str = "TEST-HMAC-SHA256";

pub fn id(collection: &str, resource: &str) -> ResourceId {
    ResourceId::new(collection, resource).unwrap()
}

/// A storage root in a temp dir with an in-process KMS and secret store
pub struct Fixture {
    _dir: TempDir,
    pub root: Utf8PathBuf,
    pub kms: Arc<LocalKms>,
    pub store: Arc<MemorySecretStore>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("valid UTF-8");
        Self {
            _dir: dir,
            root,
            kms: Arc::new(LocalKms::new("notebook")),
            store: Arc::new(MemorySecretStore::new()),
        }
    }

    pub fn settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            blobs: BlobLayout::new(self.root.clone()),
            secrets: SecretLayout::new("notes", Deployment::Development),
            domain: DOMAIN.to_string(),
            operation_timeout: Duration::from_secs(5),
        }
    }

    pub fn coordinator(&self) -> WriteCoordinator {
        WriteCoordinator::new(self.kms.clone(), self.store.clone(), self.settings())
    }

    pub fn coordinator_with(&self, faults: Arc<dyn FaultInjector>) -> WriteCoordinator {
        self.coordinator().with_fault_injector(faults)
    }

    pub fn blob_path(&self, id: &ResourceId) -> Utf8PathBuf {
        BlobLayout::new(self.root.clone()).blob_path(id)
    }

    pub fn backup_path(&self, id: &ResourceId) -> Utf8PathBuf {
        BlobLayout::new(self.root.clone()).backup_path(id)
    }

    pub fn envelope_path(&self, id: &ResourceId) -> String {
        SecretLayout::new("notes", Deployment::Development).envelope_path(id)
    }

    pub fn has_blob(&self, id: &ResourceId) -> bool {
        self.blob_path(id).exists()
    }

    pub fn has_backup(&self, id: &ResourceId) -> bool {
        self.backup_path(id).exists()
    }

    pub fn has_envelope(&self, id: &ResourceId) -> bool {
        self.store.contains(&self.envelope_path(id))
    }

    /// Blob and envelope are both present or both absent, with no backup
    pub fn assert_consistent(&self, id: &ResourceId) {
        assert_eq!(
            self.has_blob(id),
            self.has_envelope(id),
            "{}: blob present = {}, envelope present = {}",
            id,
            self.has_blob(id),
            self.has_envelope(id)
        );
        assert!(!self.has_backup(id), "{}: stale backup left behind", id);
    }
}
