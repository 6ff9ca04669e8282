//! Reconciliation sweep
//!
//! Repairs whatever an interrupted write or delete left behind so that
//! every resource ends up with both a blob and an envelope, or neither.
//!
//! | Found | Meaning | Action |
//! |---|---|---|
//! | backup, no blob | crash before new content was written | restore backup |
//! | backup and blob, blob authenticates | crash after the envelope was stored | drop backup |
//! | backup and blob, blob does not authenticate | crash before the envelope was stored | restore backup |
//! | blob, no envelope | uncommitted first write | delete blob |
//! | envelope, no blob | partial delete | delete envelope |

use super::{exists, remove_if_exists, WriteCoordinator};
use crate::cipher::ContentCipher;
use crate::error::{Result, VaultError};
use pagevault_core::{BlobEntry, BlobLayout, CollectionId, ResourceId};
use pagevault_secrets::PageEncryptionRecord;
use serde::Serialize;
use std::collections::BTreeSet;
use std::io;
use tokio::fs as async_fs;
use tokio::io::BufReader;
use tracing::{info, warn};

const OP: &str = "recover";

/// What a sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Backups renamed back because no blob existed
    pub backups_restored: usize,
    /// Stale backups of committed writes removed
    pub backups_discarded: usize,
    /// Uncommitted blobs replaced by their backup
    pub writes_rolled_back: usize,
    /// Blobs without an envelope removed
    pub orphan_blobs_removed: usize,
    /// Envelopes without a blob removed
    pub orphan_envelopes_removed: usize,
    /// Resources that could not be reconciled, with the reason
    pub skipped: Vec<String>,
}

impl RecoveryReport {
    pub fn repairs(&self) -> usize {
        self.backups_restored
            + self.backups_discarded
            + self.writes_rolled_back
            + self.orphan_blobs_removed
            + self.orphan_envelopes_removed
    }

    pub fn is_clean(&self) -> bool {
        self.repairs() == 0 && self.skipped.is_empty()
    }
}

impl WriteCoordinator {
    /// Run the reconciliation sweep over every collection on disk
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for name in self.collections_on_disk().await? {
            match CollectionId::new(name.as_str()) {
                Ok(collection) => self.recover_collection(&collection, &mut report).await?,
                Err(e) => report.skipped.push(format!("{}: {}", name, e)),
            }
        }

        if report.is_clean() {
            info!("Recovery found nothing to repair");
        } else {
            info!(
                repairs = report.repairs(),
                skipped = report.skipped.len(),
                "Recovery finished"
            );
        }
        Ok(report)
    }

    /// Run the reconciliation sweep over one collection
    pub async fn recover_collection(
        &self,
        collection: &CollectionId,
        report: &mut RecoveryReport,
    ) -> Result<()> {
        let mut names = BTreeSet::new();

        let dir = self.blobs.collection_dir(collection);
        match async_fs::read_dir(&dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| VaultError::io(OP, collection, e))?
                {
                    let is_file = entry
                        .file_type()
                        .await
                        .map_err(|e| VaultError::io(OP, collection, e))?
                        .is_file();
                    if let (true, Some(name)) = (is_file, entry.file_name().to_str()) {
                        match BlobLayout::classify(name) {
                            BlobEntry::Primary(r) | BlobEntry::Backup(r) => names.insert(r),
                        };
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(VaultError::io(OP, collection, e)),
        }

        let prefix = self.secrets.collection_path(collection);
        let envelopes = self
            .store_call(&prefix, self.store.list(&prefix))
            .await
            .map_err(|e| VaultError::store(OP, collection, e))?;
        names.extend(envelopes);

        for name in names {
            let id = match ResourceId::in_collection(collection.clone(), name.as_str()) {
                Ok(id) => id,
                Err(e) => {
                    report.skipped.push(format!("{}/{}: {}", collection, name, e));
                    continue;
                }
            };

            let _guard = match self.locks.acquire(&id).await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!(resource = %id, error = %e, "Could not lock resource");
                    report.skipped.push(format!("{}: {}", id, e));
                    continue;
                }
            };
            if let Err(e) = self.reconcile(&id, report).await {
                warn!(resource = %id, error = %e, "Could not reconcile resource");
                report.skipped.push(format!("{}: {}", id, e));
            }
        }
        Ok(())
    }

    async fn collections_on_disk(&self) -> Result<Vec<String>> {
        let root = self.blobs.blobs_dir();
        let mut entries = match async_fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VaultError::io(OP, &root, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| VaultError::io(OP, &root, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| VaultError::io(OP, &root, e))?
                .is_dir();
            if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Bring one resource to a consistent state. Caller holds its lock.
    async fn reconcile(&self, id: &ResourceId, report: &mut RecoveryReport) -> Result<()> {
        let blob = self.blobs.blob_path(id);
        let backup = self.blobs.backup_path(id);

        let mut has_blob = exists(&blob).await.map_err(|e| VaultError::io(OP, id, e))?;
        let has_backup = exists(&backup).await.map_err(|e| VaultError::io(OP, id, e))?;
        let record = self.fetch_record(OP, id).await?;

        if has_backup {
            if !has_blob {
                async_fs::rename(&backup, &blob)
                    .await
                    .map_err(|e| VaultError::io(OP, id, e))?;
                has_blob = true;
                report.backups_restored += 1;
                info!(resource = %id, "Restored backup");
            } else if self.authenticates(id, record.as_ref()).await? {
                remove_if_exists(&backup)
                    .await
                    .map_err(|e| VaultError::io(OP, id, e))?;
                report.backups_discarded += 1;
                info!(resource = %id, "Removed backup of committed write");
            } else {
                async_fs::rename(&backup, &blob)
                    .await
                    .map_err(|e| VaultError::io(OP, id, e))?;
                report.writes_rolled_back += 1;
                info!(resource = %id, "Rolled back uncommitted write");
            }
        }

        match (has_blob, record.is_some()) {
            (true, false) => {
                remove_if_exists(&blob)
                    .await
                    .map_err(|e| VaultError::io(OP, id, e))?;
                report.orphan_blobs_removed += 1;
                info!(resource = %id, "Removed blob without envelope");
            }
            (false, true) => {
                let path = self.secrets.envelope_path(id);
                self.store_call(&path, self.store.delete(&path))
                    .await
                    .map_err(|e| VaultError::store(OP, id, e))?;
                report.orphan_envelopes_removed += 1;
                info!(resource = %id, "Removed envelope without blob");
            }
            _ => {}
        }
        Ok(())
    }

    /// Whether the current blob of `id` decrypts under `record`.
    ///
    /// Integrity failures mean "no"; an unreachable KMS is an error so the
    /// resource is left alone.
    async fn authenticates(
        &self,
        id: &ResourceId,
        record: Option<&PageEncryptionRecord>,
    ) -> Result<bool> {
        let Some(record) = record else {
            return Ok(false);
        };

        let key = match self.unseal_record(OP, id, record).await {
            Ok(key) => key,
            Err(e) if e.is_integrity_failure() || matches!(e, VaultError::Unseal { .. }) => {
                return Ok(false)
            }
            Err(e) => return Err(e),
        };

        let file = async_fs::File::open(self.blobs.blob_path(id))
            .await
            .map_err(|e| VaultError::io(OP, id, e))?;
        ContentCipher::verify(&mut BufReader::new(file), &key)
            .await
            .map_err(|e| VaultError::io(OP, id, e))
    }
}
