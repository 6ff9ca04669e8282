//! Write coordinator
//!
//! Orchestrates writes across the blob filesystem and the secret store:
//!
//! ```text
//! Idle -> BackedUp -> KeyMaterialReady -> ContentWritten -> EnvelopePersisted -> Committed
//!   \________\______________\_________________\_______________> RolledBack
//! ```
//!
//! Steps run strictly in order, under a per-resource lock. A failure rolls
//! the filesystem back to where it started; the secret store is only
//! touched in the `EnvelopePersisted` step.

mod fault;
mod locks;
mod recovery;
mod transaction;

pub use fault::{FaultAction, FaultAt, FaultInjector, NoFaults};
pub use locks::{CollectionGuard, LockTable, ResourceGuard};
pub use recovery::RecoveryReport;
pub use transaction::{WriteChange, WriteState, WriteTransaction};

use crate::cipher::ContentCipher;
use crate::error::{DeleteSide, Result, VaultError};
use camino::Utf8Path;
use pagevault_core::{BlobLayout, CollectionId, PagevaultConfig, ResourceId, SecretLayout};
use pagevault_secrets::{
    KeyContext, KeyManagement, KeySealer, KmsError, PageEncryptionRecord, ResourceKey,
    SecretStore, StoreError,
};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs as async_fs;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info, warn};

/// Where blobs and envelopes live and how long remote calls may take
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub blobs: BlobLayout,
    pub secrets: SecretLayout,
    /// Domain-separation constant for key sealing
    pub domain: String,
    pub operation_timeout: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &PagevaultConfig) -> Self {
        Self {
            blobs: config.blob_layout(),
            secrets: config.secret_layout(),
            domain: config.config.crypto.domain.clone(),
            operation_timeout: config.config.operation_timeout(),
        }
    }
}

/// Why a write stopped before committing
enum WriteFailure {
    /// Roll the filesystem back
    Failed(VaultError),
    Halted(WriteState),
    /// The envelope could not be restored after a failed put; leave the
    /// files for the reconciliation sweep
    Unresolved(VaultError),
}

impl From<VaultError> for WriteFailure {
    fn from(err: VaultError) -> Self {
        WriteFailure::Failed(err)
    }
}

pub struct WriteCoordinator {
    kms: Arc<dyn KeyManagement>,
    store: Arc<dyn SecretStore>,
    sealer: KeySealer,
    blobs: BlobLayout,
    secrets: SecretLayout,
    timeout: Duration,
    locks: LockTable,
    faults: Arc<dyn FaultInjector>,
}

impl WriteCoordinator {
    pub fn new(
        kms: Arc<dyn KeyManagement>,
        store: Arc<dyn SecretStore>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            kms,
            store,
            sealer: KeySealer::new(settings.domain),
            locks: LockTable::new(settings.blobs.clone()),
            blobs: settings.blobs,
            secrets: settings.secrets,
            timeout: settings.operation_timeout,
            faults: Arc::new(NoFaults),
        }
    }

    pub fn with_fault_injector(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.faults = faults;
        self
    }

    pub fn blob_layout(&self) -> &BlobLayout {
        &self.blobs
    }

    pub fn secret_layout(&self) -> &SecretLayout {
        &self.secrets
    }

    /// Encrypt `content` and store it as resource `id`, replacing any
    /// previous version
    pub async fn write<R>(&self, id: &ResourceId, content: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let _guard = self
            .locks
            .acquire(id)
            .await
            .map_err(|e| VaultError::io("write", id, e))?;
        let mut tx = WriteTransaction::begin(id);

        match self.run_write(&mut tx, id, content).await {
            Ok(()) => {
                tx.commit();
                info!(resource = %id, "Write committed");
                Ok(())
            }
            Err(WriteFailure::Halted(state)) => {
                tx.abandon();
                Err(VaultError::Halted {
                    resource: id.to_string(),
                    state,
                })
            }
            Err(WriteFailure::Failed(err)) => {
                warn!(resource = %id, state = %tx.state(), error = %err, "Write failed");
                tx.rollback().await;
                Err(err)
            }
            Err(WriteFailure::Unresolved(err)) => {
                warn!(
                    resource = %id,
                    error = %err,
                    "Envelope state unknown after failed put; leaving files for recovery"
                );
                tx.abandon();
                Err(err)
            }
        }
    }

    async fn run_write<R>(
        &self,
        tx: &mut WriteTransaction,
        id: &ResourceId,
        content: &mut R,
    ) -> std::result::Result<(), WriteFailure>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        const OP: &str = "write";
        let blob = self.blobs.blob_path(id);
        let backup = self.blobs.backup_path(id);

        // Idle -> BackedUp
        let collection_dir = self.blobs.collection_dir(id.collection());
        async_fs::create_dir_all(&collection_dir)
            .await
            .map_err(|e| VaultError::io(OP, id, e))?;
        if exists(&blob).await.map_err(|e| VaultError::io(OP, id, e))? {
            async_fs::rename(&blob, &backup)
                .await
                .map_err(|e| VaultError::io(OP, id, e))?;
            tx.record_backup(blob.clone(), backup.clone());
        }
        self.checkpoint(tx, id, WriteState::BackedUp)?;

        // BackedUp -> KeyMaterialReady
        let context = KeyContext::for_resource(id);
        let data_key = self
            .kms_call(self.kms.generate_data_key(&context))
            .await
            .map_err(|e| VaultError::kms(OP, id, e))?;
        let resource_key = self.sealer.derive_resource_key(&data_key.plaintext);
        let envelope = self
            .sealer
            .seal(&data_key.plaintext, &resource_key, &id.label())
            .map_err(|e| VaultError::seal(OP, id, e))?;
        let record = PageEncryptionRecord {
            sealed_data_key: data_key.sealed.clone(),
            key: envelope,
        };
        drop(data_key);
        self.checkpoint(tx, id, WriteState::KeyMaterialReady)?;

        // KeyMaterialReady -> ContentWritten
        tx.record_blob_created(blob.clone());
        write_blob(&blob, content, &resource_key)
            .await
            .map_err(|e| VaultError::io(OP, id, e))?;
        drop(resource_key);
        self.checkpoint(tx, id, WriteState::ContentWritten)?;

        // ContentWritten -> EnvelopePersisted
        let path = self.secrets.envelope_path(id);
        let previous = match tx.backup() {
            Some(_) => self.fetch_record(OP, id).await?,
            None => None,
        };
        tx.record_put_started();
        if let Err(e) = self.store_call(&path, self.store.put(&path, &record)).await {
            let err = VaultError::store(OP, id, e);
            // The put may have landed; put back what was there before so
            // the restored backup still matches its envelope
            return match self.restore_envelope(&path, previous.as_ref()).await {
                Ok(()) => Err(WriteFailure::Failed(err)),
                Err(undo) => {
                    warn!(resource = %id, error = %undo, "Failed to restore previous envelope");
                    Err(WriteFailure::Unresolved(err))
                }
            };
        }
        // From here on the write is durable. A failure of the commit step
        // only leaves a stale backup, which the reconciliation sweep removes.
        match self.checkpoint(tx, id, WriteState::EnvelopePersisted) {
            Ok(()) => {
                if let Err(e) = remove_if_exists(&backup).await {
                    warn!(resource = %id, error = %e, "Failed to remove backup after commit");
                }
            }
            Err(WriteFailure::Failed(e)) => {
                warn!(resource = %id, error = %e, "Backup cleanup skipped");
            }
            Err(halted) => return Err(halted),
        }

        match self.checkpoint(tx, id, WriteState::Committed) {
            Err(WriteFailure::Halted(state)) => Err(WriteFailure::Halted(state)),
            _ => Ok(()),
        }
    }

    fn checkpoint(
        &self,
        tx: &mut WriteTransaction,
        id: &ResourceId,
        state: WriteState,
    ) -> std::result::Result<(), WriteFailure> {
        tx.advance(state);
        match self.faults.after(id, state) {
            FaultAction::Continue => Ok(()),
            FaultAction::Fail => Err(WriteFailure::Failed(VaultError::io(
                "write",
                id,
                io::Error::other(format!("injected fault after {}", state)),
            ))),
            FaultAction::Halt => Err(WriteFailure::Halted(state)),
        }
    }

    /// Decrypt resource `id` into `sink`.
    ///
    /// Chunks are verified before they are written, but a failure part way
    /// through leaves earlier verified chunks in the sink. Use [`read`]
    /// to get all-or-nothing behaviour.
    ///
    /// [`read`]: WriteCoordinator::read
    pub async fn read_to<W>(&self, id: &ResourceId, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        const OP: &str = "read";
        let _guard = self
            .locks
            .acquire(id)
            .await
            .map_err(|e| VaultError::io(OP, id, e))?;

        let blob = match async_fs::File::open(self.blobs.blob_path(id)).await {
            Ok(file) => Some(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(VaultError::io(OP, id, e)),
        };
        let record = self.fetch_record(OP, id).await?;

        let (file, record) = match (blob, record) {
            (Some(file), Some(record)) => (file, record),
            (None, None) => {
                return Err(VaultError::NotFound {
                    resource: id.to_string(),
                })
            }
            (file, record) => {
                return Err(VaultError::Inconsistent {
                    resource: id.to_string(),
                    blob_present: file.is_some(),
                    envelope_present: record.is_some(),
                })
            }
        };

        let resource_key = self.unseal_record(OP, id, &record).await?;
        let written =
            ContentCipher::decrypt_from_source(&mut BufReader::new(file), &resource_key, sink)
                .await
                .map_err(|e| VaultError::decrypt(OP, id, e))?;

        debug!(resource = %id, bytes = written, "Read resource");
        Ok(written)
    }

    /// Decrypt resource `id` into memory; nothing is returned unless every
    /// chunk authenticates
    pub async fn read(&self, id: &ResourceId) -> Result<Vec<u8>> {
        let mut plaintext = Vec::new();
        self.read_to(id, &mut plaintext).await?;
        Ok(plaintext)
    }

    /// Remove both the blob and the envelope of `id`.
    ///
    /// Both removals are attempted even if the first fails.
    pub async fn delete(&self, id: &ResourceId) -> Result<()> {
        let _guard = self
            .locks
            .acquire(id)
            .await
            .map_err(|e| VaultError::io("delete", id, e))?;
        self.delete_locked(id).await
    }

    async fn delete_locked(&self, id: &ResourceId) -> Result<()> {
        let blob_result = remove_if_exists(&self.blobs.blob_path(id)).await;
        if let Err(e) = remove_if_exists(&self.blobs.backup_path(id)).await {
            warn!(resource = %id, error = %e, "Failed to remove stale backup");
        }

        let path = self.secrets.envelope_path(id);
        let envelope_result = self.store_call(&path, self.store.delete(&path)).await;

        match (blob_result, envelope_result) {
            (Ok(_), Ok(())) => {
                info!(resource = %id, "Deleted resource");
                Ok(())
            }
            (Err(blob), Ok(())) => Err(VaultError::PartialDelete {
                resource: id.to_string(),
                failed: DeleteSide::Blob,
                message: blob.to_string(),
            }),
            (Ok(_), Err(envelope)) => Err(VaultError::PartialDelete {
                resource: id.to_string(),
                failed: DeleteSide::Envelope,
                message: envelope.to_string(),
            }),
            (Err(blob), Err(envelope)) => Err(VaultError::DeleteFailed {
                resource: id.to_string(),
                blob_error: blob.to_string(),
                envelope_error: envelope.to_string(),
            }),
        }
    }

    /// Create the blob directory for a collection
    pub async fn create_collection(&self, collection: &CollectionId) -> Result<()> {
        let dir = self.blobs.collection_dir(collection);
        async_fs::create_dir_all(&dir)
            .await
            .map_err(|e| VaultError::io("create collection", collection, e))?;
        info!(collection = %collection, "Created collection");
        Ok(())
    }

    /// Delete every member envelope, then the collection directory.
    ///
    /// Holds the collection lock exclusively throughout, so no write, read
    /// or reconciliation of any member runs concurrently. Stops before
    /// touching the directory if any envelope cannot be deleted. Returns the
    /// number of resources removed.
    pub async fn delete_collection(&self, collection: &CollectionId) -> Result<usize> {
        const OP: &str = "delete collection";
        let _guard = self
            .locks
            .lock_collection(collection)
            .await
            .map_err(|e| VaultError::io(OP, collection, e))?;
        let prefix = self.secrets.collection_path(collection);
        let mut members = self
            .store_call(&prefix, self.store.list(&prefix))
            .await
            .map_err(|e| VaultError::store(OP, collection, e))?;
        members.sort();

        for name in &members {
            let id = ResourceId::in_collection(collection.clone(), name.as_str())?;
            let path = self.secrets.envelope_path(&id);
            self.store_call(&path, self.store.delete(&path))
                .await
                .map_err(|e| VaultError::store(OP, &id, e))?;
        }

        let dir = self.blobs.collection_dir(collection);
        match async_fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(VaultError::io(OP, collection, e)),
        }

        info!(collection = %collection, resources = members.len(), "Deleted collection");
        Ok(members.len())
    }

    /// Make the envelope at `path` equal to `previous`, removing it when
    /// there was none
    async fn restore_envelope(
        &self,
        path: &str,
        previous: Option<&PageEncryptionRecord>,
    ) -> std::result::Result<(), StoreError> {
        let current = match self.store_call(path, self.store.get(path)).await {
            Ok(record) => Some(record),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        if current.as_ref() == previous {
            return Ok(());
        }

        match previous {
            Some(record) => self.store_call(path, self.store.put(path, record)).await,
            None => self.store_call(path, self.store.delete(path)).await,
        }
    }

    async fn fetch_record(
        &self,
        op: &'static str,
        id: &ResourceId,
    ) -> Result<Option<PageEncryptionRecord>> {
        let path = self.secrets.envelope_path(id);
        match self.store_call(&path, self.store.get(&path)).await {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(VaultError::store(op, id, e)),
        }
    }

    async fn unseal_record(
        &self,
        op: &'static str,
        id: &ResourceId,
        record: &PageEncryptionRecord,
    ) -> Result<ResourceKey> {
        let data_key = self
            .kms_call(
                self.kms
                    .unseal_data_key(&record.sealed_data_key, &KeyContext::for_resource(id)),
            )
            .await
            .map_err(|e| VaultError::kms(op, id, e))?;

        self.sealer
            .unseal(&data_key, &record.key, &id.label())
            .map_err(|e| VaultError::unseal(op, id, e))
    }

    async fn kms_call<T, F>(&self, call: F) -> std::result::Result<T, KmsError>
    where
        F: Future<Output = std::result::Result<T, KmsError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(KmsError::Timeout(self.timeout)))
    }

    async fn store_call<T, F>(&self, path: &str, call: F) -> std::result::Result<T, StoreError>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::unavailable(
                    path,
                    format!("timed out after {:?}", self.timeout),
                ))
            })
    }
}

async fn write_blob<R>(path: &Utf8Path, content: &mut R, key: &ResourceKey) -> io::Result<()>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let file = async_fs::File::create(path).await?;
    let mut writer = BufWriter::new(file);
    ContentCipher::encrypt_to_sink(content, key, &mut writer).await?;
    writer.flush().await?;
    writer.into_inner().sync_all().await
}

async fn exists(path: &Utf8Path) -> io::Result<bool> {
    async_fs::try_exists(path).await
}

/// Returns whether a file was removed
async fn remove_if_exists(path: &Utf8Path) -> io::Result<bool> {
    match async_fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
