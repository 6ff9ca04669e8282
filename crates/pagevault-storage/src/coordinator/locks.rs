//! Per-resource lock table
//!
//! Writes, reads, deletes and reconciliation of one resource are serialized
//! so the `<path>` / `<path>-backup` pair is only ever touched by one
//! operation, in this process or any other sharing the storage root.
//!
//! Every resource guard also holds its collection lock shared; deleting a
//! collection takes that lock exclusively and waits out in-flight
//! operations on any member, including members that only have a blob.
//!
//! Lock order: collection file lock, in-process mutex, resource file lock.

use camino::Utf8PathBuf;
use fs4::fs_std::FileExt;
use pagevault_core::{BlobLayout, CollectionId, ResourceId};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Unused entries are pruned once the table grows past this size
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Exclusive access to one resource; released on drop
#[derive(Debug)]
pub struct ResourceGuard {
    _file: File,
    _local: OwnedMutexGuard<()>,
    _collection: CollectionGuard,
}

/// Collection lock, shared or exclusive; released on drop
#[derive(Debug)]
pub struct CollectionGuard {
    _file: File,
}

#[derive(Debug)]
pub struct LockTable {
    layout: BlobLayout,
    locks: Mutex<HashMap<ResourceId, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    /// Lock files live under the layout's lock directory
    pub fn new(layout: BlobLayout) -> Self {
        Self {
            layout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `id`
    pub async fn acquire(&self, id: &ResourceId) -> io::Result<ResourceGuard> {
        let collection = CollectionGuard {
            _file: lock_file(
                self.layout.collection_lock_path(id.collection()),
                LockMode::Shared,
            )
            .await?,
        };

        let lock = {
            let mut locks = self.table();
            if locks.len() >= PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(id.clone()).or_default().clone()
        };
        let local = lock.lock_owned().await;

        let file = lock_file(self.layout.resource_lock_path(id), LockMode::Exclusive).await?;
        Ok(ResourceGuard {
            _file: file,
            _local: local,
            _collection: collection,
        })
    }

    /// Wait until no operation in `collection` is in flight and keep new
    /// ones out
    pub async fn lock_collection(&self, collection: &CollectionId) -> io::Result<CollectionGuard> {
        let file = lock_file(
            self.layout.collection_lock_path(collection),
            LockMode::Exclusive,
        )
        .await?;
        Ok(CollectionGuard { _file: file })
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn table(&self) -> MutexGuard<'_, HashMap<ResourceId, Arc<AsyncMutex<()>>>> {
        // The map stays valid even if a holder panicked
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Open (creating if needed) and lock `path`, blocking off the runtime
async fn lock_file(path: Utf8PathBuf, mode: LockMode) -> io::Result<File> {
    tokio::task::spawn_blocking(move || {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match mode {
            LockMode::Shared => FileExt::lock_shared(&file)?,
            LockMode::Exclusive => FileExt::lock_exclusive(&file)?,
        }
        Ok(file)
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn table(dir: &TempDir) -> LockTable {
        LockTable::new(BlobLayout::new(
            Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_same_resource_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let table = Arc::new(table(&dir));
        let id = ResourceId::new("nb1", "p1").unwrap();

        let guard = table.acquire(&id).await.unwrap();
        let contender = {
            let table = table.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _g = table.acquire(&id).await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_separate_tables_over_one_root_exclude_each_other() {
        let dir = TempDir::new().unwrap();
        let first = table(&dir);
        let second = Arc::new(table(&dir));
        let id = ResourceId::new("nb1", "p1").unwrap();

        let guard = first.acquire(&id).await.unwrap();
        let contender = {
            let second = second.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _g = second.acquire(&id).await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(5), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_collection_lock_waits_for_members() {
        let dir = TempDir::new().unwrap();
        let first = table(&dir);
        let second = Arc::new(table(&dir));
        let id = ResourceId::new("nb1", "p1").unwrap();

        let member = first.acquire(&id).await.unwrap();
        let deleter = {
            let second = second.clone();
            let collection = id.collection().clone();
            tokio::spawn(async move {
                let _g = second.lock_collection(&collection).await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!deleter.is_finished());

        drop(member);
        tokio::time::timeout(Duration::from_secs(5), deleter)
            .await
            .unwrap()
            .unwrap();

        // Other collections are unaffected
        let _other = first
            .acquire(&ResourceId::new("nb2", "p1").unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_resources_do_not_block() {
        let dir = TempDir::new().unwrap();
        let table = table(&dir);
        let _a = table
            .acquire(&ResourceId::new("nb1", "p1").unwrap())
            .await
            .unwrap();
        let _b = table
            .acquire(&ResourceId::new("nb1", "p2").unwrap())
            .await
            .unwrap();
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_prunes_idle_entries() {
        let dir = TempDir::new().unwrap();
        let table = table(&dir);
        for i in 0..PRUNE_THRESHOLD {
            let id = ResourceId::new("nb1", format!("p{}", i)).unwrap();
            drop(table.acquire(&id).await.unwrap());
        }
        assert_eq!(table.len(), PRUNE_THRESHOLD);

        let _held = table
            .acquire(&ResourceId::new("nb1", "last").unwrap())
            .await
            .unwrap();
        assert_eq!(table.len(), 1);
    }
}
