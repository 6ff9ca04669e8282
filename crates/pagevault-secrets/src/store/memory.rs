//! In-memory secret store for tests and `--local` mode

use super::{PageEncryptionRecord, SecretStore};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Records are kept as serialized JSON, the same bytes a remote store holds
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<BTreeMap<String, String>>,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `put` fail with `Unavailable`
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make every `delete` fail with `Unavailable`
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().contains_key(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Overwrite a raw value, bypassing serialization (for corruption tests)
    pub fn insert_raw(&self, path: &str, value: impl Into<String>) {
        self.lock().insert(path.to_string(), value.into());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A poisoned map is still structurally valid
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn put(&self, path: &str, record: &PageEncryptionRecord) -> Result<(), StoreError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(path, "simulated put failure"));
        }
        let json =
            serde_json::to_string(record).map_err(|e| StoreError::malformed(path, e.to_string()))?;
        self.lock().insert(path.to_string(), json);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<PageEncryptionRecord, StoreError> {
        let json = self
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::not_found(path))?;
        serde_json::from_str(&json).map_err(|e| StoreError::malformed(path, e.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(path, "simulated delete failure"));
        }
        self.lock().remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .lock()
            .keys()
            .filter_map(|k| k.strip_prefix(&dir))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
