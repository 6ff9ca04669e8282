//! Write transaction with filesystem rollback

use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use tokio::fs as async_fs;
use tracing::{debug, warn};

/// Progress of a single write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteState {
    Idle,
    /// Any existing blob has been renamed to its backup path
    BackedUp,
    /// A data key was issued and the resource key sealed
    KeyMaterialReady,
    /// The new ciphertext blob is fully written and synced
    ContentWritten,
    /// The encryption record is in the secret store
    EnvelopePersisted,
    Committed,
    RolledBack,
}

impl WriteState {
    /// The transitions a write passes through, in order
    pub const PROGRESSION: [WriteState; 5] = [
        WriteState::BackedUp,
        WriteState::KeyMaterialReady,
        WriteState::ContentWritten,
        WriteState::EnvelopePersisted,
        WriteState::Committed,
    ];
}

impl fmt::Display for WriteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteState::Idle => "idle",
            WriteState::BackedUp => "backed-up",
            WriteState::KeyMaterialReady => "key-material-ready",
            WriteState::ContentWritten => "content-written",
            WriteState::EnvelopePersisted => "envelope-persisted",
            WriteState::Committed => "committed",
            WriteState::RolledBack => "rolled-back",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub enum WriteChange {
    /// The previous blob was renamed to `backup`
    BackedUp {
        path: Utf8PathBuf,
        backup: Utf8PathBuf,
    },
    /// A new blob was created at `path`
    BlobCreated { path: Utf8PathBuf },
}

/// Filesystem changes made by an in-flight write.
///
/// Dropping an unfinished transaction undoes its changes synchronously,
/// unless the envelope `put` had already been issued: its outcome is then
/// unknown and the files are left for the reconciliation sweep.
pub struct WriteTransaction {
    resource: String,
    state: WriteState,
    changes: Vec<WriteChange>,
    put_started: bool,
    finished: bool,
}

impl WriteTransaction {
    pub fn begin(resource: impl ToString) -> Self {
        Self {
            resource: resource.to_string(),
            state: WriteState::Idle,
            changes: Vec::new(),
            put_started: false,
            finished: false,
        }
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    pub fn advance(&mut self, state: WriteState) {
        debug!(resource = %self.resource, from = %self.state, to = %state, "Write transition");
        self.state = state;
    }

    pub fn record_backup(&mut self, path: Utf8PathBuf, backup: Utf8PathBuf) {
        self.changes.push(WriteChange::BackedUp { path, backup });
    }

    pub fn record_blob_created(&mut self, path: Utf8PathBuf) {
        self.changes.push(WriteChange::BlobCreated { path });
    }

    pub fn record_put_started(&mut self) {
        self.put_started = true;
    }

    pub fn backup(&self) -> Option<&Utf8Path> {
        self.changes.iter().find_map(|c| match c {
            WriteChange::BackedUp { backup, .. } => Some(backup.as_path()),
            WriteChange::BlobCreated { .. } => None,
        })
    }

    pub fn changes(&self) -> &[WriteChange] {
        &self.changes
    }

    pub fn commit(mut self) {
        self.state = WriteState::Committed;
        self.finished = true;
    }

    /// Stop tracking without undoing anything (simulated crash)
    pub fn abandon(mut self) {
        self.finished = true;
    }

    /// Undo recorded changes in reverse order.
    ///
    /// Failures are logged and skipped so later changes still get undone.
    pub async fn rollback(mut self) {
        warn!(resource = %self.resource, state = %self.state, "Rolling back write");

        for change in self.changes.iter().rev() {
            if let Err(e) = rollback_change(change).await {
                warn!("Failed to roll back {:?}: {}", change, e);
            }
        }

        self.state = WriteState::RolledBack;
        self.finished = true;
    }
}

async fn rollback_change(change: &WriteChange) -> std::io::Result<()> {
    match change {
        WriteChange::BlobCreated { path } => match async_fs::remove_file(path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        },
        WriteChange::BackedUp { path, backup } => {
            if async_fs::try_exists(backup).await? {
                async_fs::rename(backup, path).await?;
            }
            Ok(())
        }
    }
}

fn rollback_change_blocking(change: &WriteChange) -> std::io::Result<()> {
    match change {
        WriteChange::BlobCreated { path } => match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        },
        WriteChange::BackedUp { path, backup } => {
            if backup.exists() {
                std::fs::rename(backup, path)?;
            }
            Ok(())
        }
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        if self.put_started {
            warn!(
                resource = %self.resource,
                state = %self.state,
                "Write cancelled with envelope put in flight; leaving files for recovery"
            );
            return;
        }

        warn!(resource = %self.resource, state = %self.state, "Write cancelled, rolling back");
        for change in self.changes.iter().rev() {
            if let Err(e) = rollback_change_blocking(change) {
                warn!("Failed to roll back {:?}: {}", change, e);
            }
        }
    }
}
