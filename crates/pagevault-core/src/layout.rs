//! Pure mapping from resource identifiers to storage locations
//!
//! Nothing in here touches the filesystem or the network.

use crate::resource::{CollectionId, Deployment, ResourceId, BACKUP_SUFFIX};
use camino::{Utf8Path, Utf8PathBuf};

/// Directory under the storage root that holds collection directories
pub const BLOBS_DIR: &str = "notebooks";

/// Directory under the storage root that holds cross-process lock files
pub const LOCKS_DIR: &str = ".locks";

/// Ciphertext blob layout: `<root>/notebooks/<collection>/<resource>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLayout {
    root: Utf8PathBuf,
}

/// A file found inside a collection directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobEntry {
    Primary(String),
    Backup(String),
}

impl BlobLayout {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn blobs_dir(&self) -> Utf8PathBuf {
        self.root.join(BLOBS_DIR)
    }

    pub fn collection_dir(&self, collection: &CollectionId) -> Utf8PathBuf {
        self.blobs_dir().join(collection.as_str())
    }

    pub fn blob_path(&self, id: &ResourceId) -> Utf8PathBuf {
        self.collection_dir(id.collection()).join(id.resource())
    }

    pub fn backup_path(&self, id: &ResourceId) -> Utf8PathBuf {
        self.collection_dir(id.collection())
            .join(format!("{}{}", id.resource(), BACKUP_SUFFIX))
    }

    pub fn lock_dir(&self) -> Utf8PathBuf {
        self.root.join(LOCKS_DIR)
    }

    /// Lock file shared by every operation in a collection and held
    /// exclusively while the collection is deleted
    pub fn collection_lock_path(&self, collection: &CollectionId) -> Utf8PathBuf {
        self.lock_dir()
            .join("collections")
            .join(format!("{}.lock", collection))
    }

    pub fn resource_lock_path(&self, id: &ResourceId) -> Utf8PathBuf {
        self.lock_dir()
            .join("resources")
            .join(id.collection().as_str())
            .join(format!("{}.lock", id.resource()))
    }

    /// Classify a file name found in a collection directory
    pub fn classify(file_name: &str) -> BlobEntry {
        match file_name.strip_suffix(BACKUP_SUFFIX) {
            Some(resource) if !resource.is_empty() => BlobEntry::Backup(resource.to_string()),
            _ => BlobEntry::Primary(file_name.to_string()),
        }
    }
}

/// Secret-store path layout: `<prefix>/<collection>/<resource>`
///
/// The prefix is environment-qualified (`notes` in production,
/// `notes-dev` in development).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretLayout {
    prefix: String,
}

impl SecretLayout {
    pub fn new(base_prefix: &str, deployment: Deployment) -> Self {
        Self {
            prefix: deployment.qualify(base_prefix.trim_matches('/')),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn envelope_path(&self, id: &ResourceId) -> String {
        format!("{}/{}/{}", self.prefix, id.collection(), id.resource())
    }

    pub fn collection_path(&self, collection: &CollectionId) -> String {
        format!("{}/{}", self.prefix, collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_paths() {
        let layout = BlobLayout::new("/srv/pagevault");
        let id = ResourceId::new("nb1", "p1").unwrap();

        assert_eq!(layout.blob_path(&id), "/srv/pagevault/notebooks/nb1/p1");
        assert_eq!(
            layout.backup_path(&id),
            "/srv/pagevault/notebooks/nb1/p1-backup"
        );
        assert_eq!(
            layout.collection_dir(id.collection()),
            "/srv/pagevault/notebooks/nb1"
        );
        assert_eq!(
            layout.resource_lock_path(&id),
            "/srv/pagevault/.locks/resources/nb1/p1.lock"
        );
        assert_eq!(
            layout.collection_lock_path(id.collection()),
            "/srv/pagevault/.locks/collections/nb1.lock"
        );
    }

    #[test]
    fn test_classify_entries() {
        assert_eq!(
            BlobLayout::classify("p1-backup"),
            BlobEntry::Backup("p1".to_string())
        );
        assert_eq!(
            BlobLayout::classify("p1"),
            BlobEntry::Primary("p1".to_string())
        );
        assert_eq!(
            BlobLayout::classify("-backup"),
            BlobEntry::Primary("-backup".to_string())
        );
    }

    #[test]
    fn test_secret_paths_are_environment_qualified() {
        let id = ResourceId::new("nb1", "p1").unwrap();

        let dev = SecretLayout::new("notes", Deployment::Development);
        let prod = SecretLayout::new("/notes/", Deployment::Production);

        assert_eq!(dev.envelope_path(&id), "notes-dev/nb1/p1");
        assert_eq!(prod.envelope_path(&id), "notes/nb1/p1");
        assert_eq!(dev.collection_path(id.collection()), "notes-dev/nb1");
        assert_ne!(dev.envelope_path(&id), prod.envelope_path(&id));
    }
}
