//! # pagevault-core
//!
//! Core library for pagevault providing:
//! - Configuration file parsing (pagevault.yaml) with environment overrides
//! - Validated resource identifiers and deployment environments
//! - Pure mapping from resources to blob paths and secret-store paths

pub mod config;
pub mod error;
pub mod layout;
pub mod resource;

pub use config::PagevaultConfig;
pub use error::{Error, Result};
pub use layout::{BlobEntry, BlobLayout, SecretLayout};
pub use resource::{CollectionId, Deployment, ResourceId, BACKUP_SUFFIX};
