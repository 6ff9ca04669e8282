//! CLI command implementations

pub mod collection;
pub mod delete;
pub mod read;
pub mod recover;
pub mod status;
pub mod write;

use anyhow::{Context, Result};
use pagevault_core::ResourceId;
use pagevault_storage::VaultError;

use crate::cli::ResourceArgs;
use crate::output;

pub(crate) fn resource_id(args: &ResourceArgs) -> Result<ResourceId> {
    ResourceId::new(args.collection.as_str(), args.resource.as_str())
        .context("Invalid resource identifier")
}

/// Point the user at `recover` when an error left storage half-done
pub(crate) fn explain(err: VaultError) -> anyhow::Error {
    if err.needs_recovery() {
        output::warning("Storage needs repair; run 'pagevault recover'");
    } else if err.is_integrity_failure() {
        output::error("Content failed authentication; it may have been tampered with");
    }
    anyhow::Error::new(err)
}
