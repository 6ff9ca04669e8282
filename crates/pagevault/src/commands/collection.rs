//! Collection management commands

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use pagevault_core::CollectionId;

use super::explain;
use crate::output;
use crate::runtime::{GlobalOpts, Runtime};

#[derive(Subcommand, Debug)]
pub enum CollectionCommands {
    /// Create an empty collection
    Create(CollectionArgs),

    /// Delete a collection with every resource in it
    Delete(CollectionArgs),
}

#[derive(Args, Debug)]
pub struct CollectionArgs {
    /// Collection (notebook) identifier
    pub collection: String,
}

pub async fn run(cmd: CollectionCommands, opts: &GlobalOpts) -> Result<()> {
    match cmd {
        CollectionCommands::Create(args) => create(args, opts).await,
        CollectionCommands::Delete(args) => delete(args, opts).await,
    }
}

fn collection_id(args: &CollectionArgs) -> Result<CollectionId> {
    CollectionId::new(args.collection.as_str()).context("Invalid collection identifier")
}

async fn create(args: CollectionArgs, opts: &GlobalOpts) -> Result<()> {
    let collection = collection_id(&args)?;
    let runtime = Runtime::start(opts).await?;

    let result = runtime.coordinator.create_collection(&collection).await;
    runtime.shutdown().await;

    result.map_err(explain)?;
    if !opts.quiet {
        output::success(&format!("Created collection {}", collection));
    }
    Ok(())
}

async fn delete(args: CollectionArgs, opts: &GlobalOpts) -> Result<()> {
    let collection = collection_id(&args)?;
    let runtime = Runtime::start(opts).await?;

    let spinner = output::spinner(&format!("Deleting collection {}...", collection));
    let result = runtime.coordinator.delete_collection(&collection).await;
    spinner.finish_and_clear();
    runtime.shutdown().await;

    let removed = result.map_err(explain)?;
    if !opts.quiet {
        output::success(&format!(
            "Deleted collection {} ({} resources)",
            collection, removed
        ));
    }
    Ok(())
}
