//! Read command

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;

use super::{explain, resource_id};
use crate::cli::ReadArgs;
use crate::output;
use crate::runtime::{GlobalOpts, Runtime};

pub async fn run(args: ReadArgs, opts: &GlobalOpts) -> Result<()> {
    let id = resource_id(&args.target)?;
    let runtime = Runtime::start(opts).await?;
    runtime.recover_on_startup().await?;

    // Fully authenticated before anything is emitted
    let result = runtime.coordinator.read(&id).await;
    runtime.shutdown().await;
    let plaintext = result.map_err(explain)?;

    match &args.output {
        Some(path) => {
            tokio::fs::write(path, &plaintext)
                .await
                .with_context(|| format!("Failed to write {}", path))?;
            if !opts.quiet {
                output::success(&format!(
                    "Decrypted {} ({}) to {}",
                    id,
                    output::format_bytes(plaintext.len() as u64),
                    path
                ));
            }
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&plaintext).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}
