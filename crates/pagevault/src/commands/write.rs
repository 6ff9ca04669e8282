//! Write command

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::BufReader;

use super::{explain, resource_id};
use crate::cli::WriteArgs;
use crate::output;
use crate::runtime::{GlobalOpts, Runtime};

pub async fn run(args: WriteArgs, opts: &GlobalOpts) -> Result<()> {
    let id = resource_id(&args.target)?;
    let runtime = Runtime::start(opts).await?;
    runtime.recover_on_startup().await?;

    let result = match &args.file {
        Some(path) => {
            let file = File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path))?;
            runtime
                .coordinator
                .write(&id, &mut BufReader::new(file))
                .await
        }
        None => {
            runtime
                .coordinator
                .write(&id, &mut BufReader::new(tokio::io::stdin()))
                .await
        }
    };
    runtime.shutdown().await;

    result.map_err(explain)?;
    if !opts.quiet {
        output::success(&format!("Stored {}", id));
    }
    Ok(())
}
