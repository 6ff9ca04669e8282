//! Delete command

use anyhow::Result;

use super::{explain, resource_id};
use crate::cli::DeleteArgs;
use crate::output;
use crate::runtime::{GlobalOpts, Runtime};

pub async fn run(args: DeleteArgs, opts: &GlobalOpts) -> Result<()> {
    let id = resource_id(&args.target)?;
    let runtime = Runtime::start(opts).await?;

    let result = runtime.coordinator.delete(&id).await;
    runtime.shutdown().await;

    result.map_err(explain)?;
    if !opts.quiet {
        output::success(&format!("Deleted {}", id));
    }
    Ok(())
}
