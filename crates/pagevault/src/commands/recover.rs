//! Recover command

use anyhow::Result;
use pagevault_storage::RecoveryReport;

use crate::cli::RecoverArgs;
use crate::output;
use crate::runtime::{GlobalOpts, Runtime};

pub async fn run(args: RecoverArgs, opts: &GlobalOpts) -> Result<()> {
    let runtime = Runtime::start(opts).await?;

    let spinner = output::spinner("Reconciling storage...");
    let result = runtime.recover_on_startup().await;
    spinner.finish_and_clear();
    runtime.shutdown().await;
    let report = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !opts.quiet {
        print_report(&report);
    }

    if report.skipped.is_empty() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{} resources could not be reconciled",
            report.skipped.len()
        ))
    }
}

fn print_report(report: &RecoveryReport) {
    if report.is_clean() {
        output::success("Storage is consistent; nothing to repair");
        return;
    }

    output::header("Recovery");
    output::kv("Backups restored", &report.backups_restored.to_string());
    output::kv("Backups discarded", &report.backups_discarded.to_string());
    output::kv("Writes rolled back", &report.writes_rolled_back.to_string());
    output::kv("Orphan blobs removed", &report.orphan_blobs_removed.to_string());
    output::kv(
        "Orphan envelopes removed",
        &report.orphan_envelopes_removed.to_string(),
    );

    for skipped in &report.skipped {
        output::warning(&format!("Skipped {}", skipped));
    }
}
