//! pagevault CLI - encrypted notebook storage
//!
//! This is the main entry point for the pagevault command-line interface.

mod cli;
mod commands;
mod output;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (required for rustls 0.23+)
    // This must be done before any TLS operations
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let opts = cli.global_opts();
    match cli.command {
        Commands::Write(args) => commands::write::run(args, &opts).await,
        Commands::Read(args) => commands::read::run(args, &opts).await,
        Commands::Delete(args) => commands::delete::run(args, &opts).await,
        Commands::Collection(cmd) => commands::collection::run(cmd, &opts).await,
        Commands::Recover(args) => commands::recover::run(args, &opts).await,
        Commands::Status(args) => commands::status::run(args, &opts).await,
    }
}

/// Initialize tracing with appropriate verbosity.
///
/// Logs go to stderr so `read` can stream content on stdout.
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}
