//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

pub use crate::commands::collection::CollectionCommands;
use crate::runtime::GlobalOpts;

/// pagevault - Per-resource envelope encryption for notebook content
#[derive(Parser, Debug)]
#[command(name = "pagevault")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to pagevault.yaml config file
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Use an in-memory KMS and secret store (development only; nothing
    /// outlives the command)
    #[arg(long, global = true)]
    pub local: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn global_opts(&self) -> GlobalOpts {
        GlobalOpts {
            config: self.config.clone(),
            local: self.local,
            quiet: self.quiet,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Encrypt content and store it as a resource
    Write(WriteArgs),

    /// Decrypt a resource
    Read(ReadArgs),

    /// Delete a resource and its key envelope
    Delete(DeleteArgs),

    /// Collection management
    #[command(subcommand)]
    Collection(CollectionCommands),

    /// Repair state left behind by interrupted writes and deletes
    Recover(RecoverArgs),

    /// Show configuration and KMS session status
    Status(StatusArgs),
}

/// Identifies one resource
#[derive(Args, Debug, Clone)]
pub struct ResourceArgs {
    /// Collection (notebook) identifier
    pub collection: String,

    /// Resource (page) identifier
    pub resource: String,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    #[command(flatten)]
    pub target: ResourceArgs,

    /// Read content from this file instead of stdin
    #[arg(short, long)]
    pub file: Option<Utf8PathBuf>,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    #[command(flatten)]
    pub target: ResourceArgs,

    /// Write plaintext to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<Utf8PathBuf>,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub target: ResourceArgs,
}

#[derive(Args, Debug)]
pub struct RecoverArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_write_with_file() {
        let cli = Cli::try_parse_from([
            "pagevault", "write", "nb1", "p1", "--file", "page.md", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Write(args) => {
                assert_eq!(args.target.collection, "nb1");
                assert_eq!(args.target.resource, "p1");
                assert_eq!(args.file.as_deref(), Some(camino::Utf8Path::new("page.md")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_collection_delete() {
        let cli =
            Cli::try_parse_from(["pagevault", "--local", "collection", "delete", "nb1"]).unwrap();
        assert!(cli.local);
        assert!(matches!(
            cli.command,
            Commands::Collection(CollectionCommands::Delete(_))
        ));
    }

    #[test]
    fn test_read_requires_resource() {
        assert!(Cli::try_parse_from(["pagevault", "read", "nb1"]).is_err());
    }
}
