use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use mas_types::Version;

#[derive(Parser)]
#[command(
    name = "mas",
    about = "Model Archive Store: versioned storage for serialized models",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store directory (overrides the config file)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the manifests of all stored archives
    List(ListArgs),
    /// Store downloaded archive files
    Add(AddArgs),
    /// Check whether a model key is stored
    Has(KeyArgs),
    /// Print a stored model
    Get(GetArgs),
    /// Find models by simple key
    Find(FindArgs),
    /// Show the manifest and contents of an archive file
    Inspect(InspectArgs),
    /// Build an archive from payload files
    Pack(PackArgs),
}

#[derive(Args)]
pub struct ListArgs {}

#[derive(Args)]
pub struct AddArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Args)]
pub struct KeyArgs {
    pub key: String,
}

#[derive(Args)]
pub struct GetArgs {
    pub key: String,
    /// Write the payload bytes to stdout unmodified
    #[arg(long)]
    pub raw: bool,
}

#[derive(Args)]
pub struct FindArgs {
    pub simple_key: String,
}

#[derive(Args)]
pub struct InspectArgs {
    pub file: PathBuf,
}

#[derive(Args)]
pub struct PackArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub version: Version,
    /// RFC 3339 build time; defaults to now
    #[arg(long)]
    pub timestamp: Option<String>,
    /// Payload as KEY=FILE; repeatable
    #[arg(short, long = "payload", value_name = "KEY=FILE")]
    pub payloads: Vec<String>,
    /// Output file; defaults to the canonical name in the current directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Store the archive instead of writing it to a file
    #[arg(long, conflicts_with = "output")]
    pub add: bool,
}
