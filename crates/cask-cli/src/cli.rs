use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cask",
    about = "Cask blob store administration",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the store-catalog TOML file.
    #[arg(short, long, global = true, default_value = "cask-stores.toml")]
    pub catalog: String,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate the catalog and list the configured stores
    Check(CheckArgs),
    /// Show usage and operation metrics per store
    Info(InfoArgs),
    /// Show quota status per store
    Quota(QuotaArgs),
    /// Compact one store or all of them
    Compact(CompactArgs),
}

#[derive(Args)]
pub struct CheckArgs {}

#[derive(Args)]
pub struct InfoArgs {
    /// Limit to one store.
    #[arg(long)]
    pub store: Option<String>,
}

#[derive(Args)]
pub struct QuotaArgs {
    /// Limit to one store.
    #[arg(long)]
    pub store: Option<String>,
}

#[derive(Args)]
pub struct CompactArgs {
    /// Compact only this store (default: all stores).
    #[arg(long)]
    pub store: Option<String>,

    /// Only reclaim blobs soft-deleted at least this many days ago.
    #[arg(long, default_value_t = 0)]
    pub older_than_days: u32,
}
