use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fetchkit")]
#[command(about = "Multi-connection download manager", long_about = None)]
pub struct Cli {
    /// Optional TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the transfer ledger
    #[arg(long, global = true, default_value = "data/fetchkit")]
    pub state_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download one or more URLs
    Download(DownloadArgs),
    /// Probe resource metadata without downloading
    Info {
        url: String,
    },
    /// Verify a file against a SHA-256 hex digest
    Verify {
        path: PathBuf,
        sha256: String,
    },
    /// Show the transfer history
    History,
}

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    /// URLs to download
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Connections per file (defaults to a host-derived value)
    #[arg(short, long)]
    pub connections: Option<usize>,
}
