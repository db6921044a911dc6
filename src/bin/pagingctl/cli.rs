use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Offline inspection of a broker paging directory.
#[derive(Parser, Debug)]
#[command(name = "pagingctl", version, about = "Broker paging directory tool")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Per-address page counts, seal state and unacknowledged bytes
    Status {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print every record of one address, oldest first
    Dump {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        address: String,
        /// JSON lines; bodies are base64
        #[arg(long, default_value_t = false)]
        json: bool,
        /// Stop after this many records
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Scan all pages with CRC checks; exits non-zero on interior corruption
    Verify {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}
