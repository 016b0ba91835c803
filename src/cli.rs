use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediastore")]
#[command(author, version, about = "Pin media and convert it into a locally cached container")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pin a source path and print its media store path
    Pin {
        /// Source media path
        #[arg(required = true)]
        path: String,
    },

    /// Unpin media by id or mediastore:// path
    Unpin {
        /// Media id or mediastore:// path
        media: String,
    },

    /// List pinned media
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show catalog and cache state of pinned media
    Status {
        /// Media id or mediastore:// path
        media: String,
    },

    /// Convert pinned media and copy the result to a file
    Export {
        /// Media id or mediastore:// path
        media: String,

        /// Output file
        #[arg(short, long, required = true)]
        output: PathBuf,

        /// Stop after this many seconds without new data
        #[arg(long, default_value = "5")]
        idle_timeout: u64,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        file: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
