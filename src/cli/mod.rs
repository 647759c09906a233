use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Write a timestamped copy of all progress output to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Pack a directory tree into a single archive file.
    #[command(alias = "p")]
    Pack {
        /// The base directory whose files will be packed.
        #[arg(required = true)]
        base: PathBuf,

        /// The path for the output archive file (e.g., game_data.vfs).
        #[arg(short, long)]
        output: PathBuf,

        /// Number of parallel hashing threads. [0 = auto-detect based on CPU cores]
        #[arg(long, default_value_t = 0)]
        threads: usize,
    },

    /// Recreate every packed file under an output directory.
    #[command(alias = "x")]
    Unpack {
        /// The archive file to unpack.
        #[arg(required = true)]
        archive: PathBuf,

        /// The directory where files will be recreated.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List the contents of an archive without extracting it.
    #[command(alias = "l")]
    List {
        /// The archive file to list contents of.
        #[arg(required = true)]
        archive: PathBuf,
    },
}

/// Parses command-line arguments using `clap`.
///
/// This is the main entry point for the CLI logic. It returns the parsed
/// arguments, or an error if parsing fails.
pub fn run() -> Result<Args, Box<dyn std::error::Error>> {
    let args = Args::parse();
    Ok(args)
}
