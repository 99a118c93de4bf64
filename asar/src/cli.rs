use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "asar",
    about = "Pack, list and extract asar archives.",
    version
)]
pub struct Cli {
    /// Increase log output (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(visible_alias = "p", about = "Create an archive from a directory")]
    Pack(PackArgs),

    #[command(visible_alias = "x", about = "Extract all files from an archive")]
    Extract(ExtractArgs),

    #[command(visible_aliases = ["l", "ls"], about = "List entries in an archive")]
    List(ListArgs),

    #[command(about = "Show archive frame and statistics")]
    Info(InfoArgs),
}

#[derive(Debug, clap::Args)]
#[command(after_help = "\
\x1b[1m\x1b[4mExamples:\x1b[0m
  asar pack app.asar app/
  asar pack app.asar app/ --unpack '*.node' --exclude '*.map'")]
pub struct PackArgs {
    /// Output archive path
    pub archive: PathBuf,

    /// Directory to archive
    pub dir: PathBuf,

    /// Store files matching pattern outside the archive (header entry only)
    #[arg(long = "unpack", value_name = "PATTERN")]
    pub unpack: Vec<String>,

    /// Exclude files matching pattern
    #[arg(long = "exclude", value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Do not compute integrity hashes
    #[arg(long)]
    pub no_integrity: bool,

    /// Block size in bytes for integrity hashes
    #[arg(long, default_value_t = asar_format::DEFAULT_BLOCK_SIZE)]
    pub block_size: u64,

    /// Overwrite existing archive
    #[arg(short = 'f', long)]
    pub force: bool,
}

#[derive(Debug, clap::Args)]
pub struct ExtractArgs {
    /// Path to the archive to extract
    pub archive: PathBuf,

    /// Output directory (defaults to current directory)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, clap::Args)]
pub struct ListArgs {
    /// Path to the archive
    pub archive: PathBuf,

    /// Show entry kind, size and offset
    #[arg(short = 'l', long)]
    pub long: bool,
}

#[derive(Debug, clap::Args)]
pub struct InfoArgs {
    /// Path to the archive
    pub archive: PathBuf,
}
