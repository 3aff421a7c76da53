//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use virtback_core::{BackupLevel, CompressionMethod, ExtentSourceKind, StreamType};

// Re-export command types for convenience
pub use crate::commands::backup::BackupArgs;
pub use crate::commands::restore::RestoreArgs;

/// Virtback - thin-provisioned virtual machine disk backups
#[derive(Parser, Debug)]
#[command(name = "virtback")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Exit with status 2 when the command finished with warnings
    #[arg(long, global = true)]
    pub strict: bool,

    /// Configuration directory (default: ~/.virtback)
    #[arg(long, global = true, env = "VIRTBACK_CONFIG_DIR")]
    pub config_dir: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show version information
    Version(VersionArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Back up the disks of a domain
    Backup(BackupArgs),

    /// Restore disks from a backup directory
    Restore(RestoreArgs),

    /// Build the block map of a backup chain
    Map(MapArgs),

    /// Replay incremental data onto a restored base image
    Replay(ReplayArgs),

    /// Show metadata and frames of stream files
    Info(InfoArgs),

    /// Verify checksums and stream structure of a backup directory
    Verify(VerifyArgs),
}

// Version command
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// Config commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write the default configuration to the config directory
    Init(ConfigInitArgs),

    /// Show resolved configuration
    Show(ConfigShowArgs),

    /// Print the configuration file location
    Path,
}

#[derive(Args, Debug)]
pub struct ConfigInitArgs {
    /// Overwrite existing file
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigShowArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// Map command
#[derive(Args, Debug)]
pub struct MapArgs {
    /// Backup directory
    #[arg(short, long)]
    pub input: Utf8PathBuf,

    /// Disk to map
    #[arg(short, long)]
    pub disk: String,

    /// Block map file (default: <input>/<disk>.map.json)
    #[arg(short, long)]
    pub output: Option<Utf8PathBuf>,

    /// Print every entry
    #[arg(long)]
    pub entries: bool,
}

// Replay command
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Backup directory
    #[arg(short, long)]
    pub input: Utf8PathBuf,

    /// Disk to replay
    #[arg(short, long)]
    pub disk: String,

    /// Base image restored from the full backup; written in place
    #[arg(short, long)]
    pub base: Utf8PathBuf,

    /// Use a saved block map instead of scanning the chain
    #[arg(long)]
    pub map: Option<Utf8PathBuf>,
}

// Info command
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Stream files to inspect
    #[arg(required = true)]
    pub files: Vec<Utf8PathBuf>,

    /// List every frame
    #[arg(long)]
    pub frames: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// Verify command
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Backup directory
    pub input: Utf8PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LevelArg {
    /// Everything allocated; starts a new checkpoint chain
    Full,
    /// Changes since the last checkpoint; advances the chain
    Inc,
    /// Changes since the last checkpoint; leaves the chain alone
    Diff,
    /// Everything allocated, no checkpoint
    Copy,
}

impl From<LevelArg> for BackupLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Full => BackupLevel::Full,
            LevelArg::Inc => BackupLevel::Inc,
            LevelArg::Diff => BackupLevel::Diff,
            LevelArg::Copy => BackupLevel::Copy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StreamTypeArg {
    /// Sparse stream file
    Stream,
    /// Plain sparse image (full/copy only)
    Raw,
}

impl From<StreamTypeArg> for StreamType {
    fn from(kind: StreamTypeArg) -> Self {
        match kind {
            StreamTypeArg::Stream => StreamType::Stream,
            StreamTypeArg::Raw => StreamType::Raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompressionArg {
    Lz4,
    Zlib,
}

impl From<CompressionArg> for CompressionMethod {
    fn from(method: CompressionArg) -> Self {
        match method {
            CompressionArg::Lz4 => CompressionMethod::Lz4,
            CompressionArg::Zlib => CompressionMethod::Zlib,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExtentSourceArg {
    /// Scan the disk for zeroed blocks
    ZeroScan,
    /// Ask qemu-img for the allocation map
    QemuImg,
    /// Read change lists dumped from a dirty bitmap
    ChangeList,
}

impl From<ExtentSourceArg> for ExtentSourceKind {
    fn from(source: ExtentSourceArg) -> Self {
        match source {
            ExtentSourceArg::ZeroScan => ExtentSourceKind::ZeroScan,
            ExtentSourceArg::QemuImg => ExtentSourceKind::QemuImg,
            ExtentSourceArg::ChangeList => ExtentSourceKind::ChangeList,
        }
    }
}
