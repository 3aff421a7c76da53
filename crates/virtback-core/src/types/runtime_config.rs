//! Runtime configuration types for operational parameters
//!
//! These types control how backups are captured (chunking, compression,
//! parallelism, checkpoint naming), how restores are verified and how
//! progress is displayed.

use super::{CompressionMethod, ExtentSourceKind, StreamType};
use serde::{Deserialize, Serialize};

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// Backup capture settings
    #[serde(default)]
    pub backup: BackupConfig,

    /// Restore settings
    #[serde(default)]
    pub restore: RestoreConfig,

    /// Display and output settings
    #[serde(default)]
    pub display: DisplayConfig,
}

/// Backup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackupConfig {
    /// Largest single read issued against the transport, in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Upper bound on concurrent disk workers (0 = one per disk)
    #[serde(default)]
    pub worker_cap: usize,

    /// Block compression, if any
    #[serde(default)]
    pub compression: Option<CompressionMethod>,

    /// Prefix for checkpoint names, generations are appended as `.N`
    #[serde(default = "default_checkpoint_prefix")]
    pub checkpoint_prefix: String,

    /// Where extent information comes from
    #[serde(default)]
    pub extent_source: ExtentSourceKind,

    /// Block size used when scanning a disk for zeroed regions
    #[serde(default = "default_zero_scan_block_size")]
    pub zero_scan_block_size: u64,

    /// Output file type
    #[serde(default)]
    pub stream_type: StreamType,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            worker_cap: 0,
            compression: None,
            checkpoint_prefix: default_checkpoint_prefix(),
            extent_source: ExtentSourceKind::default(),
            zero_scan_block_size: default_zero_scan_block_size(),
            stream_type: StreamType::default(),
        }
    }
}

fn default_chunk_size() -> u64 {
    32 * 1024 * 1024 // NBD maximum request size
}
fn default_checkpoint_prefix() -> String {
    "virtback".to_string()
}
fn default_zero_scan_block_size() -> u64 {
    64 * 1024
}

/// Restore configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RestoreConfig {
    /// Verify `.chksum` sidecars before replaying a file
    #[serde(default = "default_verify_checksums")]
    pub verify_checksums: bool,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            verify_checksums: default_verify_checksums(),
        }
    }
}

fn default_verify_checksums() -> bool {
    true
}

/// Display and output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DisplayConfig {
    /// Show progress bars
    #[serde(default = "default_progress")]
    pub progress: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            progress: default_progress(),
        }
    }
}

fn default_progress() -> bool {
    true
}
