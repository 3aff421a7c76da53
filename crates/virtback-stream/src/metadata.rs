//! Stream metadata record
//!
//! Written once as JSON right after the META frame. Restore, the block
//! mapper and `info` rely on it to identify a file without scanning frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use virtback_core::{BackupLevel, CompressionMethod, DiskSpec, Error, Result};

/// Version of the stream container format.
pub const STREAM_VERSION: u32 = 2;

/// Metadata describing one stream file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    /// Container format version
    pub stream_version: u32,

    /// Disk target name (`sda`, `vdb`)
    pub disk_name: String,

    /// Image format of the source disk
    pub disk_format: String,

    /// Virtual size of the disk in bytes
    pub virtual_size: u64,

    /// Sum of all DATA extent lengths (uncompressed)
    pub data_size: u64,

    /// Backup level that produced the file
    pub level: BackupLevel,

    /// True for inc and diff levels
    pub incremental: bool,

    /// Checkpoint created for this backup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_name: Option<String>,

    /// Checkpoint the captured changes are relative to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_checkpoint: Option<String>,

    /// Block compression used for DATA payloads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_method: Option<CompressionMethod>,

    /// When the backup was taken
    pub date: DateTime<Utc>,
}

impl StreamMetadata {
    pub fn new(disk: &DiskSpec, level: BackupLevel, virtual_size: u64, data_size: u64) -> Self {
        Self {
            stream_version: STREAM_VERSION,
            disk_name: disk.name.clone(),
            disk_format: disk.format.clone(),
            virtual_size,
            data_size,
            level,
            incremental: level.is_incremental(),
            checkpoint_name: None,
            parent_checkpoint: None,
            compression_method: None,
            date: Utc::now(),
        }
    }

    pub fn with_checkpoint(mut self, name: Option<String>, parent: Option<String>) -> Self {
        self.checkpoint_name = name;
        self.parent_checkpoint = parent;
        self
    }

    pub fn with_compression(mut self, method: Option<CompressionMethod>) -> Self {
        self.compression_method = method;
        self
    }

    /// Checkpoint this file ends at, if its backup created one.
    ///
    /// Diff files carry the name of the next generation for ordering, but
    /// the checkpoint itself is only created by the inc that follows.
    pub fn created_checkpoint(&self) -> Option<&str> {
        match self.level {
            BackupLevel::Diff => None,
            _ => self.checkpoint_name.as_deref(),
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compression_method.is_some()
    }

    /// Validates that this metadata can be read by this build.
    pub fn validate(&self) -> Result<()> {
        if self.stream_version != STREAM_VERSION {
            return Err(Error::stream_format(
                0,
                format!(
                    "unsupported stream version {} (expected {})",
                    self.stream_version, STREAM_VERSION
                ),
            ));
        }
        if self.data_size > self.virtual_size {
            return Err(Error::stream_format(
                0,
                format!(
                    "declared data size {} exceeds virtual size {}",
                    self.data_size, self.virtual_size
                ),
            ));
        }
        Ok(())
    }
}

/// Serialize metadata to its on-disk JSON form.
pub fn dump_metadata(metadata: &StreamMetadata) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(metadata)?)
}

/// Parse and validate metadata bytes.
pub fn load_metadata(bytes: &[u8]) -> Result<StreamMetadata> {
    let metadata: StreamMetadata = serde_json::from_slice(bytes)
        .map_err(|e| Error::stream_format(0, format!("invalid stream metadata: {}", e)))?;
    metadata.validate()?;
    Ok(metadata)
}
