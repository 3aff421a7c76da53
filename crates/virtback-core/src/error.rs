//! Error types for virtback-core

use thiserror::Error;

/// Result type alias using virtback-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for virtback
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration or option combination
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame header or terminator failed to parse or verify
    #[error("Stream format error at byte {position}: {message}")]
    StreamFormat { position: u64, message: String },

    /// Stream is flagged as compressed but the trailer is absent or short
    #[error("Compression trailer missing or incomplete: {message}")]
    CompressionTrailerMissing { message: String },

    /// Block compression or decompression failed
    #[error("Compression error: {message}")]
    Compression { message: String },

    /// Backup chain integrity violation
    #[error("Checkpoint chain error: {0}")]
    CheckpointChain(#[from] ChainError),

    /// A previous backup left `.partial` output behind
    #[error("Partial backup detected: {path}. A new full backup is required")]
    PartialBackupDetected { path: String },

    /// Full or copy backup into a directory that already holds backup data
    #[error("Output directory is not empty: {path}")]
    OutputNotEmpty { path: String },

    /// The change-tracking collaborator returned unusable ranges
    #[error("Invalid extent list for disk {disk}: {message}")]
    InvalidExtents { disk: String, message: String },

    /// One disk worker failed
    #[error("Backup of disk {disk} failed: {message}")]
    DiskBackupFailed { disk: String, message: String },

    /// Aggregated job failure
    #[error("Backup job failed: {} of {total} disks failed ({})", .disks.len(), .disks.join(", "))]
    JobFailed { total: usize, disks: Vec<String> },

    /// Applied byte count differs from the declared data size
    #[error("Restore size mismatch in {file}: declared {expected} bytes, applied {actual}")]
    RestoreSizeMismatch {
        file: String,
        expected: u64,
        actual: u64,
    },

    /// Transport level failure reported by a collaborator
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The operation was interrupted
    #[error("Operation cancelled")]
    Cancelled,
}

/// Checkpoint chain violations. All of them are raised before any backup data is written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Hypervisor reports a checkpoint the chain does not track
    #[error("checkpoint {name} exists on the hypervisor but is not part of the backup chain")]
    ForeignCheckpoint { name: String },

    /// Last recorded checkpoint no longer exists on the hypervisor
    #[error("parent checkpoint {name} is missing on the hypervisor")]
    MissingParent { name: String },

    /// Incremental or differential backup without a prior full backup
    #[error("no checkpoints found, execute a full backup first")]
    NoCheckpointsFound,

    /// The persisted record is not a contiguous generation sequence
    #[error("checkpoint record is not contiguous: expected {expected}, found {found}")]
    Gap { expected: String, found: String },
}

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a stream format error at the given byte position
    pub fn stream_format(position: u64, message: impl Into<String>) -> Self {
        Self::StreamFormat {
            position,
            message: message.into(),
        }
    }

    /// Create a missing trailer error
    pub fn trailer_missing(message: impl Into<String>) -> Self {
        Self::CompressionTrailerMissing {
            message: message.into(),
        }
    }

    /// Create a compression error
    pub fn compression(message: impl Into<String>) -> Self {
        Self::Compression {
            message: message.into(),
        }
    }

    /// Create an invalid extents error
    pub fn invalid_extents(disk: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidExtents {
            disk: disk.into(),
            message: message.into(),
        }
    }

    /// Create a per-disk failure
    pub fn disk_backup_failed(disk: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DiskBackupFailed {
            disk: disk.into(),
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a partial backup error
    pub fn partial_backup(path: impl Into<String>) -> Self {
        Self::PartialBackupDetected { path: path.into() }
    }

    /// Whether this error is the cancellation signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
