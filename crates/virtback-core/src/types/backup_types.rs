//! Backup domain types shared across crates

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backup level requested for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupLevel {
    /// Complete capture that starts a new checkpoint chain
    Full,
    /// Changes since the last checkpoint, advances the chain
    Inc,
    /// Changes since the last checkpoint, does not advance the chain
    Diff,
    /// Complete capture without any checkpoint
    Copy,
}

impl BackupLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupLevel::Full => "full",
            BackupLevel::Inc => "inc",
            BackupLevel::Diff => "diff",
            BackupLevel::Copy => "copy",
        }
    }

    /// Inc and diff capture only changed ranges.
    pub fn is_incremental(&self) -> bool {
        matches!(self, BackupLevel::Inc | BackupLevel::Diff)
    }

    /// ZERO frames are only meaningful for complete captures. Emitting them in a
    /// delta would mark unwritten regions as realized data in the target.
    pub fn emits_zero_frames(&self) -> bool {
        matches!(self, BackupLevel::Full | BackupLevel::Copy)
    }

    /// Whether the level participates in the checkpoint chain.
    pub fn uses_checkpoint(&self) -> bool {
        !matches!(self, BackupLevel::Copy)
    }
}

impl fmt::Display for BackupLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full" => Ok(BackupLevel::Full),
            "inc" | "incremental" => Ok(BackupLevel::Inc),
            "diff" | "differential" => Ok(BackupLevel::Diff),
            "copy" => Ok(BackupLevel::Copy),
            other => Err(Error::invalid_config(format!(
                "Unknown backup level: {}. Valid levels: full, inc, diff, copy",
                other
            ))),
        }
    }
}

/// Output file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    /// Sparse stream container
    #[default]
    Stream,
    /// Plain preallocated image, holes left unwritten
    Raw,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Stream => "stream",
            StreamType::Raw => "raw",
        }
    }

    /// File extension used for finished outputs.
    pub fn extension(&self) -> &'static str {
        match self {
            StreamType::Stream => "data",
            StreamType::Raw => "raw",
        }
    }
}

impl FromStr for StreamType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "stream" => Ok(StreamType::Stream),
            "raw" => Ok(StreamType::Raw),
            other => Err(Error::invalid_config(format!(
                "Unknown stream type: {}. Valid types: stream, raw",
                other
            ))),
        }
    }
}

/// Per-block compression method recorded in stream metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    Lz4,
    Zlib,
}

impl CompressionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::Lz4 => "lz4",
            CompressionMethod::Zlib => "zlib",
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lz4" => Ok(CompressionMethod::Lz4),
            "zlib" => Ok(CompressionMethod::Zlib),
            other => Err(Error::invalid_config(format!(
                "Unknown compression method: {}. Valid methods: lz4, zlib",
                other
            ))),
        }
    }
}

/// Which extent source implementation a job uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtentSourceKind {
    /// Read the disk and classify zeroed blocks as holes
    #[default]
    ZeroScan,
    /// Ask `qemu-img map` for allocation information
    QemuImg,
    /// Load change lists produced by the hypervisor's dirty bitmap
    ChangeList,
}

impl FromStr for ExtentSourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "zero-scan" => Ok(ExtentSourceKind::ZeroScan),
            "qemu-img" => Ok(ExtentSourceKind::QemuImg),
            "change-list" => Ok(ExtentSourceKind::ChangeList),
            other => Err(Error::invalid_config(format!(
                "Unknown extent source: {}. Valid sources: zero-scan, qemu-img, change-list",
                other
            ))),
        }
    }
}

/// A contiguous byte range of a disk, either data or an unallocated hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub offset: u64,
    pub length: u64,
    pub data: bool,
}

impl Extent {
    pub fn data(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            data: true,
        }
    }

    pub fn hole(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            data: false,
        }
    }

    /// First byte past the extent.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// One disk attached to the domain being backed up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpec {
    /// Target device name, e.g. `sda` or `vdb`
    pub name: String,

    /// Image format reported by the hypervisor (`raw`, `qcow2`)
    pub format: String,

    /// Locator the transport factory understands (a path for local images)
    pub source: String,
}

impl DiskSpec {
    pub fn new(
        name: impl Into<String>,
        format: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            format: format.into(),
            source: source.into(),
        }
    }
}
