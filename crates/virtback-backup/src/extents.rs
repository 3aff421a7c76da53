//! Extent planning and extent sources.
//!
//! An [`ExtentSource`] reports which ranges of a disk hold data (or changed
//! since a checkpoint). [`plan_extents`] checks that the ranges tile the disk
//! exactly and computes the thin backup size. Malformed ranges are rejected,
//! never repaired.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::fs;
use virtback_core::{
    DiskSpec, Error, Extent, ExtentSource, ExtentSourceKind, Result, RuntimeConfig, Transport,
};

/// Validated extent list for one disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtentPlan {
    pub extents: Vec<Extent>,
    pub virtual_size: u64,
    /// Sum of all data extent lengths
    pub thin_backup_size: u64,
}

impl ExtentPlan {
    pub fn data_extents(&self) -> impl Iterator<Item = &Extent> {
        self.extents.iter().filter(|e| e.data)
    }

    pub fn data_count(&self) -> usize {
        self.data_extents().count()
    }
}

/// Validate `ranges` against `virtual_size` and build the plan.
pub fn plan_extents(disk: &str, ranges: Vec<Extent>, virtual_size: u64) -> Result<ExtentPlan> {
    let mut cursor = 0u64;
    let mut thin_backup_size = 0u64;

    for (index, extent) in ranges.iter().enumerate() {
        if extent.length == 0 {
            return Err(Error::invalid_extents(
                disk,
                format!("range {} at offset {} has zero length", index, extent.offset),
            ));
        }
        if extent.offset < cursor {
            return Err(Error::invalid_extents(
                disk,
                format!(
                    "range {} at offset {} overlaps or precedes the previous range ending at {}",
                    index, extent.offset, cursor
                ),
            ));
        }
        if extent.offset > cursor {
            return Err(Error::invalid_extents(
                disk,
                format!(
                    "gap between {} and {} before range {}",
                    cursor, extent.offset, index
                ),
            ));
        }
        let end = extent.offset.checked_add(extent.length).ok_or_else(|| {
            Error::invalid_extents(disk, format!("range {} overflows", index))
        })?;
        if end > virtual_size {
            return Err(Error::invalid_extents(
                disk,
                format!(
                    "range {} ends at {} beyond virtual size {}",
                    index, end, virtual_size
                ),
            ));
        }

        if extent.data {
            thin_backup_size += extent.length;
        }
        cursor = end;
    }

    if cursor != virtual_size {
        return Err(Error::invalid_extents(
            disk,
            format!(
                "ranges cover {} bytes of a {} byte disk",
                cursor, virtual_size
            ),
        ));
    }

    tracing::debug!(
        "Disk {}: {} extents, {} bytes of data",
        disk,
        ranges.len(),
        thin_backup_size
    );

    Ok(ExtentPlan {
        extents: ranges,
        virtual_size,
        thin_backup_size,
    })
}

/// Append `extent`, merging it into the previous one when contiguous and of
/// the same kind.
fn push_merged(extents: &mut Vec<Extent>, extent: Extent) {
    if let Some(last) = extents.last_mut() {
        if last.data == extent.data && last.end() == extent.offset {
            last.length += extent.length;
            return;
        }
    }
    extents.push(extent);
}

/// Classifies blocks by reading them: all-zero blocks become holes.
///
/// Works with any transport but can only report allocation, not changes
/// since a checkpoint.
#[derive(Debug, Clone)]
pub struct ZeroScanSource {
    block_size: u64,
}

impl ZeroScanSource {
    pub fn new(block_size: u64) -> Self {
        Self {
            block_size: block_size.max(512),
        }
    }
}

impl ExtentSource for ZeroScanSource {
    fn name(&self) -> &'static str {
        "zero-scan"
    }

    fn query_ranges(
        &self,
        disk: &DiskSpec,
        transport: &mut dyn Transport,
        bitmap: Option<&str>,
    ) -> Result<Vec<Extent>> {
        if let Some(bitmap) = bitmap {
            return Err(Error::invalid_config(format!(
                "zero-scan cannot report changes since checkpoint {} for disk {}; use the change-list source",
                bitmap, disk.name
            )));
        }

        let size = transport.size()?;
        let block = self.block_size.min(transport.max_request_size().max(1));
        let mut extents = Vec::new();
        let mut offset = 0u64;

        while offset < size {
            let length = block.min(size - offset);
            let buf = transport.read_at(offset, length)?;
            let data = buf.iter().any(|b| *b != 0);
            push_merged(&mut extents, Extent { offset, length, data });
            offset += length;
        }

        Ok(extents)
    }
}

/// One entry of `qemu-img map --output=json`.
#[derive(Debug, Deserialize)]
struct QemuMapEntry {
    start: u64,
    length: u64,
    #[serde(default)]
    data: bool,
    #[serde(default)]
    zero: bool,
}

/// Allocation map from `qemu-img map`, run live or loaded from a saved file.
#[derive(Debug, Clone, Default)]
pub struct QemuImgMapSource {
    map_file: Option<Utf8PathBuf>,
}

impl QemuImgMapSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a previously saved `qemu-img map --output=json` document.
    pub fn from_file(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            map_file: Some(path.into()),
        }
    }

    fn run_qemu_img(&self, source: &str) -> Result<String> {
        let qemu_img = which::which("qemu-img")
            .map_err(|_| Error::invalid_config("qemu-img not found in PATH"))?;

        tracing::debug!("Running {} map --output=json {}", qemu_img.display(), source);
        duct::cmd(qemu_img, ["map", "--output=json", source])
            .stderr_capture()
            .read()
            .map_err(|e| Error::transport(format!("qemu-img map failed for {}: {}", source, e)))
    }

    /// Translate a JSON map into merged extents.
    pub fn parse_map(json: &str) -> Result<Vec<Extent>> {
        let entries: Vec<QemuMapEntry> = serde_json::from_str(json)?;
        let mut extents = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.length == 0 {
                continue;
            }
            push_merged(
                &mut extents,
                Extent {
                    offset: entry.start,
                    length: entry.length,
                    data: entry.data && !entry.zero,
                },
            );
        }
        Ok(extents)
    }
}

impl ExtentSource for QemuImgMapSource {
    fn name(&self) -> &'static str {
        "qemu-img"
    }

    fn query_ranges(
        &self,
        disk: &DiskSpec,
        _transport: &mut dyn Transport,
        bitmap: Option<&str>,
    ) -> Result<Vec<Extent>> {
        if let Some(bitmap) = bitmap {
            return Err(Error::invalid_config(format!(
                "qemu-img map cannot report changes since checkpoint {} for disk {}; use the change-list source",
                bitmap, disk.name
            )));
        }

        let json = match &self.map_file {
            Some(path) => fs::read_to_string(path)?,
            None => self.run_qemu_img(&disk.source)?,
        };
        Self::parse_map(&json)
    }
}

/// Change list document as dumped from a dirty bitmap.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChangeListFile {
    Tagged {
        checkpoint: Option<String>,
        extents: Vec<Extent>,
    },
    Plain(Vec<Extent>),
}

/// Loads `<dir>/<disk>.json` change lists.
///
/// A file may name the checkpoint it was dumped against; a mismatch with the
/// requested bitmap is rejected.
#[derive(Debug, Clone)]
pub struct ChangeListSource {
    dir: Utf8PathBuf,
}

impl ChangeListSource {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn list_path(&self, disk: &str) -> Utf8PathBuf {
        self.dir.join(format!("{}.json", disk))
    }

    fn load(&self, path: &Utf8Path) -> Result<ChangeListFile> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to read change list {}: {}", path, e),
            ))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl ExtentSource for ChangeListSource {
    fn name(&self) -> &'static str {
        "change-list"
    }

    fn supports_changes(&self) -> bool {
        true
    }

    fn query_ranges(
        &self,
        disk: &DiskSpec,
        _transport: &mut dyn Transport,
        bitmap: Option<&str>,
    ) -> Result<Vec<Extent>> {
        let path = self.list_path(&disk.name);
        match self.load(&path)? {
            ChangeListFile::Plain(extents) => Ok(extents),
            ChangeListFile::Tagged {
                checkpoint,
                extents,
            } => {
                if checkpoint.as_deref() != bitmap {
                    return Err(Error::invalid_extents(
                        &disk.name,
                        format!(
                            "{} was dumped for checkpoint {:?}, requested {:?}",
                            path, checkpoint, bitmap
                        ),
                    ));
                }
                Ok(extents)
            }
        }
    }
}

/// Build the extent source selected in the configuration.
pub fn source_from_config(
    config: &RuntimeConfig,
    change_list_dir: Option<&Utf8Path>,
) -> Result<Box<dyn ExtentSource>> {
    match config.backup.extent_source {
        ExtentSourceKind::ZeroScan => Ok(Box::new(ZeroScanSource::new(
            config.backup.zero_scan_block_size,
        ))),
        ExtentSourceKind::QemuImg => Ok(Box::new(QemuImgMapSource::new())),
        ExtentSourceKind::ChangeList => {
            let dir = change_list_dir.ok_or_else(|| {
                Error::invalid_config("the change-list source needs a change list directory")
            })?;
            Ok(Box::new(ChangeListSource::new(dir)))
        }
    }
}
