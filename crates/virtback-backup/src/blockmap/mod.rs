//! Block mapping over a backup chain.
//!
//! A [`BlockMap`] answers "where do the bytes at device offset X live?" for a
//! full (or copy) backup plus any number of incrementals, without restoring
//! anything. Entries tile `[0, virtual size)`; later files supersede earlier
//! ones and ranges no file covers read as zeroes.

mod export;
mod replay;

pub use export::{ExportHandle, ExportSession, LiveMapping};
pub use replay::{replay, ReplaySummary};

use crate::restore::ChainFile;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use virtback_core::{Error, Result};
use virtback_stream::{FrameKind, StreamReader};

/// One contiguous device range and where its bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMapEntry {
    pub device_offset: u64,
    /// Stream file holding the payload; `None` reads as zeroes
    pub source_file: Option<Utf8PathBuf>,
    /// Byte offset of the payload inside `source_file`
    pub source_file_offset: u64,
    pub length: u64,
    /// Entry comes from an inc/diff file and overrides the base
    pub incremental_override: bool,
    pub next_device_offset: u64,
    /// Position of the source file in the chain (0 for the base)
    #[serde(default)]
    pub generation: usize,
}

impl BlockMapEntry {
    pub fn is_zero(&self) -> bool {
        self.source_file.is_none()
    }

    fn contains(&self, offset: u64) -> bool {
        offset >= self.device_offset && offset < self.next_device_offset
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Source {
    file: Utf8PathBuf,
    file_offset: u64,
    generation: usize,
    incremental: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    length: u64,
    source: Option<Source>,
}

/// Interval map from device offset to segment, always tiling the device.
#[derive(Debug, Default)]
struct Overlay {
    segments: BTreeMap<u64, Segment>,
}

impl Overlay {
    fn new(virtual_size: u64) -> Self {
        let mut segments = BTreeMap::new();
        if virtual_size > 0 {
            segments.insert(
                0,
                Segment {
                    length: virtual_size,
                    source: None,
                },
            );
        }
        Self { segments }
    }

    /// Split the segment containing `at` so that a segment starts at `at`.
    fn split_at(&mut self, at: u64) {
        let Some((&start, segment)) = self.segments.range(..at).next_back() else {
            return;
        };
        let end = start + segment.length;
        if at >= end {
            return;
        }

        let head = at - start;
        let tail = Segment {
            length: end - at,
            source: segment.source.clone().map(|mut source| {
                source.file_offset += head;
                source
            }),
        };
        if let Some(segment) = self.segments.get_mut(&start) {
            segment.length = head;
        }
        self.segments.insert(at, tail);
    }

    /// Replace `[start, start + length)` with `source`.
    fn insert(&mut self, start: u64, length: u64, source: Option<Source>) {
        if length == 0 {
            return;
        }
        let end = start + length;
        self.split_at(start);
        self.split_at(end);

        let covered: Vec<u64> = self.segments.range(start..end).map(|(k, _)| *k).collect();
        for key in covered {
            self.segments.remove(&key);
        }
        self.segments.insert(start, Segment { length, source });
    }

    fn into_entries(self) -> Vec<BlockMapEntry> {
        self.segments
            .into_iter()
            .map(|(offset, segment)| {
                let (source_file, source_file_offset, incremental_override, generation) =
                    match segment.source {
                        Some(s) => (Some(s.file), s.file_offset, s.incremental, s.generation),
                        None => (None, 0, false, 0),
                    };
                BlockMapEntry {
                    device_offset: offset,
                    source_file,
                    source_file_offset,
                    length: segment.length,
                    incremental_override,
                    next_device_offset: offset + segment.length,
                    generation,
                }
            })
            .collect()
    }
}

/// Ordered, exhaustive block map for one disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockMap {
    entries: Vec<BlockMapEntry>,
}

impl BlockMap {
    /// Build the map by scanning the frames of an ordered chain.
    pub fn build(chain: &[ChainFile]) -> Result<Self> {
        let base = chain
            .first()
            .ok_or_else(|| Error::invalid_config("cannot map an empty backup chain"))?;
        let virtual_size = base.metadata.virtual_size;
        let mut overlay = Overlay::new(virtual_size);

        for (generation, file) in chain.iter().enumerate() {
            if file.metadata.is_compressed() {
                return Err(Error::invalid_config(format!(
                    "{} is compressed and cannot be mapped",
                    file.path
                )));
            }
            if file.metadata.virtual_size != virtual_size {
                return Err(Error::invalid_config(format!(
                    "{} has virtual size {}, expected {}",
                    file.path, file.metadata.virtual_size, virtual_size
                )));
            }

            let mut reader = StreamReader::open(BufReader::new(File::open(&file.path)?))?;
            let mut mapped = 0u64;
            while let Some(frame) = reader.next_frame()? {
                match frame.kind {
                    FrameKind::Data => {
                        let payload = reader.skip_data()?;
                        overlay.insert(
                            frame.start,
                            frame.length,
                            Some(Source {
                                file: file.path.clone(),
                                file_offset: payload,
                                generation,
                                incremental: file.metadata.incremental,
                            }),
                        );
                        mapped += frame.length;
                    }
                    FrameKind::Zero => overlay.insert(frame.start, frame.length, None),
                    _ => {}
                }
            }

            if mapped != file.metadata.data_size {
                return Err(Error::RestoreSizeMismatch {
                    file: file.path.to_string(),
                    expected: file.metadata.data_size,
                    actual: mapped,
                });
            }
            tracing::debug!("Mapped {} bytes from {}", mapped, file.path);
        }

        Ok(Self {
            entries: overlay.into_entries(),
        })
    }

    pub fn entries(&self) -> &[BlockMapEntry] {
        &self.entries
    }

    pub fn virtual_size(&self) -> u64 {
        self.entries.last().map(|e| e.next_device_offset).unwrap_or(0)
    }

    /// Entries that override the base image.
    pub fn overrides(&self) -> impl Iterator<Item = &BlockMapEntry> {
        self.entries.iter().filter(|e| e.incremental_override)
    }

    pub fn has_overrides(&self) -> bool {
        self.overrides().next().is_some()
    }

    /// Entry covering device `offset`.
    pub fn lookup(&self, offset: u64) -> Option<&BlockMapEntry> {
        let index = self
            .entries
            .partition_point(|entry| entry.next_device_offset <= offset);
        self.entries.get(index).filter(|entry| entry.contains(offset))
    }

    /// Write the entries as a JSON list (atomic rename).
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        let temp_path = Utf8PathBuf::from(format!("{}.tmp", path));
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Load and check a map written by [`save`](BlockMap::save).
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let entries: Vec<BlockMapEntry> = serde_json::from_str(&content)?;
        let map = Self { entries };
        map.check_coverage()?;
        Ok(map)
    }

    fn check_coverage(&self) -> Result<()> {
        let mut cursor = 0;
        for entry in &self.entries {
            if entry.device_offset != cursor
                || entry.length == 0
                || entry.next_device_offset != entry.device_offset + entry.length
            {
                return Err(Error::invalid_config(format!(
                    "block map entry at {} does not continue from {}",
                    entry.device_offset, cursor
                )));
            }
            cursor = entry.next_device_offset;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(file: &str, file_offset: u64, generation: usize) -> Option<Source> {
        Some(Source {
            file: file.into(),
            file_offset,
            generation,
            incremental: generation > 0,
        })
    }

    #[test]
    fn test_overlay_splits_and_supersedes() {
        let mut overlay = Overlay::new(100);
        overlay.insert(0, 60, source("full", 1000, 0));
        overlay.insert(20, 10, source("inc1", 500, 1));

        let entries = overlay.into_entries();
        let ranges: Vec<(u64, u64, Option<&str>, u64)> = entries
            .iter()
            .map(|e| {
                (
                    e.device_offset,
                    e.length,
                    e.source_file.as_ref().map(|p| p.as_str()),
                    e.source_file_offset,
                )
            })
            .collect();

        assert_eq!(
            ranges,
            vec![
                (0, 20, Some("full"), 1000),
                (20, 10, Some("inc1"), 500),
                (30, 30, Some("full"), 1030),
                (60, 40, None, 0),
            ]
        );
        assert!(entries[1].incremental_override);
        assert!(!entries[0].incremental_override);
    }

    #[test]
    fn test_overlay_spanning_insert() {
        let mut overlay = Overlay::new(100);
        overlay.insert(0, 30, source("full", 0, 0));
        overlay.insert(50, 30, source("full", 30, 0));
        overlay.insert(20, 40, source("inc1", 7, 1));

        let entries = overlay.into_entries();
        let offsets: Vec<u64> = entries.iter().map(|e| e.device_offset).collect();
        assert_eq!(offsets, vec![0, 20, 60, 80]);
        assert_eq!(entries[2].source_file_offset, 40);
        assert_eq!(entries.last().unwrap().next_device_offset, 100);
    }

    #[test]
    fn test_overlay_ignores_empty_insert() {
        let mut overlay = Overlay::new(100);
        overlay.insert(0, 60, source("full", 0, 0));
        overlay.insert(0, 0, source("inc1", 9, 1));

        let entries = overlay.into_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].length, 60);
        assert_eq!(entries[0].source_file.as_ref().map(|p| p.as_str()), Some("full"));
    }

    #[test]
    fn test_lookup() {
        let mut overlay = Overlay::new(100);
        overlay.insert(10, 10, source("full", 0, 0));
        let map = BlockMap {
            entries: overlay.into_entries(),
        };

        assert!(map.lookup(5).unwrap().is_zero());
        assert_eq!(map.lookup(10).unwrap().device_offset, 10);
        assert_eq!(map.lookup(19).unwrap().device_offset, 10);
        assert_eq!(map.lookup(20).unwrap().device_offset, 20);
        assert!(map.lookup(100).is_none());
        assert_eq!(map.virtual_size(), 100);
    }

    #[test]
    fn test_load_rejects_gaps() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("map.json")).unwrap();

        let mut overlay = Overlay::new(64);
        overlay.insert(0, 16, source("full", 0, 0));
        let map = BlockMap {
            entries: overlay.into_entries(),
        };
        map.save(&path).unwrap();
        assert_eq!(BlockMap::load(&path).unwrap(), map);

        let mut broken = map.entries.clone();
        broken.remove(0);
        fs::write(&path, serde_json::to_string(&broken).unwrap()).unwrap();
        assert!(BlockMap::load(&path).is_err());
    }
}
