//! Per-disk backup engine.
//!
//! Turns an [`ExtentPlan`] into either a sparse stream file or a raw image.
//! Output is written under a `.partial` name and renamed once complete, so a
//! crashed or cancelled disk never leaves a file that looks finished.

use crate::cancel::CancelToken;
use crate::chain::CheckpointPlan;
use crate::extents::ExtentPlan;
use crate::progress::DiskProgress;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use virtback_core::{
    BackupLevel, CompressionMethod, DiskSpec, Error, Result, StreamType, Transport,
};
use virtback_stream::{StreamMetadata, StreamWriter};

/// Suffix of files that are still being written.
pub const PARTIAL_SUFFIX: &str = "partial";

/// Largest accepted chunk size. Extents below the chunk size are held in
/// memory and compressed as one block.
pub const MAX_CHUNK_SIZE: u64 = 1 << 30;

/// Options shared by every disk of a job.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub level: BackupLevel,
    pub stream_type: StreamType,
    /// Data extents of at least this size are written as chunked frames
    pub chunk_size: u64,
    pub compression: Option<CompressionMethod>,
}

impl EngineOptions {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::invalid_config("chunk size must be greater than zero"));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::invalid_config(format!(
                "chunk size {} exceeds the maximum of {}",
                self.chunk_size, MAX_CHUNK_SIZE
            )));
        }
        if self.stream_type == StreamType::Raw {
            if self.level.is_incremental() {
                return Err(Error::invalid_config(format!(
                    "raw output is only supported for full and copy backups, not {}",
                    self.level
                )));
            }
            if self.compression.is_some() {
                return Err(Error::invalid_config("raw output cannot be compressed"));
            }
        }
        Ok(())
    }
}

/// Result of backing up one disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskBackupResult {
    pub disk: String,
    pub path: Utf8PathBuf,
    pub virtual_size: u64,
    pub data_bytes: u64,
    pub written_bytes: u64,
    pub data_frames: u64,
    pub zero_frames: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Final file name for a disk's backup.
///
/// Stream files are `<disk>.<level>.data` for full/copy,
/// `<disk>.inc.<checkpoint>.data` and `<disk>.diff.<checkpoint>.<timestamp>.data`.
/// Raw images are `<disk>.<level>.raw`.
pub fn target_file_name(
    disk: &str,
    options: &EngineOptions,
    checkpoint: Option<&CheckpointPlan>,
    timestamp: &str,
) -> Result<String> {
    let ext = options.stream_type.extension();
    let name = match options.level {
        BackupLevel::Full | BackupLevel::Copy => {
            format!("{}.{}.{}", disk, options.level, ext)
        }
        BackupLevel::Inc | BackupLevel::Diff => {
            let checkpoint = checkpoint.ok_or_else(|| {
                Error::invalid_config(format!("{} backup needs a checkpoint", options.level))
            })?;
            if options.level == BackupLevel::Inc {
                format!("{}.inc.{}.{}", disk, checkpoint.name, ext)
            } else {
                format!("{}.diff.{}.{}.{}", disk, checkpoint.name, timestamp, ext)
            }
        }
    };
    Ok(name)
}

pub fn partial_path(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{}.{}", path, PARTIAL_SUFFIX))
}

/// Writes one disk's backup file.
#[derive(Debug, Clone)]
pub struct BackupEngine {
    options: EngineOptions,
}

impl BackupEngine {
    pub fn new(options: EngineOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Capture `disk` into `target`.
    ///
    /// On error the `.partial` file is left in place.
    #[allow(clippy::too_many_arguments)]
    pub fn backup_disk(
        &self,
        disk: &DiskSpec,
        transport: &mut dyn Transport,
        plan: &ExtentPlan,
        checkpoint: Option<&CheckpointPlan>,
        target: &Utf8Path,
        cancel: &CancelToken,
        progress: &DiskProgress,
    ) -> Result<DiskBackupResult> {
        let partial = partial_path(target);
        tracing::info!(
            "Backing up disk {} ({} level, {} of {} bytes) to {}",
            disk.name,
            self.options.level,
            plan.thin_backup_size,
            plan.virtual_size,
            target
        );

        let mut result = match self.options.stream_type {
            StreamType::Stream => {
                self.write_stream(disk, transport, plan, checkpoint, &partial, cancel, progress)?
            }
            StreamType::Raw => self.write_raw(disk, transport, plan, &partial, cancel, progress)?,
        };

        fs::rename(&partial, target)?;
        result.path = target.to_path_buf();

        if plan.thin_backup_size == 0 && !self.options.level.is_incremental() {
            result
                .warnings
                .push(format!("disk {} contains no allocated data", disk.name));
        }

        tracing::debug!(
            "Disk {}: {} data frames, {} zero frames, {} bytes written",
            disk.name,
            result.data_frames,
            result.zero_frames,
            result.written_bytes
        );
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_stream(
        &self,
        disk: &DiskSpec,
        transport: &mut dyn Transport,
        plan: &ExtentPlan,
        checkpoint: Option<&CheckpointPlan>,
        partial: &Utf8Path,
        cancel: &CancelToken,
        progress: &DiskProgress,
    ) -> Result<DiskBackupResult> {
        let file = File::create(partial)?;
        let mut writer = StreamWriter::new(BufWriter::new(file), self.options.compression);

        let metadata =
            StreamMetadata::new(disk, self.options.level, plan.virtual_size, plan.thin_backup_size)
                .with_checkpoint(
                    checkpoint.map(|c| c.name.clone()),
                    checkpoint.and_then(|c| c.parent.clone()),
                )
                .with_compression(self.options.compression);
        writer.write_metadata(&metadata)?;

        let chunk_size = self.options.chunk_size;
        for extent in &plan.extents {
            cancel.check()?;

            if !extent.data {
                if self.options.level.emits_zero_frames() {
                    writer.write_zero(extent.offset, extent.length)?;
                }
                continue;
            }

            if extent.length >= chunk_size {
                let mut frame = writer.begin_data(extent.offset, extent.length, true)?;
                let mut offset = extent.offset;
                while offset < extent.end() {
                    cancel.check()?;
                    let length = chunk_size.min(extent.end() - offset);
                    let data = read_range(transport, offset, length)?;
                    frame.write_chunk(&data)?;
                    progress.inc(length);
                    offset += length;
                }
                frame.finish()?;
            } else {
                let data = read_range(transport, extent.offset, extent.length)?;
                writer.write_data(extent.offset, &data)?;
                progress.inc(extent.length);
            }
        }

        let (buffered, summary) = writer.finish()?;
        let file = buffered
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;

        Ok(DiskBackupResult {
            disk: disk.name.clone(),
            path: partial.to_path_buf(),
            virtual_size: plan.virtual_size,
            data_bytes: summary.data_bytes,
            written_bytes: summary.written_bytes,
            data_frames: summary.data_frames,
            zero_frames: summary.zero_frames,
            warnings: Vec::new(),
        })
    }

    fn write_raw(
        &self,
        disk: &DiskSpec,
        transport: &mut dyn Transport,
        plan: &ExtentPlan,
        partial: &Utf8Path,
        cancel: &CancelToken,
        progress: &DiskProgress,
    ) -> Result<DiskBackupResult> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(partial)?;
        file.set_len(plan.virtual_size)?;

        let chunk_size = self.options.chunk_size;
        let mut data_frames = 0;
        for extent in plan.data_extents() {
            let mut offset = extent.offset;
            while offset < extent.end() {
                cancel.check()?;
                let length = chunk_size.min(extent.end() - offset);
                let data = read_range(transport, offset, length)?;
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(&data)?;
                progress.inc(length);
                offset += length;
            }
            data_frames += 1;
        }
        file.sync_all()?;

        Ok(DiskBackupResult {
            disk: disk.name.clone(),
            path: partial.to_path_buf(),
            virtual_size: plan.virtual_size,
            data_bytes: plan.thin_backup_size,
            written_bytes: plan.thin_backup_size,
            data_frames,
            zero_frames: 0,
            warnings: Vec::new(),
        })
    }
}

/// Read `length` bytes at `offset`, honoring the transport's request limit.
pub fn read_range(transport: &mut dyn Transport, offset: u64, length: u64) -> Result<Vec<u8>> {
    let max_request = transport.max_request_size().max(1);
    if length <= max_request {
        return transport.read_at(offset, length);
    }

    let mut data = Vec::with_capacity(length as usize);
    let mut position = offset;
    let end = offset + length;
    while position < end {
        let piece = max_request.min(end - position);
        data.extend_from_slice(&transport.read_at(position, piece)?);
        position += piece;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extents::plan_extents;
    use std::io::Cursor;
    use tempfile::TempDir;
    use virtback_core::{Extent, FileTransport};
    use virtback_stream::{FrameKind, StreamReader};

    fn options(level: BackupLevel, stream_type: StreamType) -> EngineOptions {
        EngineOptions {
            level,
            stream_type,
            chunk_size: 4096,
            compression: None,
        }
    }

    fn source_image(dir: &Utf8Path, size: u64) -> (Utf8PathBuf, FileTransport) {
        let path = dir.join("source.img");
        let mut transport = FileTransport::create(&path, size).unwrap();
        transport.write_at(&vec![0xAB; 8192], 0).unwrap();
        (path, transport)
    }

    fn utf8_dir(temp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_target_names() {
        let inc = CheckpointPlan {
            name: "virtback.3".into(),
            parent: Some("virtback.2".into()),
            persist: true,
        };
        let full = options(BackupLevel::Full, StreamType::Stream);
        assert_eq!(
            target_file_name("sda", &full, None, "x").unwrap(),
            "sda.full.data"
        );
        assert_eq!(
            target_file_name("sda", &options(BackupLevel::Inc, StreamType::Stream), Some(&inc), "x")
                .unwrap(),
            "sda.inc.virtback.3.data"
        );
        assert_eq!(
            target_file_name(
                "sda",
                &options(BackupLevel::Diff, StreamType::Stream),
                Some(&inc),
                "20260101120000"
            )
            .unwrap(),
            "sda.diff.virtback.3.20260101120000.data"
        );
        assert_eq!(
            target_file_name("vdb", &options(BackupLevel::Copy, StreamType::Raw), None, "x").unwrap(),
            "vdb.copy.raw"
        );
        assert!(target_file_name("sda", &options(BackupLevel::Inc, StreamType::Stream), None, "x")
            .is_err());
    }

    #[test]
    fn test_raw_restrictions() {
        assert!(BackupEngine::new(options(BackupLevel::Inc, StreamType::Raw)).is_err());

        let mut compressed = options(BackupLevel::Full, StreamType::Raw);
        compressed.compression = Some(CompressionMethod::Lz4);
        assert!(BackupEngine::new(compressed).is_err());

        let mut zero_chunk = options(BackupLevel::Full, StreamType::Stream);
        zero_chunk.chunk_size = 0;
        assert!(BackupEngine::new(zero_chunk).is_err());
    }

    #[test]
    fn test_chunk_size_upper_bound() {
        let mut largest = options(BackupLevel::Full, StreamType::Stream);
        largest.chunk_size = MAX_CHUNK_SIZE;
        largest.compression = Some(CompressionMethod::Lz4);
        assert!(BackupEngine::new(largest.clone()).is_ok());

        largest.chunk_size = 8 * 1024 * 1024 * 1024;
        assert!(matches!(
            BackupEngine::new(largest),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_inc_stream_has_no_zero_frames() {
        let temp = TempDir::new().unwrap();
        let dir = utf8_dir(&temp);
        let (path, mut transport) = source_image(&dir, 16384);
        let disk = DiskSpec::new("sda", "raw", path.as_str());

        let plan = plan_extents(
            "sda",
            vec![Extent::data(0, 8192), Extent::hole(8192, 8192)],
            16384,
        )
        .unwrap();
        let checkpoint = CheckpointPlan {
            name: "virtback.1".into(),
            parent: Some("virtback.0".into()),
            persist: true,
        };
        let target = dir.join("sda.inc.virtback.1.data");
        let engine = BackupEngine::new(options(BackupLevel::Inc, StreamType::Stream)).unwrap();
        let result = engine
            .backup_disk(
                &disk,
                &mut transport,
                &plan,
                Some(&checkpoint),
                &target,
                &CancelToken::new(),
                &DiskProgress::hidden(),
            )
            .unwrap();

        assert_eq!(result.zero_frames, 0);
        // 8192 bytes at a 4096 chunk limit is one chunked frame
        assert_eq!(result.data_frames, 1);
        assert!(!partial_path(&target).exists());

        let bytes = fs::read(&target).unwrap();
        let mut reader = StreamReader::open(Cursor::new(bytes)).unwrap();
        assert_eq!(
            reader.metadata().parent_checkpoint.as_deref(),
            Some("virtback.0")
        );
        let kinds: Vec<FrameKind> = reader.frames().unwrap().iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![FrameKind::Data, FrameKind::Stop]);
    }

    #[test]
    fn test_raw_output_is_sparse_image() {
        let temp = TempDir::new().unwrap();
        let dir = utf8_dir(&temp);
        let (path, mut transport) = source_image(&dir, 16384);
        let disk = DiskSpec::new("sda", "raw", path.as_str());

        let plan = plan_extents(
            "sda",
            vec![Extent::data(0, 8192), Extent::hole(8192, 8192)],
            16384,
        )
        .unwrap();
        let target = dir.join("sda.full.raw");
        let engine = BackupEngine::new(options(BackupLevel::Full, StreamType::Raw)).unwrap();
        engine
            .backup_disk(
                &disk,
                &mut transport,
                &plan,
                None,
                &target,
                &CancelToken::new(),
                &DiskProgress::hidden(),
            )
            .unwrap();

        assert_eq!(fs::read(&target).unwrap(), fs::read(&path).unwrap());
    }

    #[test]
    fn test_cancel_leaves_partial() {
        let temp = TempDir::new().unwrap();
        let dir = utf8_dir(&temp);
        let (path, mut transport) = source_image(&dir, 16384);
        let disk = DiskSpec::new("sda", "raw", path.as_str());
        let plan = plan_extents("sda", vec![Extent::data(0, 16384)], 16384).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let target = dir.join("sda.full.data");
        let engine = BackupEngine::new(options(BackupLevel::Full, StreamType::Stream)).unwrap();
        let err = engine
            .backup_disk(
                &disk,
                &mut transport,
                &plan,
                None,
                &target,
                &cancel,
                &DiskProgress::hidden(),
            )
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(partial_path(&target).exists());
        assert!(!target.exists());
    }

    #[test]
    fn test_read_range_splits_requests() {
        let temp = TempDir::new().unwrap();
        let dir = utf8_dir(&temp);
        let (_, transport) = source_image(&dir, 16384);
        let mut transport = transport.with_max_request_size(1000);

        let data = read_range(&mut transport, 0, 8192).unwrap();
        assert_eq!(data, vec![0xAB; 8192]);
    }
}
