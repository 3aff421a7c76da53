//! Chain discovery and sequence restore.

use super::engine::{RestoreEngine, RestoreStep, RestoreSummary};
use crate::cancel::CancelToken;
use crate::checksum::{verify_checksum_file, ChecksumStatus};
use crate::output::backup_files;
use crate::progress::DiskProgress;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::File;
use std::io::BufReader;
use tracing::{info, warn};
use virtback_core::{BackupLevel, Error, FileTransport, Result, StreamType, Transport};
use virtback_stream::{StreamMetadata, StreamReader};

/// A stream file and its metadata.
#[derive(Debug, Clone)]
pub struct ChainFile {
    pub path: Utf8PathBuf,
    pub metadata: StreamMetadata,
}

impl ChainFile {
    pub fn open(path: &Utf8Path) -> Result<Self> {
        let reader = StreamReader::open(BufReader::new(File::open(path)?))?;
        Ok(Self {
            path: path.to_path_buf(),
            metadata: reader.metadata().clone(),
        })
    }

    /// Generation encoded in the checkpoint name, 0 for files without one.
    pub fn generation(&self) -> usize {
        self.metadata
            .checkpoint_name
            .as_deref()
            .and_then(|name| name.rsplit('.').next())
            .and_then(|generation| generation.parse().ok())
            .unwrap_or(0)
    }
}

/// Find and order the stream files of `disk` in `dir`.
///
/// The chain starts with the full (or copy) file, followed by inc/diff files
/// in generation order. Raw images are not part of a chain.
pub fn collect_chain(dir: &Utf8Path, disk: &str) -> Result<Vec<ChainFile>> {
    let prefix = format!("{}.", disk);
    let mut files = Vec::new();
    let mut raw_found = false;

    for path in backup_files(dir)? {
        let Some(name) = path.file_name() else { continue };
        if !name.starts_with(&prefix) {
            continue;
        }
        if path.extension() == Some(StreamType::Raw.extension()) {
            raw_found = true;
            continue;
        }
        let file = ChainFile::open(&path)?;
        if file.metadata.disk_name != disk {
            warn!(
                "Skipping {}: it belongs to disk {}",
                path, file.metadata.disk_name
            );
            continue;
        }
        files.push(file);
    }

    if files.is_empty() {
        let message = if raw_found {
            format!("disk {} was backed up as a raw image; copy it directly", disk)
        } else {
            format!("no backup files for disk {} in {}", disk, dir)
        };
        return Err(Error::invalid_config(message));
    }

    files.sort_by(|a, b| {
        let key = |f: &ChainFile| (f.metadata.incremental, f.generation(), f.metadata.date);
        key(a).cmp(&key(b))
    });
    validate_chain(disk, &files)?;
    Ok(files)
}

fn validate_chain(disk: &str, files: &[ChainFile]) -> Result<()> {
    let base = &files[0];
    if base.metadata.incremental {
        return Err(Error::invalid_config(format!(
            "chain for disk {} has no full or copy backup",
            disk
        )));
    }
    if files.iter().skip(1).any(|f| !f.metadata.incremental) {
        return Err(Error::invalid_config(format!(
            "chain for disk {} has more than one full or copy backup",
            disk
        )));
    }
    if base.metadata.level == BackupLevel::Copy && files.len() > 1 {
        return Err(Error::invalid_config(format!(
            "copy backup of disk {} cannot be followed by incremental files",
            disk
        )));
    }
    if let Some(odd) = files
        .iter()
        .find(|f| f.metadata.virtual_size != base.metadata.virtual_size)
    {
        return Err(Error::invalid_config(format!(
            "{} has virtual size {}, chain base has {}",
            odd.path, odd.metadata.virtual_size, base.metadata.virtual_size
        )));
    }
    Ok(())
}

/// Outcome of restoring a chain.
#[derive(Debug, Clone, Default)]
pub struct SequenceReport {
    pub applied: Vec<RestoreSummary>,
    pub stopped_at: Option<String>,
    pub virtual_size: u64,
}

impl SequenceReport {
    pub fn data_bytes(&self) -> u64 {
        self.applied.iter().map(|s| s.data_bytes).sum()
    }
}

/// Replay `files` in order into `target`, halting on a stop request.
pub fn restore_sequence(
    files: &[ChainFile],
    target: &mut dyn Transport,
    engine: &RestoreEngine,
    cancel: &CancelToken,
    progress: &DiskProgress,
) -> Result<SequenceReport> {
    if let Some(stop) = engine.stop_at() {
        let known = files
            .iter()
            .any(|f| f.metadata.created_checkpoint() == Some(stop));
        if !known {
            return Err(Error::invalid_config(format!(
                "checkpoint {} not found in the backup chain",
                stop
            )));
        }
    }

    let mut report = SequenceReport {
        virtual_size: files.first().map(|f| f.metadata.virtual_size).unwrap_or(0),
        ..Default::default()
    };

    for file in files {
        cancel.check()?;
        match engine.restore_file(&file.path, target, cancel, progress)? {
            RestoreStep::Continue(summary) => report.applied.push(summary),
            RestoreStep::StopRequested(summary) => {
                report.stopped_at = summary.checkpoint.clone();
                report.applied.push(summary);
                break;
            }
        }
    }

    Ok(report)
}

/// Options for restoring one disk from a backup directory.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub input_dir: Utf8PathBuf,
    pub disk: String,
    pub target: Utf8PathBuf,
    pub stop_at: Option<String>,
    pub verify_checksums: bool,
}

/// Restore one disk into a new sparse image at `options.target`.
pub fn restore_disk(
    options: &RestoreOptions,
    cancel: &CancelToken,
    progress: &DiskProgress,
) -> Result<SequenceReport> {
    info!("Stage 1/3: Collecting backup chain for {}", options.disk);
    let files = collect_chain(&options.input_dir, &options.disk)?;
    info!("Found {} files for disk {}", files.len(), options.disk);

    if options.verify_checksums {
        info!("Stage 2/3: Verifying checksums");
        for file in &files {
            match verify_checksum_file(&file.path)? {
                ChecksumStatus::Valid => {}
                ChecksumStatus::Missing => warn!("No checksum for {}", file.path),
                ChecksumStatus::Mismatch { expected, actual } => {
                    return Err(Error::invalid_config(format!(
                        "checksum mismatch for {}: expected {}, got {}",
                        file.path, expected, actual
                    )))
                }
            }
        }
    } else {
        info!("Stage 2/3: Skipping checksum verification");
    }

    info!("Stage 3/3: Applying {} files to {}", files.len(), options.target);
    let virtual_size = files[0].metadata.virtual_size;
    let mut target = FileTransport::create(&options.target, virtual_size)?;
    progress.set_total(files.iter().map(|f| f.metadata.data_size).sum());

    let engine = RestoreEngine::new().with_stop_at(options.stop_at.clone());
    restore_sequence(&files, &mut target, &engine, cancel, progress)
}
