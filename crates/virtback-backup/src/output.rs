//! Backup output targets.
//!
//! A job writes into a directory that is locked for the duration of the job.
//! Copy backups may instead be delivered as a tar archive (to a file or
//! stdout), built from a scratch directory once every disk has finished.

use crate::checksum::ChecksumWriter;
use crate::engine::PARTIAL_SUFFIX;
use camino::{Utf8Path, Utf8PathBuf};
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use tar::Builder as TarBuilder;
use virtback_core::{BackupLevel, ChainError, Error, Result, StreamType};
use walkdir::WalkDir;

/// Lock file created inside the output directory.
pub const LOCK_FILE_NAME: &str = ".virtback.lock";

/// Where a job's files end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Write files into this directory
    Directory(Utf8PathBuf),
    /// Write a tar archive to this path, or stdout for `-`
    Archive(Utf8PathBuf),
}

impl OutputTarget {
    pub fn is_archive(&self) -> bool {
        matches!(self, OutputTarget::Archive(_))
    }

    pub fn validate(&self, level: BackupLevel) -> Result<()> {
        if self.is_archive() && level != BackupLevel::Copy {
            return Err(Error::invalid_config(format!(
                "archive output is only supported for copy backups, not {}",
                level
            )));
        }
        Ok(())
    }
}

/// An output directory held under an exclusive lock.
#[derive(Debug)]
pub struct OutputDir {
    path: Utf8PathBuf,
    // Lock is released when the handle is dropped
    _lock: File,
}

impl OutputDir {
    /// Create and lock `path`, then check it is usable for `level`.
    ///
    /// Full and copy backups need a directory without backup data. Inc and
    /// diff backups need a finished full backup and no `.partial` leftovers.
    pub fn prepare(path: &Utf8Path, level: BackupLevel) -> Result<Self> {
        fs::create_dir_all(path)?;

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path.join(LOCK_FILE_NAME))?;
        lock.lock_exclusive()?;

        let dir = Self {
            path: path.to_path_buf(),
            _lock: lock,
        };

        match level {
            BackupLevel::Full | BackupLevel::Copy => {
                if !dir.entries()?.is_empty() {
                    return Err(Error::OutputNotEmpty {
                        path: path.to_string(),
                    });
                }
            }
            BackupLevel::Inc | BackupLevel::Diff => {
                if let Some(partial) = partial_files(path)?.into_iter().next() {
                    return Err(Error::partial_backup(partial.as_str()));
                }
                let has_full = backup_files(path)?
                    .iter()
                    .any(|file| file.file_name().is_some_and(|name| name.contains(".full.")));
                if !has_full {
                    return Err(ChainError::NoCheckpointsFound.into());
                }
            }
        }

        Ok(dir)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Directory entries other than the lock file.
    fn entries(&self) -> Result<Vec<Utf8PathBuf>> {
        list_dir(&self.path)
    }
}

fn list_dir(path: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut entries = Vec::new();
    for entry in path.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_name() != LOCK_FILE_NAME {
            entries.push(entry.path().to_path_buf());
        }
    }
    entries.sort();
    Ok(entries)
}

/// Files still carrying the `.partial` suffix.
pub fn partial_files(path: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let suffix = format!(".{}", PARTIAL_SUFFIX);
    Ok(list_dir(path)?
        .into_iter()
        .filter(|p| p.as_str().ends_with(&suffix))
        .collect())
}

/// Finished backup files (stream and raw).
pub fn backup_files(path: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let stream = StreamType::Stream.extension();
    let raw = StreamType::Raw.extension();
    Ok(list_dir(path)?
        .into_iter()
        .filter(|p| matches!(p.extension(), Some(ext) if ext == stream || ext == raw))
        .collect())
}

/// Summary of a written archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub target: Utf8PathBuf,
    pub files: usize,
    pub bytes: u64,
    pub checksum: String,
}

/// Tar every file of `source` (except the lock file) into `target`.
///
/// `-` writes the archive to stdout.
pub fn write_archive(source: &Utf8Path, target: &Utf8Path) -> Result<ArchiveInfo> {
    let (files, bytes, checksum) = if target.as_str() == "-" {
        let stdout = io::stdout();
        build_archive(source, stdout.lock())?
    } else {
        build_archive(source, File::create(target)?)?
    };

    tracing::info!("Wrote archive {} ({} files, {} bytes)", target, files, bytes);
    Ok(ArchiveInfo {
        target: target.to_path_buf(),
        files,
        bytes,
        checksum,
    })
}

fn build_archive<W: Write>(source: &Utf8Path, writer: W) -> Result<(usize, u64, String)> {
    let mut builder = TarBuilder::new(ChecksumWriter::new(writer));
    let mut files = 0;

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() || entry.file_name() == LOCK_FILE_NAME {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::invalid_config(format!("archive path error: {}", e)))?;
        builder.append_path_with_name(entry.path(), relative)?;
        files += 1;
    }

    let writer = builder.into_inner()?;
    let (mut inner, bytes, checksum) = writer.finish()?;
    inner.flush()?;
    Ok((files, bytes, checksum))
}
