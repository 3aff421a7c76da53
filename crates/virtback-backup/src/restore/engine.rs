//! Single-file restore.

use crate::cancel::CancelToken;
use crate::progress::DiskProgress;
use camino::Utf8Path;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use tracing::{debug, info};
use virtback_core::{BackupLevel, Error, Result, Transport};
use virtback_stream::{FrameKind, StreamReader};

/// What one restored file contributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub file: String,
    pub disk_name: String,
    pub level: BackupLevel,
    pub checkpoint: Option<String>,
    pub data_bytes: u64,
    pub data_frames: u64,
    pub zero_frames: u64,
}

/// Result of applying one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreStep {
    /// File applied; continue with the next one
    Continue(RestoreSummary),
    /// File applied and its checkpoint is the requested stop point
    StopRequested(RestoreSummary),
}

/// Applies stream files to a target transport.
#[derive(Debug, Clone, Default)]
pub struct RestoreEngine {
    stop_at: Option<String>,
}

impl RestoreEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop after the file whose checkpoint is `name`.
    pub fn with_stop_at(mut self, name: Option<String>) -> Self {
        self.stop_at = name;
        self
    }

    pub fn stop_at(&self) -> Option<&str> {
        self.stop_at.as_deref()
    }

    pub fn restore_file(
        &self,
        path: &Utf8Path,
        target: &mut dyn Transport,
        cancel: &CancelToken,
        progress: &DiskProgress,
    ) -> Result<RestoreStep> {
        let reader = BufReader::new(File::open(path)?);
        self.restore_stream(reader, path.as_str(), target, cancel, progress)
    }

    /// Apply one stream. `label` names the source in errors and summaries.
    pub fn restore_stream<R: Read + Seek>(
        &self,
        source: R,
        label: &str,
        target: &mut dyn Transport,
        cancel: &CancelToken,
        progress: &DiskProgress,
    ) -> Result<RestoreStep> {
        let mut reader = StreamReader::open(source)?;
        let metadata = reader.metadata().clone();
        info!(
            "Restoring {} ({} level, {} data bytes)",
            label, metadata.level, metadata.data_size
        );

        let mut summary = RestoreSummary {
            file: label.to_string(),
            disk_name: metadata.disk_name.clone(),
            level: metadata.level,
            checkpoint: metadata.checkpoint_name.clone(),
            data_bytes: 0,
            data_frames: 0,
            zero_frames: 0,
        };

        if metadata.data_size > 0 {
            let target_size = target.size()?;
            if target_size < metadata.virtual_size {
                return Err(Error::invalid_config(format!(
                    "restore target has {} bytes, {} needs {}",
                    target_size, label, metadata.virtual_size
                )));
            }

            let max_request = target.max_request_size().max(1);
            while let Some(frame) = reader.next_frame()? {
                cancel.check()?;
                match frame.kind {
                    FrameKind::Zero => {
                        debug!("ZERO {}+{}", frame.start, frame.length);
                        summary.zero_frames += 1;
                    }
                    FrameKind::Data => {
                        debug!("DATA {}+{}", frame.start, frame.length);
                        let applied = reader.read_data(max_request, |offset, data| {
                            for (index, piece) in data.chunks(max_request as usize).enumerate() {
                                target.write_at(piece, offset + index as u64 * max_request)?;
                            }
                            Ok(())
                        })?;
                        summary.data_bytes += applied;
                        summary.data_frames += 1;
                        progress.inc(applied);
                    }
                    FrameKind::Stop => break,
                    FrameKind::Meta | FrameKind::Comp => {
                        return Err(Error::stream_format(
                            reader.position(),
                            format!("unexpected {} frame", frame.kind),
                        ))
                    }
                }
            }

            if summary.data_bytes != metadata.data_size {
                return Err(Error::RestoreSizeMismatch {
                    file: label.to_string(),
                    expected: metadata.data_size,
                    actual: summary.data_bytes,
                });
            }
            target.flush()?;
        } else {
            debug!("{} declares no data, nothing to apply", label);
        }

        match (self.stop_at.as_deref(), metadata.created_checkpoint()) {
            (Some(stop), Some(checkpoint)) if stop == checkpoint => {
                info!("Reached checkpoint {}, stopping", checkpoint);
                Ok(RestoreStep::StopRequested(summary))
            }
            _ => Ok(RestoreStep::Continue(summary)),
        }
    }
}
