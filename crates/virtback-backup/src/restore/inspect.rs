//! Stream file inspection for `virtback info`.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs::File;
use std::io::BufReader;
use virtback_core::Result;
use virtback_stream::{FrameHeader, FrameKind, StreamMetadata, StreamReader};

#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub path: Utf8PathBuf,
    pub metadata: StreamMetadata,
    pub frames: Vec<FrameHeader>,
    pub file_size: u64,
    pub trailer_entries: Option<usize>,
}

impl StreamInfo {
    pub fn count(&self, kind: FrameKind) -> usize {
        self.frames.iter().filter(|f| f.kind == kind).count()
    }

    /// Uncompressed bytes carried by DATA frames.
    pub fn data_bytes(&self) -> u64 {
        self.frames
            .iter()
            .filter(|f| f.kind == FrameKind::Data)
            .map(|f| f.length)
            .sum()
    }
}

/// Read metadata and every frame header of a stream file.
pub fn inspect(path: &Utf8Path) -> Result<StreamInfo> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut reader = StreamReader::open(BufReader::new(file))?;
    let frames = reader.frames()?;

    Ok(StreamInfo {
        path: path.to_path_buf(),
        metadata: reader.metadata().clone(),
        trailer_entries: reader.trailer().map(|t| t.len()),
        frames,
        file_size,
    })
}
