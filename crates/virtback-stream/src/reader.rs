//! Stream reader
//!
//! Parses the metadata on open, loads the compression trailer when needed,
//! and then hands out frames one by one. Ordering and bounds are checked as
//! frames are read, so a damaged file is rejected before anything past the
//! damage is applied.

use crate::compression::decompress_block;
use crate::frame::{read_frame, read_terminator, FrameHeader, FrameKind, FRAME_LEN, TERMINATOR};
use crate::metadata::{load_metadata, StreamMetadata};
use crate::trailer::{read_compression_trailer, CompressionTrailer, TrailerEntry};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use virtback_core::{Error, Result};

/// Upper bound for the metadata block.
const MAX_METADATA_LEN: u64 = 1024 * 1024;

pub struct StreamReader<R: Read + Seek> {
    inner: R,
    position: u64,
    metadata: StreamMetadata,
    trailer: Option<CompressionTrailer>,
    stream_len: u64,
    data_index: usize,
    last_end: u64,
    pending: Option<FrameHeader>,
    finished: bool,
}

impl<R: Read + Seek> StreamReader<R> {
    /// Read the META frame and metadata; load the trailer if compressed.
    pub fn open(mut inner: R) -> Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        let header = read_frame(&mut inner, 0)?;
        if header.kind != FrameKind::Meta {
            return Err(Error::stream_format(
                0,
                format!("stream starts with {} instead of META", header.kind),
            ));
        }
        if header.length > MAX_METADATA_LEN {
            return Err(Error::stream_format(
                0,
                format!("metadata length {} is implausible", header.length),
            ));
        }

        let mut json = vec![0u8; header.length as usize];
        read_exact_at(&mut inner, &mut json, FRAME_LEN as u64)?;
        let metadata = load_metadata(&json)?;
        let position = FRAME_LEN as u64 + header.length;
        read_terminator(&mut inner, position)?;
        let position = position + TERMINATOR.len() as u64;
        let stream_len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(position))?;

        let trailer = if metadata.is_compressed() {
            let trailer = read_compression_trailer(&mut inner)?;
            inner.seek(SeekFrom::Start(position))?;
            Some(trailer)
        } else {
            None
        };

        tracing::debug!(
            "Opened stream for disk {} ({} level, {} data bytes)",
            metadata.disk_name,
            metadata.level,
            metadata.data_size
        );

        Ok(Self {
            inner,
            position,
            metadata,
            trailer,
            stream_len,
            data_index: 0,
            last_end: 0,
            pending: None,
            finished: false,
        })
    }

    pub fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    pub fn trailer(&self) -> Option<&CompressionTrailer> {
        self.trailer.as_ref()
    }

    /// Current byte offset in the stream file.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next frame header.
    ///
    /// A pending DATA payload that was not consumed is skipped. Returns the
    /// STOP frame once, then `None`.
    pub fn next_frame(&mut self) -> Result<Option<FrameHeader>> {
        if self.finished {
            return Ok(None);
        }
        if self.pending.is_some() {
            self.skip_data()?;
        }

        let frame_pos = self.position;
        let header = read_frame(&mut self.inner, frame_pos)?;
        self.position += FRAME_LEN as u64;

        match header.kind {
            FrameKind::Meta | FrameKind::Comp => Err(Error::stream_format(
                frame_pos,
                format!("unexpected {} frame inside stream body", header.kind),
            )),
            FrameKind::Stop => {
                if let Some(trailer) = &self.trailer {
                    if trailer.len() != self.data_index {
                        return Err(Error::trailer_missing(format!(
                            "trailer has {} entries but stream has {} DATA frames",
                            trailer.len(),
                            self.data_index
                        )));
                    }
                }
                self.finished = true;
                Ok(Some(header))
            }
            FrameKind::Data | FrameKind::Zero => {
                self.check_range(&header, frame_pos)?;
                self.last_end = header.end();
                if header.kind == FrameKind::Data {
                    let stored = match &self.trailer {
                        Some(_) => self.trailer_entry()?.stored_len(),
                        None => header.length,
                    };
                    self.check_stored(stored)?;
                    self.pending = Some(header);
                }
                Ok(Some(header))
            }
        }
    }

    /// Consume the pending DATA payload, passing decoded pieces to `sink` as
    /// `(disk offset, bytes)`. Uncompressed payloads are read in pieces of at
    /// most `max_piece` bytes. Returns the frame's uncompressed length.
    pub fn read_data<F>(&mut self, max_piece: u64, mut sink: F) -> Result<u64>
    where
        F: FnMut(u64, &[u8]) -> Result<()>,
    {
        let frame = self.take_pending()?;
        let max_piece = max_piece.max(1);

        match self.metadata.compression_method {
            None => {
                let mut offset = frame.start;
                let mut remaining = frame.length;
                while remaining > 0 {
                    let piece = remaining.min(max_piece);
                    let mut buf = vec![0u8; piece as usize];
                    read_exact_at(&mut self.inner, &mut buf, self.position)?;
                    self.position += piece;
                    sink(offset, &buf)?;
                    offset += piece;
                    remaining -= piece;
                }
            }
            Some(method) => {
                let entry = self.trailer_entry()?.clone();
                let chunks = match entry {
                    TrailerEntry::Single(len) => vec![len],
                    TrailerEntry::Chunked(chunks) => chunks,
                };

                let mut offset = frame.start;
                for stored in chunks {
                    let remaining = frame.end() - offset;
                    let mut buf = vec![0u8; stored as usize];
                    read_exact_at(&mut self.inner, &mut buf, self.position)?;
                    let block = decompress_block(method, &buf, remaining).map_err(|e| {
                        Error::stream_format(self.position, e.to_string())
                    })?;
                    self.position += stored;
                    sink(offset, &block)?;
                    offset += block.len() as u64;
                }

                if offset != frame.end() {
                    return Err(Error::stream_format(
                        self.position,
                        format!(
                            "DATA frame at {} decompressed to {} bytes, header declares {}",
                            frame.start,
                            offset - frame.start,
                            frame.length
                        ),
                    ));
                }
            }
        }

        self.end_data()?;
        Ok(frame.length)
    }

    /// Skip the pending DATA payload without reading it. Returns the file
    /// offset at which the stored payload starts.
    pub fn skip_data(&mut self) -> Result<u64> {
        let frame = self.take_pending()?;
        let stored = match &self.trailer {
            Some(_) => self.trailer_entry()?.stored_len(),
            None => frame.length,
        };

        let payload_pos = self.position;
        self.position += stored;
        self.inner.seek(SeekFrom::Start(self.position))?;
        self.end_data()?;
        Ok(payload_pos)
    }

    /// Read every remaining frame, skipping payloads. Returns all headers
    /// including STOP.
    pub fn frames(&mut self) -> Result<Vec<FrameHeader>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn take_pending(&mut self) -> Result<FrameHeader> {
        self.pending.take().ok_or_else(|| {
            Error::stream_format(self.position, "no DATA frame payload is pending")
        })
    }

    fn end_data(&mut self) -> Result<()> {
        read_terminator(&mut self.inner, self.position)?;
        self.position += TERMINATOR.len() as u64;
        self.data_index += 1;
        Ok(())
    }

    fn trailer_entry(&self) -> Result<&TrailerEntry> {
        let trailer = self
            .trailer
            .as_ref()
            .ok_or_else(|| Error::trailer_missing("stream has no compression trailer"))?;
        trailer.get(self.data_index).ok_or_else(|| {
            Error::trailer_missing(format!(
                "no trailer entry for DATA frame {}",
                self.data_index
            ))
        })
    }

    /// A payload must fit in what is left of the file.
    fn check_stored(&self, stored: u64) -> Result<()> {
        let available = self.stream_len.saturating_sub(self.position);
        if stored > available {
            return Err(Error::stream_format(
                self.position,
                format!(
                    "DATA frame {} stores {} bytes but only {} remain in the stream",
                    self.data_index, stored, available
                ),
            ));
        }
        Ok(())
    }

    fn check_range(&self, header: &FrameHeader, frame_pos: u64) -> Result<()> {
        if header.length == 0 {
            return Err(Error::stream_format(
                frame_pos,
                format!("empty {} frame at {}", header.kind, header.start),
            ));
        }
        if header.start < self.last_end {
            return Err(Error::stream_format(
                frame_pos,
                format!(
                    "{} frame at {} overlaps or precedes previous frame ending at {}",
                    header.kind, header.start, self.last_end
                ),
            ));
        }
        match header.start.checked_add(header.length) {
            Some(end) if end <= self.metadata.virtual_size => Ok(()),
            _ => Err(Error::stream_format(
                frame_pos,
                format!(
                    "{} frame [{}, +{}) exceeds virtual size {}",
                    header.kind, header.start, header.length, self.metadata.virtual_size
                ),
            )),
        }
    }
}

fn read_exact_at<R: Read>(reader: &mut R, buf: &mut [u8], position: u64) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => {
            Error::stream_format(position, "unexpected end of stream inside payload")
        }
        _ => Error::Io(e),
    })
}
