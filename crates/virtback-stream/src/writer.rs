//! Sequential stream writer

use crate::compression::compress_block;
use crate::frame::{write_frame, write_terminator, FrameHeader, FrameKind, FRAME_LEN, TERMINATOR};
use crate::metadata::{dump_metadata, StreamMetadata};
use crate::trailer::{write_compression_trailer, CompressionTrailer, TrailerEntry};
use std::io::Write;
use virtback_core::{CompressionMethod, Error, Result};

/// Counters reported once a stream is finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub data_frames: u64,
    pub zero_frames: u64,
    /// Uncompressed bytes carried by DATA frames
    pub data_bytes: u64,
    /// Bytes written to the underlying writer, trailer included
    pub written_bytes: u64,
}

/// Appends frames to an underlying writer.
///
/// Frames must be added in ascending, non-overlapping order. The writer
/// tracks DATA frames so it can emit the compression trailer on
/// [`finish`](StreamWriter::finish).
pub struct StreamWriter<W: Write> {
    inner: W,
    compression: Option<CompressionMethod>,
    trailer: CompressionTrailer,
    summary: StreamSummary,
    last_end: u64,
    metadata_written: bool,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(inner: W, compression: Option<CompressionMethod>) -> Self {
        Self {
            inner,
            compression,
            trailer: Vec::new(),
            summary: StreamSummary::default(),
            last_end: 0,
            metadata_written: false,
        }
    }

    /// Write the META frame, the metadata JSON and a terminator.
    pub fn write_metadata(&mut self, metadata: &StreamMetadata) -> Result<()> {
        if self.metadata_written {
            return Err(Error::stream_format(
                self.summary.written_bytes,
                "metadata already written",
            ));
        }
        if metadata.compression_method != self.compression {
            return Err(Error::invalid_config(
                "metadata compression does not match the writer",
            ));
        }

        let json = dump_metadata(metadata)?;
        write_frame(
            &mut self.inner,
            &FrameHeader::new(FrameKind::Meta, 0, json.len() as u64),
        )?;
        self.inner.write_all(&json)?;
        write_terminator(&mut self.inner)?;
        self.summary.written_bytes += (FRAME_LEN + json.len() + TERMINATOR.len()) as u64;
        self.metadata_written = true;
        Ok(())
    }

    /// Write a DATA frame whose payload is available in one piece.
    pub fn write_data(&mut self, start: u64, payload: &[u8]) -> Result<()> {
        let mut frame = self.begin_data(start, payload.len() as u64, false)?;
        frame.write_chunk(payload)?;
        frame.finish()
    }

    /// Start a DATA frame covering `[start, start + length)`.
    ///
    /// With `chunked` set, every chunk is compressed on its own and recorded
    /// as a nested trailer entry.
    pub fn begin_data(&mut self, start: u64, length: u64, chunked: bool) -> Result<DataFrame<'_, W>> {
        self.check_order(start, length)?;
        write_frame(
            &mut self.inner,
            &FrameHeader::new(FrameKind::Data, start, length),
        )?;
        self.summary.written_bytes += FRAME_LEN as u64;
        Ok(DataFrame {
            writer: self,
            start,
            length,
            chunked,
            written: 0,
            chunk_sizes: Vec::new(),
        })
    }

    /// Write a ZERO frame.
    pub fn write_zero(&mut self, start: u64, length: u64) -> Result<()> {
        self.check_order(start, length)?;
        write_frame(
            &mut self.inner,
            &FrameHeader::new(FrameKind::Zero, start, length),
        )?;
        self.summary.written_bytes += FRAME_LEN as u64;
        self.summary.zero_frames += 1;
        self.last_end = start + length;
        Ok(())
    }

    /// Write STOP, the trailer when compressed, and hand back the writer.
    pub fn finish(mut self) -> Result<(W, StreamSummary)> {
        write_frame(&mut self.inner, &FrameHeader::new(FrameKind::Stop, 0, 0))?;
        self.summary.written_bytes += FRAME_LEN as u64;

        if self.compression.is_some() {
            self.summary.written_bytes +=
                write_compression_trailer(&mut self.inner, &self.trailer)?;
        }
        self.inner.flush()?;
        Ok((self.inner, self.summary))
    }

    fn check_order(&self, start: u64, length: u64) -> Result<()> {
        if !self.metadata_written {
            return Err(Error::stream_format(0, "metadata must be written first"));
        }
        if start < self.last_end {
            return Err(Error::stream_format(
                self.summary.written_bytes,
                format!(
                    "frame at {} overlaps previous frame ending at {}",
                    start, self.last_end
                ),
            ));
        }
        if length == 0 {
            return Err(Error::stream_format(
                self.summary.written_bytes,
                format!("empty frame at {}", start),
            ));
        }
        if start.checked_add(length).is_none() {
            return Err(Error::stream_format(
                self.summary.written_bytes,
                "frame range overflows",
            ));
        }
        Ok(())
    }
}

/// An open DATA frame. Call [`finish`](DataFrame::finish) once all chunks
/// have been written.
pub struct DataFrame<'a, W: Write> {
    writer: &'a mut StreamWriter<W>,
    start: u64,
    length: u64,
    chunked: bool,
    written: u64,
    chunk_sizes: Vec<u64>,
}

impl<W: Write> DataFrame<'_, W> {
    /// Append the next piece of the payload.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if self.written + data.len() as u64 > self.length {
            return Err(Error::stream_format(
                self.writer.summary.written_bytes,
                format!(
                    "DATA frame at {} exceeds declared length {}",
                    self.start, self.length
                ),
            ));
        }
        if !self.chunked && self.written > 0 {
            return Err(Error::stream_format(
                self.writer.summary.written_bytes,
                "unchunked DATA frame written in more than one piece",
            ));
        }

        let stored = match self.writer.compression {
            Some(method) => {
                let packed = compress_block(method, data)?;
                self.writer.inner.write_all(&packed)?;
                packed.len() as u64
            }
            None => {
                self.writer.inner.write_all(data)?;
                data.len() as u64
            }
        };
        self.chunk_sizes.push(stored);
        self.written += data.len() as u64;
        self.writer.summary.written_bytes += stored;
        Ok(())
    }

    /// Terminate the frame and record its trailer entry.
    pub fn finish(self) -> Result<()> {
        if self.written != self.length {
            return Err(Error::stream_format(
                self.writer.summary.written_bytes,
                format!(
                    "DATA frame at {} declared {} bytes but {} were written",
                    self.start, self.length, self.written
                ),
            ));
        }
        write_terminator(&mut self.writer.inner)?;

        let writer = self.writer;
        writer.summary.written_bytes += TERMINATOR.len() as u64;
        writer.summary.data_frames += 1;
        writer.summary.data_bytes += self.length;
        writer.last_end = self.start + self.length;
        if writer.compression.is_some() {
            let entry = if self.chunked {
                TrailerEntry::Chunked(self.chunk_sizes)
            } else {
                TrailerEntry::Single(self.chunk_sizes.first().copied().unwrap_or(0))
            };
            writer.trailer.push(entry);
        }
        Ok(())
    }
}
