//! Compression trailer
//!
//! Layout at the end of a compressed stream, after STOP:
//! `[json] COMP(start=0, length=len(json)) TERM`. Readers locate it by
//! seeking back from end-of-file.

use crate::frame::{read_frame, read_terminator, write_frame, write_terminator};
use crate::frame::{FrameHeader, FrameKind, FRAME_LEN, TERMINATOR};
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek, SeekFrom, Write};
use virtback_core::{Error, Result};

/// Stored size of one DATA frame's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrailerEntry {
    /// Frame written as a single compressed block
    Single(u64),
    /// Frame split into chunks, one compressed size per chunk
    Chunked(Vec<u64>),
}

impl TrailerEntry {
    /// Total bytes the payload occupies in the file.
    pub fn stored_len(&self) -> u64 {
        match self {
            TrailerEntry::Single(len) => *len,
            TrailerEntry::Chunked(chunks) => chunks
                .iter()
                .fold(0u64, |total, len| total.saturating_add(*len)),
        }
    }
}

/// Ordered list of entries, one per DATA frame in file order.
pub type CompressionTrailer = Vec<TrailerEntry>;

/// Append the trailer. Returns the number of bytes written.
pub fn write_compression_trailer<W: Write>(
    writer: &mut W,
    trailer: &CompressionTrailer,
) -> Result<u64> {
    let json = serde_json::to_vec(trailer)?;
    writer.write_all(&json)?;
    write_frame(
        writer,
        &FrameHeader::new(FrameKind::Comp, 0, json.len() as u64),
    )?;
    write_terminator(writer)?;
    Ok((json.len() + FRAME_LEN + TERMINATOR.len()) as u64)
}

/// Read the trailer from the end of the stream.
///
/// The reader's position is left unspecified; callers seek back themselves.
pub fn read_compression_trailer<R: Read + Seek>(reader: &mut R) -> Result<CompressionTrailer> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    let locator_len = (FRAME_LEN + TERMINATOR.len()) as u64;
    if file_len < locator_len {
        return Err(Error::trailer_missing("stream too short for trailer"));
    }

    let locator_pos = file_len - locator_len;
    reader.seek(SeekFrom::Start(locator_pos))?;
    let header = read_frame(reader, locator_pos)
        .map_err(|e| Error::trailer_missing(format!("no trailer locator: {}", e)))?;
    if header.kind != FrameKind::Comp {
        return Err(Error::trailer_missing(format!(
            "expected COMP locator at end of stream, found {}",
            header.kind
        )));
    }
    read_terminator(reader, locator_pos + FRAME_LEN as u64)
        .map_err(|e| Error::trailer_missing(e.to_string()))?;

    if header.length > locator_pos {
        return Err(Error::trailer_missing(format!(
            "trailer length {} exceeds stream size",
            header.length
        )));
    }

    let json_pos = locator_pos - header.length;
    reader.seek(SeekFrom::Start(json_pos))?;
    let mut json = vec![0u8; header.length as usize];
    reader
        .read_exact(&mut json)
        .map_err(|e| Error::trailer_missing(format!("short trailer: {}", e)))?;

    serde_json::from_slice(&json)
        .map_err(|e| Error::trailer_missing(format!("unparsable trailer: {}", e)))
}
