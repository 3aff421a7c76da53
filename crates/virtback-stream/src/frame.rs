//! Frame headers and terminators

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use virtback_core::{Error, Result};

/// Size of an encoded frame header in bytes.
pub const FRAME_LEN: usize = 20;

/// Marker written after the metadata block and after every DATA payload.
pub const TERMINATOR: [u8; 4] = *b"\r\n\r\n";

/// Kind of a frame, encoded as a four byte ASCII tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Stream metadata (JSON) follows
    Meta,
    /// Raw (or compressed) disk bytes follow
    Data,
    /// Range reads as zeros; no payload
    Zero,
    /// End of stream
    Stop,
    /// Locates the compression trailer at the end of the file
    Comp,
}

impl FrameKind {
    pub fn tag(&self) -> [u8; 4] {
        match self {
            FrameKind::Meta => *b"meta",
            FrameKind::Data => *b"data",
            FrameKind::Zero => *b"zero",
            FrameKind::Stop => *b"stop",
            FrameKind::Comp => *b"comp",
        }
    }

    pub fn from_tag(tag: &[u8; 4]) -> Option<Self> {
        match tag {
            b"meta" => Some(FrameKind::Meta),
            b"data" => Some(FrameKind::Data),
            b"zero" => Some(FrameKind::Zero),
            b"stop" => Some(FrameKind::Stop),
            b"comp" => Some(FrameKind::Comp),
            _ => None,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        f.write_str(&String::from_utf8_lossy(&tag).to_uppercase())
    }
}

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub start: u64,
    pub length: u64,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, start: u64, length: u64) -> Self {
        Self {
            kind,
            start,
            length,
        }
    }

    /// First disk byte past the frame's range.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        buf[0..4].copy_from_slice(&self.kind.tag());
        buf[4..12].copy_from_slice(&self.start.to_be_bytes());
        buf[12..20].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decode a header; `position` is only used for error reporting.
    pub fn decode(buf: &[u8; FRAME_LEN], position: u64) -> Result<Self> {
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&buf[0..4]);
        let kind = FrameKind::from_tag(&tag).ok_or_else(|| {
            Error::stream_format(
                position,
                format!("unknown frame tag {:?}", String::from_utf8_lossy(&tag)),
            )
        })?;

        let mut word = [0u8; 8];
        word.copy_from_slice(&buf[4..12]);
        let start = u64::from_be_bytes(word);
        word.copy_from_slice(&buf[12..20]);
        let length = u64::from_be_bytes(word);

        Ok(Self {
            kind,
            start,
            length,
        })
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} start={} length={}", self.kind, self.start, self.length)
    }
}

/// Write a frame header.
pub fn write_frame<W: Write>(writer: &mut W, header: &FrameHeader) -> Result<()> {
    writer.write_all(&header.encode())?;
    Ok(())
}

/// Read a frame header. A clean EOF before the first byte is reported as a
/// format error, since every stream must end with a STOP frame.
pub fn read_frame<R: Read>(reader: &mut R, position: u64) -> Result<FrameHeader> {
    let mut buf = [0u8; FRAME_LEN];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => {
            Error::stream_format(position, "unexpected end of stream while reading frame")
        }
        _ => Error::Io(e),
    })?;
    FrameHeader::decode(&buf, position)
}

pub fn write_terminator<W: Write>(writer: &mut W) -> Result<()> {
    writer.write_all(&TERMINATOR)?;
    Ok(())
}

/// Read and verify a terminator.
pub fn read_terminator<R: Read>(reader: &mut R, position: u64) -> Result<()> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => {
            Error::stream_format(position, "unexpected end of stream, terminator expected")
        }
        _ => Error::Io(e),
    })?;
    if buf != TERMINATOR {
        return Err(Error::stream_format(
            position,
            format!("bad terminator {:02x?}", buf),
        ));
    }
    Ok(())
}
