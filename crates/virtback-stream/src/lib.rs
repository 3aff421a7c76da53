//! virtback sparse stream format
//!
//! A stream file serializes one disk delta as a sequence of frames:
//!
//! ```text
//! META  [metadata json] TERM
//! DATA  [payload]       TERM      (one per data extent)
//! ZERO                            (full/copy holes only)
//! ...
//! STOP
//! [trailer json] COMP TERM        (only when compressed)
//! ```
//!
//! Every frame header is 20 bytes: a four byte ASCII tag followed by the
//! big-endian `start` and `length` fields. DATA headers always carry the
//! uncompressed length; the compression trailer records how many bytes were
//! actually stored for each DATA frame (or each chunk of a chunked frame).

pub mod compression;
pub mod frame;
pub mod metadata;
pub mod reader;
pub mod trailer;
pub mod writer;

pub use compression::{compress_block, decompress_block};
pub use frame::{
    read_frame, read_terminator, write_frame, write_terminator, FrameHeader, FrameKind, FRAME_LEN,
    TERMINATOR,
};
pub use metadata::{dump_metadata, load_metadata, StreamMetadata, STREAM_VERSION};
pub use reader::StreamReader;
pub use trailer::{read_compression_trailer, write_compression_trailer, CompressionTrailer, TrailerEntry};
pub use writer::{DataFrame, StreamSummary, StreamWriter};
