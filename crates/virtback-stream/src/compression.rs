//! Block compression for DATA payloads.
//!
//! lz4 uses the block format with the uncompressed size prepended as a
//! little-endian u32; zlib uses a plain deflate stream with a zlib header.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use virtback_core::{CompressionMethod, Error, Result};

/// Default zlib level (6 = balanced speed/ratio).
pub const DEFAULT_ZLIB_LEVEL: u32 = 6;

/// Compress one block.
pub fn compress_block(method: CompressionMethod, data: &[u8]) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::Lz4 => {
            if u32::try_from(data.len()).is_err() {
                return Err(Error::compression(format!(
                    "lz4 block of {} bytes does not fit the size prefix",
                    data.len()
                )));
            }
            Ok(lz4_flex::block::compress_prepend_size(data))
        }
        CompressionMethod::Zlib => {
            let mut encoder = ZlibEncoder::new(
                Vec::with_capacity(data.len() / 2),
                Compression::new(DEFAULT_ZLIB_LEVEL),
            );
            encoder
                .write_all(data)
                .map_err(|e| Error::compression(format!("zlib compression failed: {}", e)))?;
            encoder
                .finish()
                .map_err(|e| Error::compression(format!("zlib compression failed: {}", e)))
        }
    }
}

/// Decompress one block. `limit` caps the decompressed size so a corrupt
/// header cannot trigger an oversized allocation.
pub fn decompress_block(method: CompressionMethod, data: &[u8], limit: u64) -> Result<Vec<u8>> {
    let out = match method {
        CompressionMethod::Lz4 => {
            if data.len() < 4 {
                return Err(Error::compression("lz4 block shorter than size prefix"));
            }
            let declared = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as u64;
            if declared > limit {
                return Err(Error::compression(format!(
                    "lz4 block declares {} bytes, at most {} expected",
                    declared, limit
                )));
            }
            lz4_flex::block::decompress(&data[4..], declared as usize)
                .map_err(|e| Error::compression(format!("lz4 decompression failed: {}", e)))?
        }
        CompressionMethod::Zlib => {
            let mut out = Vec::new();
            ZlibDecoder::new(data)
                .take(limit.saturating_add(1))
                .read_to_end(&mut out)
                .map_err(|e| Error::compression(format!("zlib decompression failed: {}", e)))?;
            out
        }
    };

    if out.len() as u64 > limit {
        return Err(Error::compression(format!(
            "block decompressed to {} bytes, at most {} expected",
            out.len(),
            limit
        )));
    }
    Ok(out)
}
