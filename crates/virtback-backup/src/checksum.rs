//! SHA-256 checksums for backup files.
//!
//! Every finished data file gets a `<file>.chksum` sidecar holding the hex
//! digest. Restore verifies sidecars before applying a chain.

use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use virtback_core::{Error, Result};

/// Extension of checksum sidecar files.
pub const CHECKSUM_EXTENSION: &str = "chksum";

/// Calculates the SHA-256 checksum of a file.
pub fn calculate_checksum(path: &Utf8Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn checksum_path(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{}.{}", path, CHECKSUM_EXTENSION))
}

/// Writes the sidecar for `path` and returns the digest.
pub fn write_checksum_file(path: &Utf8Path) -> Result<String> {
    let checksum = calculate_checksum(path)?;
    fs::write(checksum_path(path), format!("{}\n", checksum))?;
    Ok(checksum)
}

/// Outcome of checking a file against its sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumStatus {
    Valid,
    Missing,
    Mismatch { expected: String, actual: String },
}

/// Compares `path` with its sidecar.
pub fn verify_checksum_file(path: &Utf8Path) -> Result<ChecksumStatus> {
    let sidecar = checksum_path(path);
    if !sidecar.exists() {
        return Ok(ChecksumStatus::Missing);
    }

    let expected = fs::read_to_string(&sidecar)?.trim().to_string();
    if expected.len() != 64 {
        return Err(Error::invalid_config(format!(
            "malformed checksum file {}",
            sidecar
        )));
    }

    let actual = calculate_checksum(path)?;
    if actual == expected {
        Ok(ChecksumStatus::Valid)
    } else {
        Ok(ChecksumStatus::Mismatch { expected, actual })
    }
}

/// Writer that calculates a SHA-256 checksum while writing.
pub struct ChecksumWriter<W: Write> {
    writer: W,
    hasher: Sha256,
    bytes_written: u64,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: Sha256::new(),
            bytes_written: 0,
        }
    }

    /// Flushes the inner writer and returns it with the byte count and digest.
    pub fn finish(mut self) -> io::Result<(W, u64, String)> {
        self.writer.flush()?;
        let checksum = format!("{:x}", self.hasher.finalize());
        Ok((self.writer, self.bytes_written, checksum))
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
