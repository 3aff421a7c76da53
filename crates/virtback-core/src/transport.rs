//! Local image transport
//!
//! A [`Transport`] over a regular file. Used by the CLI for local images and
//! as the restore target, where it relies on the filesystem keeping unwritten
//! ranges sparse.

use crate::error::{Error, Result};
use crate::traits::{Transport, TransportFactory};
use crate::types::DiskSpec;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

/// NBD servers commonly cap requests at 32 MiB.
pub const DEFAULT_MAX_REQUEST_SIZE: u64 = 32 * 1024 * 1024;

/// Transport backed by a local file.
#[derive(Debug)]
pub struct FileTransport {
    file: File,
    path: Utf8PathBuf,
    max_request_size: u64,
}

impl FileTransport {
    /// Open an existing image for reading.
    pub fn open(path: &Utf8Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_file(file, path))
    }

    /// Open an existing image for reading and writing.
    pub fn open_rw(path: &Utf8Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self::from_file(file, path))
    }

    /// Create (or truncate) a sparse image of `size` bytes.
    pub fn create(path: &Utf8Path, size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size)?;
        Ok(Self::from_file(file, path))
    }

    fn from_file(file: File, path: &Utf8Path) -> Self {
        Self {
            file,
            path: path.to_path_buf(),
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        }
    }

    /// Override the maximum request size.
    pub fn with_max_request_size(mut self, max_request_size: u64) -> Self {
        self.max_request_size = max_request_size.max(1);
        self
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Transport for FileTransport {
    fn read_at(&mut self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let size = self.size()?;
        if offset.saturating_add(length) > size {
            return Err(Error::transport(format!(
                "read of {} bytes at {} exceeds size {} of {}",
                length, offset, size, self.path
            )));
        }
        let mut buf = vec![0u8; length as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_at(&mut self, data: &[u8], offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn max_request_size(&self) -> u64 {
        self.max_request_size
    }

    fn flush(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// Opens [`FileTransport`]s using each disk's `source` as a path.
#[derive(Debug, Clone)]
pub struct FileTransportFactory {
    max_request_size: u64,
}

impl FileTransportFactory {
    pub fn new(max_request_size: u64) -> Self {
        Self { max_request_size }
    }
}

impl Default for FileTransportFactory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUEST_SIZE)
    }
}

impl TransportFactory for FileTransportFactory {
    fn open(&self, disk: &DiskSpec) -> Result<Box<dyn Transport>> {
        let path = Utf8Path::new(&disk.source);
        if !path.exists() {
            return Err(Error::transport(format!(
                "source image for disk {} not found: {}",
                disk.name, path
            )));
        }
        Ok(Box::new(
            FileTransport::open(path)?.with_max_request_size(self.max_request_size),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).expect("valid UTF-8")
    }

    #[test]
    fn test_create_is_sized_and_zeroed() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir, "disk.img");
        let mut transport = FileTransport::create(&path, 8192).unwrap();

        assert_eq!(transport.size().unwrap(), 8192);
        assert_eq!(transport.read_at(4096, 16).unwrap(), vec![0u8; 16]);
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir, "disk.img");
        let mut transport = FileTransport::create(&path, 4096).unwrap();

        transport.write_at(b"hello", 100).unwrap();
        assert_eq!(transport.read_at(100, 5).unwrap(), b"hello");
        assert_eq!(transport.size().unwrap(), 4096);
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir, "disk.img");
        let mut transport = FileTransport::create(&path, 1024).unwrap();

        let err = transport.read_at(1000, 100).unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[test]
    fn test_factory_missing_source() {
        let factory = FileTransportFactory::default();
        let disk = DiskSpec::new("sda", "raw", "/nonexistent/virtback/disk.img");
        assert!(factory.open(&disk).is_err());
    }

    #[test]
    fn test_factory_applies_request_size() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir, "disk.img");
        FileTransport::create(&path, 1024).unwrap();

        let factory = FileTransportFactory::new(4096);
        let disk = DiskSpec::new("sda", "raw", path.as_str());
        let transport = factory.open(&disk).unwrap();
        assert_eq!(transport.max_request_size(), 4096);
    }
}
