//! Common test utilities for virtback-backup
//!
//! In-memory stand-ins for the hypervisor, the change-tracking query and the
//! byte transport, plus fixtures for building backup jobs.

#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use virtback_backup::{
    BackupJob, BlockMap, CancelToken, Collaborators, ExportHandle, ExportSession, OutputTarget,
};
use virtback_core::{
    BackupLevel, CheckpointController, DiskSpec, Error, Extent, ExtentSource, Result, Transport,
    TransportFactory,
};

pub const MIB: u64 = 1024 * 1024;
pub const PREFIX: &str = "virtback";
pub const DOMAIN: &str = "vm1";

/// Deterministic non-zero test content.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u8).wrapping_mul(31).wrapping_add(seed)) | 1)
        .collect()
}

/// Temporary directory with a UTF-8 path.
pub fn utf8_tempdir() -> (TempDir, Utf8PathBuf) {
    let temp = TempDir::new().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, path)
}

/// Transport over a shared in-memory disk.
pub struct MemoryTransport {
    bytes: Arc<Mutex<Vec<u8>>>,
    max_request: u64,
    cancel_on_read: Option<CancelToken>,
    reads: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl Transport for MemoryTransport {
    fn read_at(&mut self, offset: u64, length: u64) -> Result<Vec<u8>> {
        if let Some(token) = &self.cancel_on_read {
            token.cancel();
        }
        if length > self.max_request {
            return Err(Error::transport(format!(
                "request of {} bytes exceeds limit {}",
                length, self.max_request
            )));
        }
        let bytes = self.bytes.lock().unwrap();
        let end = (offset + length) as usize;
        if end > bytes.len() {
            return Err(Error::transport(format!("read past end at {}", offset)));
        }
        self.reads.lock().unwrap().push((offset, length));
        Ok(bytes[offset as usize..end].to_vec())
    }

    fn write_at(&mut self, data: &[u8], offset: u64) -> Result<()> {
        let mut bytes = self.bytes.lock().unwrap();
        let end = offset as usize + data.len();
        if end > bytes.len() {
            return Err(Error::transport(format!("write past end at {}", offset)));
        }
        bytes[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.bytes.lock().unwrap().len() as u64)
    }

    fn max_request_size(&self) -> u64 {
        self.max_request
    }
}

/// Hands out [`MemoryTransport`]s for registered disks.
pub struct MockTransportFactory {
    disks: Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>,
    failing: Mutex<HashSet<String>>,
    cancel_on_read: Mutex<Option<CancelToken>>,
    reads: Arc<Mutex<Vec<(u64, u64)>>>,
    max_request: u64,
}

impl MockTransportFactory {
    pub fn new(max_request: u64) -> Self {
        Self {
            disks: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            cancel_on_read: Mutex::new(None),
            reads: Arc::new(Mutex::new(Vec::new())),
            max_request,
        }
    }

    pub fn add_disk(&self, name: &str, bytes: Vec<u8>) -> DiskSpec {
        self.disks
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::new(Mutex::new(bytes)));
        DiskSpec::new(name, "raw", format!("memory://{}", name))
    }

    /// Overwrite part of a registered disk.
    pub fn write(&self, name: &str, offset: u64, data: &[u8]) {
        let disks = self.disks.lock().unwrap();
        let mut bytes = disks[name].lock().unwrap();
        bytes[offset as usize..offset as usize + data.len()].copy_from_slice(data);
    }

    pub fn bytes(&self, name: &str) -> Vec<u8> {
        self.disks.lock().unwrap()[name].lock().unwrap().clone()
    }

    /// Make opening `name` fail.
    pub fn fail_disk(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    /// Cancel `token` on the first read from any disk.
    pub fn cancel_on_read(&self, token: CancelToken) {
        *self.cancel_on_read.lock().unwrap() = Some(token);
    }

    pub fn reads(&self) -> Vec<(u64, u64)> {
        self.reads.lock().unwrap().clone()
    }
}

impl TransportFactory for MockTransportFactory {
    fn open(&self, disk: &DiskSpec) -> Result<Box<dyn Transport>> {
        if self.failing.lock().unwrap().contains(&disk.name) {
            return Err(Error::transport(format!("cannot connect to {}", disk.name)));
        }
        let bytes = self
            .disks
            .lock()
            .unwrap()
            .get(&disk.name)
            .cloned()
            .ok_or_else(|| Error::transport(format!("unknown disk {}", disk.name)))?;
        Ok(Box::new(MemoryTransport {
            bytes,
            max_request: self.max_request,
            cancel_on_read: self.cancel_on_read.lock().unwrap().clone(),
            reads: self.reads.clone(),
        }))
    }
}

/// Extent source answering from a per-disk table.
#[derive(Default)]
pub struct StaticExtentSource {
    ranges: Mutex<HashMap<String, Vec<Extent>>>,
    queries: Mutex<Vec<(String, Option<String>)>>,
}

impl StaticExtentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, disk: &str, extents: Vec<Extent>) {
        self.ranges
            .lock()
            .unwrap()
            .insert(disk.to_string(), extents);
    }

    /// Recorded `(disk, bitmap)` queries.
    pub fn queries(&self) -> Vec<(String, Option<String>)> {
        self.queries.lock().unwrap().clone()
    }
}

impl ExtentSource for StaticExtentSource {
    fn name(&self) -> &'static str {
        "static"
    }

    fn supports_changes(&self) -> bool {
        true
    }

    fn query_ranges(
        &self,
        disk: &DiskSpec,
        _transport: &mut dyn Transport,
        bitmap: Option<&str>,
    ) -> Result<Vec<Extent>> {
        self.queries
            .lock()
            .unwrap()
            .push((disk.name.clone(), bitmap.map(str::to_string)));
        self.ranges
            .lock()
            .unwrap()
            .get(&disk.name)
            .cloned()
            .ok_or_else(|| Error::transport(format!("no extents for {}", disk.name)))
    }
}

/// Hypervisor checkpoint list kept in memory.
#[derive(Default)]
pub struct MockCheckpoints {
    checkpoints: Mutex<Vec<String>>,
    created: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    stop_calls: AtomicUsize,
}

impl MockCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(names: &[&str]) -> Self {
        let mock = Self::new();
        *mock.checkpoints.lock().unwrap() = names.iter().map(|n| n.to_string()).collect();
        mock
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl CheckpointController for MockCheckpoints {
    fn create(&self, name: &str) -> Result<()> {
        self.checkpoints.lock().unwrap().push(name.to_string());
        self.created.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.checkpoints.lock().unwrap().retain(|n| n != name);
        self.removed.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.checkpoints.lock().unwrap().clone())
    }

    fn stop_job(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Export session that records what it was asked to do.
pub struct RecordingExport {
    lookup: bool,
    started: Mutex<Vec<usize>>,
    stopped: Mutex<Vec<String>>,
}

impl RecordingExport {
    pub fn new(lookup: bool) -> Self {
        Self {
            lookup,
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
        }
    }

    /// Entry counts of the maps passed to `start`.
    pub fn started(&self) -> Vec<usize> {
        self.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

impl ExportSession for RecordingExport {
    fn supports_lookup(&self) -> bool {
        self.lookup
    }

    fn start(&self, map: &BlockMap) -> Result<ExportHandle> {
        let mut started = self.started.lock().unwrap();
        started.push(map.entries().len());
        Ok(ExportHandle {
            id: format!("export-{}", started.len()),
            endpoint: Some("nbd://localhost:10809".to_string()),
        })
    }

    fn stop(&self, handle: ExportHandle) -> Result<()> {
        self.stopped.lock().unwrap().push(handle.id);
        Ok(())
    }
}

/// Test harness: mocks wired into [`Collaborators`].
pub struct Harness {
    pub transports: Arc<MockTransportFactory>,
    pub extents: Arc<StaticExtentSource>,
    pub checkpoints: Arc<MockCheckpoints>,
}

impl Harness {
    pub fn new(max_request: u64) -> Self {
        Self {
            transports: Arc::new(MockTransportFactory::new(max_request)),
            extents: Arc::new(StaticExtentSource::new()),
            checkpoints: Arc::new(MockCheckpoints::new()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            transports: self.transports.clone(),
            extents: self.extents.clone(),
            checkpoints: self.checkpoints.clone(),
        }
    }
}

/// Stream backup job writing into `dir`.
pub fn job(dir: &Utf8Path, level: BackupLevel, disks: Vec<DiskSpec>, chunk_size: u64) -> BackupJob {
    let mut job = BackupJob::new(
        DOMAIN,
        disks,
        level,
        OutputTarget::Directory(dir.to_path_buf()),
    );
    job.chunk_size = chunk_size;
    job.checkpoint_prefix = PREFIX.to_string();
    job
}
