//! Collaborator trait definitions
//!
//! The hypervisor control plane, the change-tracking query and the block
//! transport live outside this workspace. The backup and restore engines talk
//! to them exclusively through these traits.

use crate::error::Result;
use crate::types::{DiskSpec, Extent};

/// Random-access byte transport to one disk (an NBD export, a local image, ...).
///
/// Each backup worker owns its own transport; implementations need to be
/// `Send` but not `Sync`.
pub trait Transport: Send {
    /// Read exactly `length` bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// Write `data` starting at `offset`.
    fn write_at(&mut self, data: &[u8], offset: u64) -> Result<()>;

    /// Virtual size of the disk in bytes.
    fn size(&self) -> Result<u64>;

    /// Largest request the transport accepts in one call.
    fn max_request_size(&self) -> u64;

    /// Make previously written data durable.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens a fresh transport connection for one disk.
pub trait TransportFactory: Send + Sync {
    fn open(&self, disk: &DiskSpec) -> Result<Box<dyn Transport>>;
}

/// Source of allocation or change information for a disk.
///
/// Implementations must return ascending, disjoint ranges that cover the
/// whole disk. The planner rejects anything else.
pub trait ExtentSource: Send + Sync {
    /// Short name used in log output
    fn name(&self) -> &'static str;

    /// Whether the source can answer a bitmap query. Inc and diff backups
    /// are refused up front for sources that cannot.
    fn supports_changes(&self) -> bool {
        false
    }

    /// Query the ranges of `disk`. `bitmap` names the checkpoint whose
    /// changes are requested; `None` asks for allocation status.
    fn query_ranges(
        &self,
        disk: &DiskSpec,
        transport: &mut dyn Transport,
        bitmap: Option<&str>,
    ) -> Result<Vec<Extent>>;
}

/// Hypervisor checkpoint management for one domain.
pub trait CheckpointController: Send + Sync {
    /// Create a checkpoint; the hypervisor starts tracking changes from here.
    fn create(&self, name: &str) -> Result<()>;

    /// Remove a checkpoint.
    fn remove(&self, name: &str) -> Result<()>;

    /// All checkpoints the hypervisor knows for the domain, oldest first.
    fn list(&self) -> Result<Vec<String>>;

    /// First checkpoint that was not created with `prefix`, if any.
    fn has_foreign(&self, prefix: &str) -> Result<Option<String>> {
        let marker = format!("{}.", prefix);
        Ok(self
            .list()?
            .into_iter()
            .find(|name| !name.starts_with(&marker)))
    }

    /// Ask the hypervisor to abort the running backup job.
    fn stop_job(&self) -> Result<()> {
        Ok(())
    }
}
