//! Virtback backup engines
//!
//! This crate captures virtual machine disks into thin-provisioned sparse
//! stream files, keeps the checkpoint chain that links full, incremental and
//! differential backups, restores chains into sparse images and maps a chain
//! for live device access.
//!
//! # Features
//!
//! ## Backup
//! - **Checkpoint chains**: generation numbering, foreign checkpoint detection
//! - **Extent planning**: strict validation of change-tracking ranges
//! - **Parallel capture**: one worker per disk, failures isolated per disk
//! - **Chunking and compression**: lz4 or zlib with a per-frame trailer
//! - **Safe publication**: `.partial` files, checksums, job summary
//!
//! ## Restore
//! - **Chain discovery**: orders a disk's files from their metadata
//! - **Point-in-time**: stop after a named checkpoint
//! - **Block mapping**: offset table and replay of incremental overrides
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use virtback_backup::{
//!     run_backup, BackupJob, CancelToken, ChangeListSource, Collaborators, JobProgress,
//!     OutputTarget,
//! };
//! use virtback_core::{BackupLevel, DiskSpec, FileTransportFactory};
//!
//! # struct Hypervisor;
//! # impl virtback_core::CheckpointController for Hypervisor {
//! #     fn create(&self, _: &str) -> virtback_core::Result<()> { Ok(()) }
//! #     fn remove(&self, _: &str) -> virtback_core::Result<()> { Ok(()) }
//! #     fn list(&self) -> virtback_core::Result<Vec<String>> { Ok(vec![]) }
//! # }
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let job = BackupJob::new(
//!         "vm1",
//!         vec![DiskSpec::new("vda", "raw", "/var/lib/images/vm1.img")],
//!         BackupLevel::Full,
//!         OutputTarget::Directory("/backup/vm1".into()),
//!     );
//!     let collaborators = Collaborators {
//!         transports: Arc::new(FileTransportFactory::default()),
//!         extents: Arc::new(ChangeListSource::new("/var/lib/virtback/changes")),
//!         checkpoints: Arc::new(Hypervisor),
//!     };
//!
//!     let report = run_backup(job, collaborators, CancelToken::new(), JobProgress::hidden()).await?;
//!     println!("Backed up {} bytes", report.data_bytes());
//!     Ok(())
//! }
//! ```

pub mod blockmap;
pub mod cancel;
pub mod chain;
pub mod checksum;
pub mod engine;
pub mod extents;
pub mod job;
pub mod output;
pub mod progress;
pub mod restore;

// Re-export commonly used types
pub use blockmap::{
    replay, BlockMap, BlockMapEntry, ExportHandle, ExportSession, LiveMapping, ReplaySummary,
};
pub use cancel::CancelToken;
pub use chain::{CheckpointChain, CheckpointPlan, RECORD_EXTENSION};
pub use checksum::{
    calculate_checksum, verify_checksum_file, write_checksum_file, ChecksumStatus,
    CHECKSUM_EXTENSION,
};
pub use engine::{BackupEngine, DiskBackupResult, EngineOptions, MAX_CHUNK_SIZE, PARTIAL_SUFFIX};
pub use extents::{
    plan_extents, source_from_config, ChangeListSource, ExtentPlan, QemuImgMapSource,
    ZeroScanSource,
};
pub use job::{run_backup, BackupJob, Collaborators, JobReport, JobSummary};
pub use output::{ArchiveInfo, OutputDir, OutputTarget, LOCK_FILE_NAME};
pub use progress::{DiskProgress, JobProgress, SpinnerProgress};
pub use restore::{
    collect_chain, inspect, restore_disk, restore_sequence, ChainFile, RestoreEngine,
    RestoreOptions, RestoreStep, RestoreSummary, SequenceReport, StreamInfo,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
