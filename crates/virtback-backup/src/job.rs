//! Backup job orchestration.
//!
//! A job runs in three phases:
//!
//! 1. Prelude (single-threaded): lock and check the output directory, load
//!    and validate the checkpoint chain, create the hypervisor checkpoint.
//! 2. Fan-out: one worker per disk on a bounded pool. Each worker opens its
//!    own transport, queries extents and runs the [`BackupEngine`]. A failing
//!    disk does not stop its siblings.
//! 3. Epilogue: only when every disk succeeded, append the checkpoint to the
//!    record, write checksum sidecars and the job summary.

use crate::cancel::CancelToken;
use crate::chain::{CheckpointChain, CheckpointPlan};
use crate::checksum::write_checksum_file;
use crate::engine::{target_file_name, BackupEngine, DiskBackupResult, EngineOptions};
use crate::extents::plan_extents;
use crate::output::{write_archive, ArchiveInfo, OutputDir, OutputTarget};
use crate::progress::{DiskProgress, JobProgress};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use virtback_core::{
    BackupLevel, ChainError, CheckpointController, CompressionMethod, DiskSpec, Error,
    ExtentSource, Result, RuntimeConfig, StreamType, TransportFactory,
};

/// Everything needed to describe one backup job.
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub domain: String,
    pub disks: Vec<DiskSpec>,
    pub level: BackupLevel,
    pub target: OutputTarget,
    pub stream_type: StreamType,
    pub chunk_size: u64,
    pub compression: Option<CompressionMethod>,
    /// Maximum concurrent disks; 0 means one worker per disk
    pub worker_cap: usize,
    pub checkpoint_prefix: String,
}

impl BackupJob {
    /// New job with the default runtime settings.
    pub fn new(
        domain: impl Into<String>,
        disks: Vec<DiskSpec>,
        level: BackupLevel,
        target: OutputTarget,
    ) -> Self {
        Self {
            domain: domain.into(),
            disks,
            level,
            target,
            stream_type: StreamType::Stream,
            chunk_size: 0,
            compression: None,
            worker_cap: 0,
            checkpoint_prefix: String::new(),
        }
        .with_config(&RuntimeConfig::default())
    }

    /// Take stream type, chunking, compression, pool size and checkpoint
    /// prefix from `config`.
    pub fn with_config(mut self, config: &RuntimeConfig) -> Self {
        self.stream_type = config.backup.stream_type;
        self.chunk_size = config.backup.chunk_size;
        self.compression = config.backup.compression;
        self.worker_cap = config.backup.worker_cap;
        self.checkpoint_prefix = config.backup.checkpoint_prefix.clone();
        self
    }

    /// Number of workers for this job: `min(cap, disks)`, at least one.
    pub fn worker_count(&self) -> usize {
        let disks = self.disks.len().max(1);
        match self.worker_cap {
            0 => disks,
            cap => cap.min(disks),
        }
    }

    fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            level: self.level,
            stream_type: self.stream_type,
            chunk_size: self.chunk_size,
            compression: self.compression,
        }
    }
}

/// External systems a job talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub transports: Arc<dyn TransportFactory>,
    pub extents: Arc<dyn ExtentSource>,
    pub checkpoints: Arc<dyn CheckpointController>,
}

/// Outcome of a successful job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub domain: String,
    pub level: BackupLevel,
    pub checkpoint: Option<CheckpointPlan>,
    pub disks: Vec<DiskBackupResult>,
    pub warnings: Vec<String>,
    pub archive: Option<ArchiveInfo>,
    pub duration_seconds: f64,
}

impl JobReport {
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn data_bytes(&self) -> u64 {
        self.disks.iter().map(|d| d.data_bytes).sum()
    }
}

/// Job summary persisted next to the backup files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub domain: String,
    pub level: BackupLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_checkpoint: Option<String>,
    pub date: DateTime<Utc>,
    pub created_by: String,
    pub disks: Vec<DiskBackupResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

fn summary_file_name(domain: &str, level: BackupLevel, timestamp: &str) -> String {
    format!("{}.{}.{}.summary.json", domain, level, timestamp)
}

/// Run a backup job to completion.
///
/// Returns [`Error::JobFailed`] when any disk failed and [`Error::Cancelled`]
/// when `cancel` fired; in both cases the checkpoint record is untouched.
pub async fn run_backup(
    job: BackupJob,
    collaborators: Collaborators,
    cancel: CancelToken,
    progress: JobProgress,
) -> Result<JobReport> {
    let started = Instant::now();
    job.target.validate(job.level)?;
    let engine = Arc::new(BackupEngine::new(job.engine_options())?);
    if job.disks.is_empty() {
        return Err(Error::invalid_config(format!(
            "domain {} has no disks to back up",
            job.domain
        )));
    }

    // Archive output is assembled in a scratch directory first.
    let scratch = match &job.target {
        OutputTarget::Archive(_) => Some(tempfile::tempdir()?),
        OutputTarget::Directory(_) => None,
    };
    let work_dir = match (&job.target, &scratch) {
        (OutputTarget::Directory(path), _) => path.clone(),
        (OutputTarget::Archive(_), Some(dir)) => Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|_| Error::invalid_config("temporary directory is not valid UTF-8"))?,
        (OutputTarget::Archive(_), None) => {
            return Err(Error::invalid_config("archive scratch directory missing"))
        }
    };

    let output = OutputDir::prepare(&work_dir, job.level)?;
    tracing::info!(
        "Starting {} backup of {} ({} disks) into {}",
        job.level,
        job.domain,
        job.disks.len(),
        output.path()
    );

    let (mut chain, checkpoint) = prepare_checkpoint(&job, &collaborators, output.path())?;
    let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();

    let results = fan_out(
        &job,
        &collaborators,
        engine,
        checkpoint.clone(),
        output.path(),
        &timestamp,
        &cancel,
        &progress,
    )
    .await;

    if cancel.is_cancelled() {
        tracing::warn!("Backup of {} cancelled, leaving partial files", job.domain);
        if let Err(e) = collaborators.checkpoints.stop_job() {
            tracing::warn!("Failed to stop hypervisor backup job: {}", e);
        }
        return Err(Error::Cancelled);
    }

    let mut disks = Vec::with_capacity(results.len());
    let mut failed = Vec::new();
    for (name, result) in results {
        match result {
            Ok(disk) => disks.push(disk),
            Err(e) => {
                tracing::error!("{}", Error::disk_backup_failed(&name, e.to_string()));
                failed.push(name);
            }
        }
    }
    if !failed.is_empty() {
        failed.sort();
        return Err(Error::JobFailed {
            total: job.disks.len(),
            disks: failed,
        });
    }
    disks.sort_by(|a, b| a.disk.cmp(&b.disk));

    // Epilogue
    if let (Some(chain), Some(plan)) = (chain.as_mut(), checkpoint.as_ref()) {
        if plan.persist {
            chain.append(&plan.name)?;
        }
    }

    let mut warnings: Vec<String> = disks.iter().flat_map(|d| d.warnings.clone()).collect();
    for disk in &disks {
        if let Err(e) = write_checksum_file(&disk.path) {
            let message = format!("failed to write checksum for {}: {}", disk.path, e);
            tracing::warn!("{}", message);
            warnings.push(message);
        }
    }

    let summary = JobSummary {
        domain: job.domain.clone(),
        level: job.level,
        checkpoint: checkpoint.as_ref().map(|c| c.name.clone()),
        parent_checkpoint: checkpoint.as_ref().and_then(|c| c.parent.clone()),
        date: Utc::now(),
        created_by: format!("virtback v{}", env!("CARGO_PKG_VERSION")),
        disks: disks.clone(),
        warnings: warnings.clone(),
    };
    let summary_path = output
        .path()
        .join(summary_file_name(&job.domain, job.level, &timestamp));
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)?;

    let archive = match &job.target {
        OutputTarget::Archive(target) => {
            let work = output.path().to_path_buf();
            drop(output);
            Some(write_archive(&work, target)?)
        }
        OutputTarget::Directory(_) => None,
    };

    let duration_seconds = started.elapsed().as_secs_f64();
    tracing::info!(
        "Backup of {} finished in {:.1}s with {} warnings",
        job.domain,
        duration_seconds,
        warnings.len()
    );

    Ok(JobReport {
        domain: job.domain,
        level: job.level,
        checkpoint,
        disks,
        warnings,
        archive,
        duration_seconds,
    })
}

/// Load and validate the chain, then create the checkpoint for this job.
fn prepare_checkpoint(
    job: &BackupJob,
    collaborators: &Collaborators,
    dir: &Utf8Path,
) -> Result<(Option<CheckpointChain>, Option<CheckpointPlan>)> {
    if !job.level.uses_checkpoint() {
        return Ok((None, None));
    }

    if job.level.is_incremental() && !collaborators.extents.supports_changes() {
        return Err(Error::invalid_config(format!(
            "{} extent source cannot report changed blocks; {} backups need change tracking",
            collaborators.extents.name(),
            job.level
        )));
    }

    let controller = &collaborators.checkpoints;
    let mut chain = CheckpointChain::load(dir, &job.domain, &job.checkpoint_prefix)?;
    if let Some(name) = controller.has_foreign(&job.checkpoint_prefix)? {
        return Err(ChainError::ForeignCheckpoint { name }.into());
    }

    let existing = controller.list()?;
    chain.validate(job.level, &existing)?;

    if job.level == BackupLevel::Full {
        for name in existing.iter().filter(|name| chain.owns(name)) {
            tracing::info!("Removing checkpoint {}", name);
            controller.remove(name)?;
        }
    }

    let plan = chain.plan(job.level)?;
    if let Some(plan) = &plan {
        // Diff backups do not advance the chain, so they leave no checkpoint behind.
        if plan.persist {
            tracing::info!("Creating checkpoint {}", plan.name);
            controller.create(&plan.name)?;
        }
    }

    Ok((Some(chain), plan))
}

type DiskOutcome = (String, Result<DiskBackupResult>);

#[allow(clippy::too_many_arguments)]
async fn fan_out(
    job: &BackupJob,
    collaborators: &Collaborators,
    engine: Arc<BackupEngine>,
    checkpoint: Option<CheckpointPlan>,
    dir: &Utf8Path,
    timestamp: &str,
    cancel: &CancelToken,
    progress: &JobProgress,
) -> Vec<DiskOutcome> {
    let semaphore = Arc::new(Semaphore::new(job.worker_count()));
    let mut futures = FuturesUnordered::new();
    tracing::debug!("Dispatching {} disks on {} workers", job.disks.len(), job.worker_count());

    for disk in job.disks.clone() {
        let sem = semaphore.clone();
        let collaborators = collaborators.clone();
        let engine = engine.clone();
        let checkpoint = checkpoint.clone();
        let cancel = cancel.clone();
        let bar = progress.add_disk(&disk.name, 0);
        let name = disk.name.clone();
        let target = target_file_name(&disk.name, engine.options(), checkpoint.as_ref(), timestamp)
            .map(|file| dir.join(file));

        futures.push(async move {
            let _permit = sem.acquire_owned().await.ok();
            let target = match target {
                Ok(target) => target,
                Err(e) => return (name, Err(e)),
            };

            let task = tokio::task::spawn_blocking(move || {
                backup_one(
                    &disk,
                    &collaborators,
                    &engine,
                    checkpoint.as_ref(),
                    &target,
                    &cancel,
                    &bar,
                )
            });
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(Error::disk_backup_failed(&name, format!("worker panicked: {}", e))),
            };
            (name, result)
        });
    }

    let mut results = Vec::new();
    while let Some(outcome) = futures.next().await {
        results.push(outcome);
    }
    results
}

fn backup_one(
    disk: &DiskSpec,
    collaborators: &Collaborators,
    engine: &BackupEngine,
    checkpoint: Option<&CheckpointPlan>,
    target: &Utf8Path,
    cancel: &CancelToken,
    progress: &DiskProgress,
) -> Result<DiskBackupResult> {
    cancel.check()?;
    let mut transport = collaborators.transports.open(disk)?;
    let virtual_size = transport.size()?;

    let bitmap = checkpoint.and_then(|c| c.parent.as_deref());
    let ranges = collaborators
        .extents
        .query_ranges(disk, transport.as_mut(), bitmap)?;
    let plan = plan_extents(&disk.name, ranges, virtual_size)?;
    progress.set_total(plan.thin_backup_size);

    let result = engine.backup_disk(
        disk,
        transport.as_mut(),
        &plan,
        checkpoint,
        target,
        cancel,
        progress,
    );
    match &result {
        Ok(_) => progress.finish("done"),
        Err(e) if e.is_cancelled() => progress.abandon("cancelled"),
        Err(_) => progress.abandon("failed"),
    }
    result
}
