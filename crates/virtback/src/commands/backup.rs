//! Backup command

use anyhow::{anyhow, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};
use virtback_backup::{
    run_backup, source_from_config, BackupJob, Collaborators, JobProgress, JobReport,
    OutputTarget,
};
use virtback_core::{utils::human_bytes, DiskSpec, FileTransportFactory, RuntimeConfig};

use crate::cli::{CompressionArg, ExtentSourceArg, LevelArg, StreamTypeArg};
use crate::commands::{cancel_on_interrupt, config_loader, Outcome};
use crate::hypervisor::LocalCheckpoints;
use crate::output;

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Domain (virtual machine) name
    #[arg(short, long)]
    pub domain: String,

    /// Disk to back up as NAME=PATH (repeatable)
    #[arg(long = "disk", value_name = "NAME=PATH", required = true, value_parser = parse_disk)]
    pub disks: Vec<DiskSpec>,

    /// Backup level
    #[arg(short, long, value_enum, default_value = "full")]
    pub level: LevelArg,

    /// Output directory
    #[arg(short, long, required_unless_present = "archive", conflicts_with = "archive")]
    pub output: Option<Utf8PathBuf>,

    /// Write a tar archive instead (copy level only, "-" for stdout)
    #[arg(long)]
    pub archive: Option<Utf8PathBuf>,

    /// Output file type
    #[arg(long, value_enum)]
    pub stream_type: Option<StreamTypeArg>,

    /// Compress data blocks
    #[arg(long, value_enum)]
    pub compress: Option<CompressionArg>,

    /// Largest single read in bytes
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Maximum disks backed up concurrently
    #[arg(long)]
    pub workers: Option<usize>,

    /// Where allocation and change information comes from
    #[arg(long, value_enum)]
    pub extent_source: Option<ExtentSourceArg>,

    /// Directory with change lists (for --extent-source change-list)
    #[arg(long)]
    pub change_list_dir: Option<Utf8PathBuf>,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress: bool,
}

/// Parse `NAME=PATH`; the format is taken from a `.qcow2` extension.
fn parse_disk(value: &str) -> std::result::Result<DiskSpec, String> {
    let (name, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got '{}'", value))?;
    if name.is_empty() || name.contains('.') || name.contains('/') {
        return Err(format!("invalid disk name '{}'", name));
    }
    if path.is_empty() {
        return Err(format!("missing path for disk '{}'", name));
    }
    let format = match Utf8Path::new(path).extension() {
        Some("qcow2") => "qcow2",
        _ => "raw",
    };
    Ok(DiskSpec::new(name, format, path))
}

impl BackupArgs {
    /// Command-line values take precedence over the configuration file.
    fn apply_to(&self, config: &mut RuntimeConfig) {
        if let Some(kind) = self.stream_type {
            config.backup.stream_type = kind.into();
        }
        if let Some(method) = self.compress {
            config.backup.compression = Some(method.into());
        }
        if let Some(size) = self.chunk_size {
            config.backup.chunk_size = size;
        }
        if let Some(workers) = self.workers {
            config.backup.worker_cap = workers;
        }
        if let Some(source) = self.extent_source {
            config.backup.extent_source = source.into();
        }
        if self.no_progress {
            config.display.progress = false;
        }
    }

    fn target(&self) -> Result<OutputTarget> {
        match (&self.output, &self.archive) {
            (Some(dir), None) => Ok(OutputTarget::Directory(dir.clone())),
            (None, Some(file)) => Ok(OutputTarget::Archive(file.clone())),
            _ => Err(anyhow!("exactly one of --output and --archive is required")),
        }
    }
}

#[derive(Tabled)]
struct DiskRow {
    disk: String,
    file: String,
    #[tabled(rename = "virtual size")]
    virtual_size: String,
    data: String,
    written: String,
    #[tabled(rename = "data frames")]
    data_frames: u64,
    #[tabled(rename = "zero frames")]
    zero_frames: u64,
}

pub async fn run(args: BackupArgs, config_dir: Option<&Utf8Path>) -> Result<Outcome> {
    let loader = config_loader(config_dir)?;
    let mut config = loader.load_runtime_config()?;
    args.apply_to(&mut config);

    let level = args.level.into();
    let target = args.target()?;
    let job = BackupJob::new(&args.domain, args.disks.clone(), level, target).with_config(&config);

    output::header(&format!("Backup {} ({})", args.domain, level));
    output::kv("Disks", &job.disks.len().to_string());
    output::kv("Stream type", config.backup.stream_type.as_str());
    if let Some(method) = config.backup.compression {
        output::kv("Compression", method.as_str());
    }
    output::kv("Workers", &job.worker_count().to_string());

    let collaborators = Collaborators {
        transports: Arc::new(FileTransportFactory::default()),
        extents: Arc::from(source_from_config(&config, args.change_list_dir.as_deref())?),
        checkpoints: Arc::new(LocalCheckpoints::new(loader.config_dir(), &args.domain)?),
    };

    let cancel = cancel_on_interrupt("backup");
    let progress = JobProgress::from_flag(config.display.progress);
    let report = run_backup(job, collaborators, cancel, progress).await?;

    print_report(&report);
    Ok(Outcome::with_warnings(report.warnings))
}

fn print_report(report: &JobReport) {
    let rows: Vec<DiskRow> = report
        .disks
        .iter()
        .map(|d| DiskRow {
            disk: d.disk.clone(),
            file: d.path.file_name().unwrap_or(d.path.as_str()).to_string(),
            virtual_size: human_bytes(d.virtual_size),
            data: human_bytes(d.data_bytes),
            written: human_bytes(d.written_bytes),
            data_frames: d.data_frames,
            zero_frames: d.zero_frames,
        })
        .collect();

    // stdout may carry the archive
    let mut table = Table::new(rows);
    table.with(Style::sharp());
    eprintln!("\n{}", table);

    if let Some(plan) = &report.checkpoint {
        let created = plan.persist.then_some(plan.name.as_str());
        output::checkpoint(created, plan.parent.as_deref());
    }
    if let Some(archive) = &report.archive {
        output::kv("Archive", archive.target.as_str());
        output::kv("Archive checksum", &archive.checksum);
    }
    output::success(&format!(
        "Backed up {} from {} disk(s) in {:.1}s",
        human_bytes(report.data_bytes()),
        report.disks.len(),
        report.duration_seconds
    ));
}
