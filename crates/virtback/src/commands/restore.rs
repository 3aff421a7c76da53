//! Restore command

use anyhow::{anyhow, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use std::collections::BTreeSet;
use std::fs;
use tabled::{settings::Style, Table, Tabled};
use virtback_backup::output::backup_files;
use virtback_backup::{restore_disk, JobProgress, RestoreOptions, SequenceReport};
use virtback_core::utils::human_bytes;

use crate::commands::{cancel_on_interrupt, load_config, Outcome};
use crate::output;

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Backup directory
    #[arg(short, long)]
    pub input: Utf8PathBuf,

    /// Disk to restore (repeatable, default: every disk found)
    #[arg(short, long)]
    pub disk: Vec<String>,

    /// Directory for the restored images
    #[arg(short, long)]
    pub output: Utf8PathBuf,

    /// Stop after the backup that created this checkpoint
    #[arg(long, value_name = "CHECKPOINT")]
    pub until: Option<String>,

    /// Skip checksum verification
    #[arg(long)]
    pub no_verify: bool,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Tabled)]
struct RestoreRow {
    disk: String,
    files: usize,
    #[tabled(rename = "stopped at")]
    stopped_at: String,
    data: String,
    #[tabled(rename = "virtual size")]
    virtual_size: String,
    image: String,
}

/// Disk names of the backup files in `dir`, e.g. `vda` for `vda.full.data`.
pub fn discover_disks(dir: &Utf8Path) -> Result<Vec<String>> {
    let mut disks = BTreeSet::new();
    for path in backup_files(dir)? {
        if let Some((disk, _)) = path.file_name().and_then(|name| name.split_once('.')) {
            disks.insert(disk.to_string());
        }
    }
    Ok(disks.into_iter().collect())
}

pub async fn run(args: RestoreArgs, config_dir: Option<&Utf8Path>) -> Result<Outcome> {
    let config = load_config(config_dir)?;
    if !args.input.is_dir() {
        return Err(anyhow!("Backup directory {} does not exist", args.input));
    }

    let disks = if args.disk.is_empty() {
        discover_disks(&args.input)?
    } else {
        args.disk.clone()
    };
    if disks.is_empty() {
        return Err(anyhow!("No backup files found in {}", args.input));
    }
    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create {}", args.output))?;

    output::header("Restore");
    output::kv("Input", args.input.as_str());
    output::kv("Output", args.output.as_str());
    output::kv("Disks", &disks.join(", "));
    if let Some(until) = &args.until {
        output::kv("Until", until);
    }

    let verify = config.restore.verify_checksums && !args.no_verify;
    let progress = JobProgress::from_flag(config.display.progress && !args.no_progress);
    let cancel = cancel_on_interrupt("restore");

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    for disk in disks {
        let options = RestoreOptions {
            input_dir: args.input.clone(),
            disk: disk.clone(),
            target: args.output.join(format!("{}.img", disk)),
            stop_at: args.until.clone(),
            verify_checksums: verify,
        };
        let bar = progress.add_disk(&disk, 0);
        let token = cancel.clone();
        let worker_bar = bar.clone();
        let worker_options = options.clone();
        let result = tokio::task::spawn_blocking(move || {
            restore_disk(&worker_options, &token, &worker_bar)
        })
        .await
        .map_err(|e| anyhow!("Restore worker for {} panicked: {}", disk, e))?;

        let report = match result {
            Ok(report) => {
                bar.finish("done");
                report
            }
            Err(e) => {
                bar.abandon("failed");
                return Err(e).with_context(|| format!("Failed to restore disk {}", disk));
            }
        };

        if args.until.is_some() && report.stopped_at.is_none() {
            warnings.push(format!(
                "Disk {}: checkpoint {} not reached, restored the whole chain",
                disk,
                args.until.as_deref().unwrap_or_default()
            ));
        }
        rows.push(row(&disk, &options.target, &report));
    }

    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("\n{}", table);
    if !verify {
        warnings.push("Checksums were not verified".to_string());
    }
    output::success("Restore complete");
    Ok(Outcome::with_warnings(warnings))
}

fn row(disk: &str, target: &Utf8Path, report: &SequenceReport) -> RestoreRow {
    RestoreRow {
        disk: disk.to_string(),
        files: report.applied.len(),
        stopped_at: report.stopped_at.clone().unwrap_or_else(|| "-".to_string()),
        data: human_bytes(report.data_bytes()),
        virtual_size: human_bytes(report.virtual_size),
        image: target.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_disks() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8Path::from_path(temp.path()).unwrap();
        for name in [
            "vda.full.data",
            "vda.inc.virtback.1.data",
            "vdb.copy.raw",
            "vdc.full.data.partial",
            "vda.full.data.chksum",
            "vm1.cpt",
        ] {
            fs::write(dir.join(name), b"").unwrap();
        }

        assert_eq!(discover_disks(dir).unwrap(), vec!["vda", "vdb"]);
    }
}
