//! Verify command
//!
//! Checks every finished backup file against its checksum sidecar and, for
//! stream files, walks the frame list to confirm the declared data size.
//! Missing sidecars are warnings; mismatches and damaged streams fail.

use anyhow::{anyhow, Result};
use tabled::{settings::Style, Table, Tabled};
use virtback_backup::output::{backup_files, partial_files};
use virtback_backup::{inspect, verify_checksum_file, ChecksumStatus, SpinnerProgress};
use virtback_core::StreamType;

use crate::cli::VerifyArgs;
use crate::commands::Outcome;
use crate::output;

#[derive(Tabled)]
struct VerifyRow {
    file: String,
    checksum: String,
    stream: String,
}

pub fn run(args: VerifyArgs) -> Result<Outcome> {
    let files = backup_files(&args.input)?;
    if files.is_empty() {
        return Err(anyhow!("No backup files found in {}", args.input));
    }

    let mut warnings = Vec::new();
    for partial in partial_files(&args.input)? {
        warnings.push(format!("Unfinished backup file {}", partial));
    }

    let spinner = SpinnerProgress::new("Verifying backup files...");
    let mut rows = Vec::new();
    let mut failures = 0;
    for path in &files {
        let name = path.file_name().unwrap_or(path.as_str()).to_string();
        spinner.update(&format!("Verifying {}", name));

        let checksum = match verify_checksum_file(path)? {
            ChecksumStatus::Valid => "ok".to_string(),
            ChecksumStatus::Missing => {
                warnings.push(format!("No checksum for {}", name));
                "missing".to_string()
            }
            ChecksumStatus::Mismatch { .. } => {
                failures += 1;
                "MISMATCH".to_string()
            }
        };

        let stream = if path.extension() == Some(StreamType::Raw.extension()) {
            "-".to_string()
        } else {
            match inspect(path) {
                Ok(info) if info.data_bytes() == info.metadata.data_size => "ok".to_string(),
                Ok(info) => {
                    failures += 1;
                    format!(
                        "data size {} != {}",
                        info.data_bytes(),
                        info.metadata.data_size
                    )
                }
                Err(e) => {
                    failures += 1;
                    e.to_string()
                }
            }
        };

        rows.push(VerifyRow {
            file: name,
            checksum,
            stream,
        });
    }
    spinner.finish_and_clear();

    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{}", table);

    if failures > 0 {
        return Err(anyhow!(
            "{} of {} files failed verification",
            failures,
            files.len()
        ));
    }
    output::success(&format!("{} files verified", files.len()));
    Ok(Outcome::with_warnings(warnings))
}
