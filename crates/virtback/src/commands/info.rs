//! Info command

use anyhow::Result;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use virtback_backup::{inspect, StreamInfo};
use virtback_stream::{FrameKind, StreamMetadata};

use crate::cli::InfoArgs;
use crate::commands::Outcome;
use crate::output;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoJson {
    path: String,
    file_size: u64,
    metadata: StreamMetadata,
    data_frames: usize,
    zero_frames: usize,
    data_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    trailer_entries: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    frames: Vec<FrameJson>,
}

#[derive(Serialize, Tabled)]
struct FrameJson {
    kind: String,
    start: u64,
    length: u64,
}

impl InfoJson {
    fn new(info: &StreamInfo, with_frames: bool) -> Self {
        let frames = if with_frames {
            info.frames
                .iter()
                .map(|f| FrameJson {
                    kind: f.kind.to_string(),
                    start: f.start,
                    length: f.length,
                })
                .collect()
        } else {
            Vec::new()
        };
        Self {
            path: info.path.to_string(),
            file_size: info.file_size,
            metadata: info.metadata.clone(),
            data_frames: info.count(FrameKind::Data),
            zero_frames: info.count(FrameKind::Zero),
            data_bytes: info.data_bytes(),
            trailer_entries: info.trailer_entries,
            frames,
        }
    }
}

pub fn run(args: InfoArgs) -> Result<Outcome> {
    let mut reports = Vec::new();
    for file in &args.files {
        reports.push(InfoJson::new(&inspect(file)?, args.frames));
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(Outcome::default());
    }

    for report in reports {
        print_report(report);
    }
    Ok(Outcome::default())
}

fn print_report(report: InfoJson) {
    let meta = &report.metadata;
    output::header(&report.path);
    output::kv("Disk", &format!("{} ({})", meta.disk_name, meta.disk_format));
    output::kv("Level", meta.level.as_str());
    output::kv("Stream version", &meta.stream_version.to_string());
    output::kv("Date", &meta.date.to_rfc3339());
    output::checkpoint(meta.created_checkpoint(), meta.parent_checkpoint.as_deref());
    output::size("Virtual size", meta.virtual_size);
    output::size("Data size", meta.data_size);
    output::size("File size", report.file_size);
    output::kv(
        "Frames",
        &format!("{} data, {} zero", report.data_frames, report.zero_frames),
    );
    match (meta.compression_method, report.trailer_entries) {
        (Some(method), Some(entries)) => {
            output::kv("Compression", &format!("{} ({} trailer entries)", method, entries))
        }
        (Some(method), None) => output::kv("Compression", method.as_str()),
        (None, _) => {}
    }

    if !report.frames.is_empty() {
        let mut table = Table::new(report.frames);
        table.with(Style::sharp());
        println!("{}", table);
    }
}
