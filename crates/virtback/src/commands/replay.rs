//! Replay command

use anyhow::{anyhow, Result};
use virtback_backup::{collect_chain, replay, BlockMap};
use virtback_core::{utils::human_bytes, FileTransport};

use crate::cli::ReplayArgs;
use crate::commands::{cancel_on_interrupt, Outcome};
use crate::output;

pub async fn run(args: ReplayArgs) -> Result<Outcome> {
    let map = match &args.map {
        Some(path) => BlockMap::load(path)?,
        None => BlockMap::build(&collect_chain(&args.input, &args.disk)?)?,
    };

    output::header(&format!("Replay {} onto {}", args.disk, args.base));
    if !map.has_overrides() {
        output::info("The chain has no incremental data, base image is current");
        return Ok(Outcome::default());
    }
    output::kv("Overrides", &map.overrides().count().to_string());

    let cancel = cancel_on_interrupt("replay");
    let base = args.base.clone();
    let summary = tokio::task::spawn_blocking(move || {
        let mut transport = FileTransport::open_rw(&base)?;
        replay(&map, &mut transport, &cancel)
    })
    .await
    .map_err(|e| anyhow!("Replay worker panicked: {}", e))??;

    output::success(&format!(
        "Replayed {} entries ({}) from {} files",
        summary.entries,
        human_bytes(summary.bytes),
        summary.files
    ));
    Ok(Outcome::default())
}
