//! Replay of incremental overrides onto a base image.

use super::{BlockMap, BlockMapEntry};
use crate::cancel::CancelToken;
use camino::Utf8PathBuf;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, info};
use virtback_core::{Error, Result, Transport};

/// What a replay pass wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub entries: usize,
    pub bytes: u64,
    pub files: usize,
}

/// Write every override entry of `map` onto `base`.
///
/// Entries are applied by generation, then device offset, so a later
/// generation always lands last on any range it shares with an earlier one.
pub fn replay(
    map: &BlockMap,
    base: &mut dyn Transport,
    cancel: &CancelToken,
) -> Result<ReplaySummary> {
    let base_size = base.size()?;
    if base_size < map.virtual_size() {
        return Err(Error::invalid_config(format!(
            "base image has {} bytes, block map covers {}",
            base_size,
            map.virtual_size()
        )));
    }

    let mut entries: Vec<&BlockMapEntry> = map.overrides().collect();
    entries.sort_by_key(|entry| (entry.generation, entry.device_offset));

    let max_request = base.max_request_size().max(1);
    let mut sources: HashMap<Utf8PathBuf, File> = HashMap::new();
    let mut summary = ReplaySummary::default();

    for entry in entries {
        cancel.check()?;
        let Some(path) = &entry.source_file else {
            continue;
        };
        if !sources.contains_key(path) {
            sources.insert(path.clone(), File::open(path)?);
        }
        let Some(file) = sources.get_mut(path) else {
            continue;
        };

        debug!(
            "Replaying {}+{} from {} at {}",
            entry.device_offset, entry.length, path, entry.source_file_offset
        );
        file.seek(SeekFrom::Start(entry.source_file_offset))?;

        let mut done = 0;
        let mut buffer = Vec::new();
        while done < entry.length {
            let piece = (entry.length - done).min(max_request);
            buffer.resize(piece as usize, 0);
            file.read_exact(&mut buffer)?;
            base.write_at(&buffer, entry.device_offset + done)?;
            done += piece;
        }

        summary.entries += 1;
        summary.bytes += entry.length;
    }

    base.flush()?;
    summary.files = sources.len();
    info!(
        "Replayed {} entries ({} bytes) from {} files",
        summary.entries, summary.bytes, summary.files
    );
    Ok(summary)
}
