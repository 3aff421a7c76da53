//! Map command

use anyhow::Result;
use tabled::{settings::Style, Table, Tabled};
use virtback_backup::{collect_chain, BlockMap, BlockMapEntry, SpinnerProgress};

use crate::cli::MapArgs;
use crate::commands::Outcome;
use crate::output;

#[derive(Tabled)]
struct EntryRow {
    offset: u64,
    length: u64,
    source: String,
    #[tabled(rename = "file offset")]
    file_offset: String,
    #[tabled(rename = "override")]
    incremental_override: bool,
}

impl From<&BlockMapEntry> for EntryRow {
    fn from(entry: &BlockMapEntry) -> Self {
        let (source, file_offset) = match &entry.source_file {
            Some(path) => (
                path.file_name().unwrap_or(path.as_str()).to_string(),
                entry.source_file_offset.to_string(),
            ),
            None => ("(zero)".to_string(), "-".to_string()),
        };
        Self {
            offset: entry.device_offset,
            length: entry.length,
            source,
            file_offset,
            incremental_override: entry.incremental_override,
        }
    }
}

pub fn run(args: MapArgs) -> Result<Outcome> {
    let spinner = SpinnerProgress::new(&format!("Mapping {}...", args.disk));
    let chain = collect_chain(&args.input, &args.disk)?;
    spinner.update(&format!("Scanning {} files", chain.len()));
    let map = BlockMap::build(&chain)?;
    spinner.finish_and_clear();

    let target = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.join(format!("{}.map.json", args.disk)));
    map.save(&target)?;

    output::header(&format!("Block map for {}", args.disk));
    output::kv("Files", &chain.len().to_string());
    output::kv("Entries", &map.entries().len().to_string());
    output::kv("Overrides", &map.overrides().count().to_string());
    output::size("Virtual size", map.virtual_size());
    let mapped: u64 = map
        .entries()
        .iter()
        .filter(|e| !e.is_zero())
        .map(|e| e.length)
        .sum();
    output::size("Mapped data", mapped);

    if args.entries {
        let rows: Vec<EntryRow> = map.entries().iter().map(EntryRow::from).collect();
        let mut table = Table::new(rows);
        table.with(Style::sharp());
        println!("\n{}", table);
    }

    output::success(&format!("Wrote {}", target));
    Ok(Outcome::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn test_entry_row() {
        let entry = BlockMapEntry {
            device_offset: 4096,
            source_file: Some(Utf8PathBuf::from("/backup/vda.inc.virtback.1.data")),
            source_file_offset: 120,
            length: 2048,
            incremental_override: true,
            next_device_offset: 6144,
            generation: 1,
        };
        let row = EntryRow::from(&entry);
        assert_eq!(row.source, "vda.inc.virtback.1.data");
        assert_eq!(row.file_offset, "120");

        let zero = BlockMapEntry {
            source_file: None,
            incremental_override: false,
            ..entry
        };
        assert_eq!(EntryRow::from(&zero).source, "(zero)");
    }
}
