//! Version command

use crate::cli::VersionArgs;
use crate::commands::Outcome;
use crate::output;
use crate::version::VersionInfo;
use anyhow::Result;

pub fn run(args: VersionArgs) -> Result<Outcome> {
    let info = VersionInfo::current();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(Outcome::default());
    }

    println!("{}", info.display());
    output::kv("Compression", &info.compression.join(", "));
    if let Some(date) = &info.build_date {
        output::kv("Build date", date);
    }
    if let Some(target) = &info.target {
        output::kv("Target", target);
    }
    Ok(Outcome::default())
}
