//! Terminal output helpers
//!
//! Everything goes to stderr. Stdout is reserved for machine-readable output
//! (JSON, tables, tar streams written to `-`).

use console::style;
use virtback_core::utils::human_bytes;

pub fn success(msg: &str) {
    eprintln!("{} {}", style("✓").green().bold(), msg);
}

pub fn error(msg: &str) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

pub fn warning(msg: &str) {
    eprintln!("{} {}", style("⚠").yellow().bold(), msg);
}

pub fn info(msg: &str) {
    eprintln!("{} {}", style("ℹ").blue().bold(), msg);
}

pub fn header(msg: &str) {
    eprintln!("\n{}", style(msg).bold().underlined());
}

pub fn kv(key: &str, value: &str) {
    eprintln!("  {}: {}", style(key).dim(), value);
}

/// Byte count in human units, with the exact value when it is not a round
/// number of KiB.
pub fn size(key: &str, bytes: u64) {
    if bytes % 1024 == 0 {
        kv(key, &human_bytes(bytes));
    } else {
        kv(key, &format!("{} ({} bytes)", human_bytes(bytes), bytes));
    }
}

/// Checkpoint a file or job ends at, and the one it builds on.
pub fn checkpoint(name: Option<&str>, parent: Option<&str>) {
    if let Some(name) = name {
        kv("Checkpoint", &style(name).cyan().to_string());
    }
    if let Some(parent) = parent {
        kv("Parent", parent);
    }
}
