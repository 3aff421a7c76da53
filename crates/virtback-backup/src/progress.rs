//! Progress reporting for backup and restore operations.
//!
//! One byte-based bar per disk inside a shared `MultiProgress`. When progress
//! is disabled every handle is a no-op, so engines never branch on it.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

fn bytes_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{msg:>12} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Progress reporter for a multi-disk job.
#[derive(Debug, Clone)]
pub struct JobProgress {
    multi: Arc<MultiProgress>,
    enabled: bool,
}

impl JobProgress {
    /// Creates a new progress reporter drawing to stderr.
    pub fn new() -> Self {
        Self {
            multi: Arc::new(MultiProgress::new()),
            enabled: true,
        }
    }

    /// A reporter that draws nothing.
    pub fn hidden() -> Self {
        Self {
            multi: Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden())),
            enabled: false,
        }
    }

    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            Self::new()
        } else {
            Self::hidden()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Adds a bar for one disk. `total` counts data bytes only.
    pub fn add_disk(&self, name: &str, total: u64) -> DiskProgress {
        if !self.enabled {
            return DiskProgress::hidden();
        }
        let bar = self.multi.add(ProgressBar::new(total));
        bar.set_style(bytes_style());
        bar.set_message(name.to_string());
        DiskProgress { bar: Some(bar) }
    }
}

impl Default for JobProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte progress for a single disk.
#[derive(Debug, Clone, Default)]
pub struct DiskProgress {
    bar: Option<ProgressBar>,
}

impl DiskProgress {
    pub fn hidden() -> Self {
        Self { bar: None }
    }

    pub fn inc(&self, bytes: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(bytes);
        }
    }

    pub fn set_total(&self, total: u64) {
        if let Some(bar) = &self.bar {
            bar.set_length(total);
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.as_ref().map(|bar| bar.position()).unwrap_or(0)
    }

    pub fn finish(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message.to_string());
        }
    }

    pub fn abandon(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.abandon_with_message(message.to_string());
        }
    }
}

/// Simple spinner progress for operations without known size.
#[derive(Debug)]
pub struct SpinnerProgress {
    bar: ProgressBar,
}

impl SpinnerProgress {
    pub fn new(message: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub fn update(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}
