//! CLI command implementations

pub mod backup;
pub mod config;
pub mod info;
pub mod map;
pub mod replay;
pub mod restore;
pub mod verify;
pub mod version;

use anyhow::Result;
use camino::Utf8Path;
use virtback_backup::CancelToken;
use virtback_core::{HierarchicalConfigLoader, RuntimeConfig};

use crate::output;

/// What a successful command leaves for the exit status.
#[derive(Debug, Default)]
pub struct Outcome {
    pub warnings: Vec<String>,
}

impl Outcome {
    pub fn with_warnings(warnings: Vec<String>) -> Self {
        Self { warnings }
    }
}

/// Loader rooted at `config_dir`, or at ~/.virtback.
pub fn config_loader(config_dir: Option<&Utf8Path>) -> Result<HierarchicalConfigLoader> {
    Ok(match config_dir {
        Some(dir) => HierarchicalConfigLoader::with_dir(dir.to_path_buf()),
        None => HierarchicalConfigLoader::new()?,
    })
}

/// Resolved runtime configuration (defaults, config file, environment).
pub fn load_config(config_dir: Option<&Utf8Path>) -> Result<RuntimeConfig> {
    Ok(config_loader(config_dir)?.load_runtime_config()?)
}

/// Token that fires on the first Ctrl-C.
pub fn cancel_on_interrupt(action: &'static str) -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            output::warning(&format!("Interrupted, stopping {}", action));
            token.cancel();
        }
    });
    cancel
}
