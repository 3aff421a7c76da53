//! Checkpoint bookkeeping for locally attached images
//!
//! Without a hypervisor there is nobody tracking dirty blocks, but the chain
//! rules still need a checkpoint list per domain. The list is kept as JSON in
//! `<config-dir>/checkpoints/<domain>.json` and guarded by an advisory lock so
//! two jobs for the same domain cannot interleave their updates.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use virtback_core::{CheckpointController, Error, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointState {
    domain: String,
    checkpoints: Vec<CheckpointEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointEntry {
    name: String,
    created: DateTime<Utc>,
}

/// [`CheckpointController`] backed by a state file.
#[derive(Debug, Clone)]
pub struct LocalCheckpoints {
    domain: String,
    path: Utf8PathBuf,
}

impl LocalCheckpoints {
    /// State for `domain` under `config_dir`.
    pub fn new(config_dir: &Utf8Path, domain: &str) -> Result<Self> {
        let dir = config_dir.join("checkpoints");
        fs::create_dir_all(&dir)?;
        Ok(Self {
            domain: domain.to_string(),
            path: dir.join(format!("{}.json", domain)),
        })
    }

    fn lock(&self) -> Result<File> {
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(format!("{}.lock", self.path))?;
        lock.lock_exclusive()?;
        Ok(lock)
    }

    fn read(&self) -> Result<CheckpointState> {
        if !self.path.exists() {
            return Ok(CheckpointState {
                domain: self.domain.clone(),
                checkpoints: Vec::new(),
            });
        }
        let state: CheckpointState = serde_json::from_str(&fs::read_to_string(&self.path)?)?;
        if state.domain != self.domain {
            return Err(Error::invalid_config(format!(
                "{} belongs to domain {}, not {}",
                self.path, state.domain, self.domain
            )));
        }
        Ok(state)
    }

    fn write(&self, state: &CheckpointState) -> Result<()> {
        let tmp = Utf8PathBuf::from(format!("{}.tmp", self.path));
        fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Run `update` on the state under the lock and persist the result.
    fn modify(&self, update: impl FnOnce(&mut CheckpointState) -> Result<()>) -> Result<()> {
        let _lock = self.lock()?;
        let mut state = self.read()?;
        update(&mut state)?;
        self.write(&state)
    }
}

impl CheckpointController for LocalCheckpoints {
    fn create(&self, name: &str) -> Result<()> {
        tracing::debug!("Creating checkpoint {} for {}", name, self.domain);
        self.modify(|state| {
            if state.checkpoints.iter().any(|c| c.name == name) {
                return Err(Error::invalid_config(format!(
                    "checkpoint {} already exists for domain {}",
                    name, state.domain
                )));
            }
            state.checkpoints.push(CheckpointEntry {
                name: name.to_string(),
                created: Utc::now(),
            });
            Ok(())
        })
    }

    fn remove(&self, name: &str) -> Result<()> {
        tracing::debug!("Removing checkpoint {} for {}", name, self.domain);
        self.modify(|state| {
            let before = state.checkpoints.len();
            state.checkpoints.retain(|c| c.name != name);
            if state.checkpoints.len() == before {
                return Err(Error::invalid_config(format!(
                    "checkpoint {} does not exist for domain {}",
                    name, state.domain
                )));
            }
            Ok(())
        })
    }

    fn list(&self) -> Result<Vec<String>> {
        let _lock = self.lock()?;
        Ok(self
            .read()?
            .checkpoints
            .into_iter()
            .map(|c| c.name)
            .collect())
    }
}
