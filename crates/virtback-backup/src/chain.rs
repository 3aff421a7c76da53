//! Checkpoint chain bookkeeping.
//!
//! The chain is the ordered list of checkpoints a domain's backups were
//! taken against. It is persisted as `<domain>.cpt` (a JSON list of names)
//! next to the backup files; the list index is the generation number and
//! every name is `<prefix>.<generation>`.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;
use virtback_core::{BackupLevel, ChainError, Error, Result};

/// Extension of the persisted checkpoint record.
pub const RECORD_EXTENSION: &str = "cpt";

/// The checkpoint a backup job will create and capture against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointPlan {
    /// Checkpoint name for this backup
    pub name: String,

    /// Checkpoint whose changes are captured (`None` for full)
    pub parent: Option<String>,

    /// Whether the name is appended to the record after success
    pub persist: bool,
}

#[derive(Debug, Clone)]
pub struct CheckpointChain {
    prefix: String,
    path: Utf8PathBuf,
    record: Vec<String>,
}

impl CheckpointChain {
    /// Load the record for `domain` from `dir`. A missing file is an empty chain.
    pub fn load(dir: &Utf8Path, domain: &str, prefix: &str) -> Result<Self> {
        let path = Self::record_path(dir, domain);
        let record = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            Vec::new()
        };

        tracing::debug!("Loaded {} checkpoints from {}", record.len(), path);
        Ok(Self {
            prefix: prefix.to_string(),
            path,
            record,
        })
    }

    pub fn record_path(dir: &Utf8Path, domain: &str) -> Utf8PathBuf {
        dir.join(format!("{}.{}", domain, RECORD_EXTENSION))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn checkpoints(&self) -> &[String] {
        &self.record
    }

    pub fn last(&self) -> Option<&str> {
        self.record.last().map(String::as_str)
    }

    /// Name of the checkpoint at `generation`.
    pub fn generation_name(&self, generation: usize) -> String {
        format!("{}.{}", self.prefix, generation)
    }

    /// Whether `name` was created by this chain's prefix.
    pub fn owns(&self, name: &str) -> bool {
        name.strip_prefix(&self.prefix)
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|generation| generation.parse::<usize>().is_ok())
    }

    /// Verify that the record is exactly `prefix.0 .. prefix.n`.
    pub fn check_sequence(&self) -> Result<()> {
        for (generation, found) in self.record.iter().enumerate() {
            let expected = self.generation_name(generation);
            if *found != expected {
                return Err(ChainError::Gap {
                    expected,
                    found: found.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Validate the record against the checkpoints the hypervisor reports.
    ///
    /// Full and copy levels start from scratch and are not validated.
    pub fn validate(&self, level: BackupLevel, domain_checkpoints: &[String]) -> Result<()> {
        if !level.is_incremental() {
            return Ok(());
        }

        let last = self.last().ok_or(ChainError::NoCheckpointsFound)?;
        self.check_sequence()?;

        if let Some(foreign) = domain_checkpoints
            .iter()
            .find(|name| self.owns(name) && !self.record.contains(name))
        {
            return Err(ChainError::ForeignCheckpoint {
                name: foreign.clone(),
            }
            .into());
        }

        if !domain_checkpoints.iter().any(|name| name == last) {
            return Err(ChainError::MissingParent {
                name: last.to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Decide the checkpoint for a backup at `level`.
    ///
    /// Planning a full backup resets the persisted record.
    pub fn plan(&mut self, level: BackupLevel) -> Result<Option<CheckpointPlan>> {
        match level {
            BackupLevel::Copy => Ok(None),
            BackupLevel::Full => {
                self.reset()?;
                Ok(Some(CheckpointPlan {
                    name: self.generation_name(0),
                    parent: None,
                    persist: true,
                }))
            }
            BackupLevel::Inc | BackupLevel::Diff => {
                let parent = self
                    .last()
                    .ok_or(ChainError::NoCheckpointsFound)?
                    .to_string();
                Ok(Some(CheckpointPlan {
                    name: self.generation_name(self.record.len()),
                    parent: Some(parent),
                    persist: level == BackupLevel::Inc,
                }))
            }
        }
    }

    /// Append the next generation and persist the record.
    pub fn append(&mut self, name: &str) -> Result<()> {
        let expected = self.generation_name(self.record.len());
        if name != expected {
            return Err(ChainError::Gap {
                expected,
                found: name.to_string(),
            }
            .into());
        }

        self.record.push(name.to_string());
        self.save()?;
        tracing::info!("Checkpoint {} appended to {}", name, self.path);
        Ok(())
    }

    /// Truncate the record to empty.
    pub fn reset(&mut self) -> Result<()> {
        self.record.clear();
        self.save()
    }

    fn save(&self) -> Result<()> {
        let json = serde_json::to_string(&self.record)?;
        let temp_path = self.path.with_extension(format!("{}.tmp", RECORD_EXTENSION));
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &self.path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to replace checkpoint record {}: {}", self.path, e),
            ))
        })?;
        Ok(())
    }
}
