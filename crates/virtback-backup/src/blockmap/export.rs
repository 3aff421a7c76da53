//! Live device mapping through an external export mechanism.

use super::{replay, BlockMap, ReplaySummary};
use crate::cancel::CancelToken;
use tracing::{info, warn};
use virtback_core::{Result, Transport};

/// Handle returned by an export session for a running export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportHandle {
    pub id: String,
    /// Device or socket the export is reachable at, if known
    pub endpoint: Option<String>,
}

/// Block-device export mechanism (an NBD server, a device-mapper table, ...).
pub trait ExportSession: Send + Sync {
    /// Whether the export resolves reads through the block map. Sessions
    /// that cannot need the overrides replayed onto the base image first.
    fn supports_lookup(&self) -> bool;

    fn start(&self, map: &BlockMap) -> Result<ExportHandle>;

    fn stop(&self, handle: ExportHandle) -> Result<()>;
}

/// A running export of a backup chain.
pub struct LiveMapping<'a> {
    session: &'a dyn ExportSession,
    handle: Option<ExportHandle>,
    replayed: Option<ReplaySummary>,
}

impl<'a> LiveMapping<'a> {
    /// Start exporting `map`. When the session cannot consult the map per
    /// read, the overrides are written onto `base` before the export starts.
    pub fn attach(
        session: &'a dyn ExportSession,
        map: &BlockMap,
        base: &mut dyn Transport,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let replayed = if !session.supports_lookup() && map.has_overrides() {
            info!("Export cannot resolve the block map, replaying overrides first");
            Some(replay(map, base, cancel)?)
        } else {
            None
        };

        let handle = session.start(map)?;
        info!(
            "Export {} started{}",
            handle.id,
            handle
                .endpoint
                .as_deref()
                .map(|e| format!(" at {}", e))
                .unwrap_or_default()
        );

        Ok(Self {
            session,
            handle: Some(handle),
            replayed,
        })
    }

    pub fn handle(&self) -> Option<&ExportHandle> {
        self.handle.as_ref()
    }

    /// Replay pass run by [`attach`](LiveMapping::attach), if any.
    pub fn replayed(&self) -> Option<&ReplaySummary> {
        self.replayed.as_ref()
    }

    /// Stop the export.
    pub fn detach(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => self.session.stop(handle),
            None => Ok(()),
        }
    }
}

impl Drop for LiveMapping<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let id = handle.id.clone();
            if let Err(e) = self.session.stop(handle) {
                warn!("Failed to stop export {}: {}", id, e);
            }
        }
    }
}
