//! # virtback-core
//!
//! Core library for virtback providing:
//! - The error taxonomy shared by every crate in the workspace
//! - Runtime configuration with hierarchical loading
//! - Domain types for disks, extents and backup levels
//! - Collaborator traits for the hypervisor, change tracking and byte transport
//! - A local sparse-file transport
//! - The process exit contract consumed by the CLI

pub mod config;
pub mod error;
pub mod exit;
pub mod traits;
pub mod transport;
pub mod types;
pub mod utils;

pub use config::HierarchicalConfigLoader;
pub use error::{ChainError, Error, Result};
pub use exit::ExitStatus;
pub use traits::{CheckpointController, ExtentSource, Transport, TransportFactory};
pub use transport::{FileTransport, FileTransportFactory, DEFAULT_MAX_REQUEST_SIZE};
pub use types::{
    BackupLevel, CompressionMethod, DiskSpec, Extent, ExtentSourceKind, RuntimeConfig, StreamType,
};
