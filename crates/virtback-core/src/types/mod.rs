//! Type definitions for backup levels, disks, extents and runtime configuration

mod backup_types;
mod runtime_config;

pub use backup_types::*;
pub use runtime_config::*;
