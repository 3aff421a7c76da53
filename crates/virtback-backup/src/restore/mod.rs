//! Restore system
//!
//! Applies a chain of stream files (full or copy, then inc/diff in generation
//! order) to a sparse target image, optionally stopping at a checkpoint.

pub mod engine;
pub mod inspect;
pub mod sequence;

pub use engine::{RestoreEngine, RestoreStep, RestoreSummary};
pub use inspect::{inspect, StreamInfo};
pub use sequence::{
    collect_chain, restore_disk, restore_sequence, ChainFile, RestoreOptions, SequenceReport,
};
