//! # globmem core
//!
//! Dynamically resizable global memory for a team of cooperating units.
//! Every unit owns a partition made of buckets that it grows and shrinks
//! locally; a collective commit agrees on a new global layout, and global
//! references address elements across units through that layout.

#![warn(missing_docs)]

/// System constants
pub mod constants;

/// Identifier and error types
pub mod types;

/// Configuration and logging
pub mod core;

/// Buckets, layouts, references and the commit protocol
pub mod memory;

/// Transport seam, commit wire format and the in-process team
pub mod comms;

/// Metrics
pub mod system;

// Re-export commonly used items
pub use types::{BucketId, Epoch, Error, Result, SegmentHandle, UnitId};
pub use crate::core::config::{Config, MemoryConfig, ShrinkPolicy};
pub use memory::{CommitReport, GlobDynamicMem, GlobPos, GlobRange, GlobalLayout, GlobalRef, LocalPos, Resolved};
pub use comms::{run_team, Endpoint, Fault, LocalTeam, Transport};
