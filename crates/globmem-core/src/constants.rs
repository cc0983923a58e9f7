//! Global constants used throughout the globmem codebase
//!
//! This module contains compile-time constants that are shared across
//! multiple modules to ensure consistency and avoid magic numbers.

/// Default number of elements each unit allocates at construction
pub const DEFAULT_INITIAL_LOCAL_CAPACITY: usize = 0;

/// Default number of units in an in-process team
pub const DEFAULT_TEAM_UNITS: usize = 4;

/// Maximum number of units a team may contain
///
/// Bounds the size of the descriptor exchange and of the
/// per-unit offset tables held in every layout copy.
pub const MAX_UNITS: usize = 4096;

/// Default timeout for a single collective operation in milliseconds
///
/// Applies to barriers and descriptor exchanges of the in-process team.
/// A unit that does not arrive within this window aborts the team.
pub const DEFAULT_COLLECTIVE_TIMEOUT_MS: u64 = 30_000;

/// Maximum byte extent of a single unit's local partition (1TB)
///
/// Grow requests whose byte size would exceed this are rejected
/// as invalid arguments before any memory is touched.
pub const MAX_LOCAL_EXTENT_BYTES: usize = 1 << 40;

/// Epoch of a freshly constructed memory space, before the initial commit
pub const INITIAL_EPOCH: u64 = 0;

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "globmem.toml";

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "GLOBMEM_";

/// Tracing target used by the logging macros
pub const LOG_TARGET: &str = "globmem";
