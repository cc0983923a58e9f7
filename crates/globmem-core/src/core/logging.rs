//! Logging macros
//!
//! Thin wrappers over `tracing` that pin every event to the `globmem`
//! target, so a single `RUST_LOG=globmem=debug` filter selects the
//! allocator and commit traffic of all units.

/// Logging macros with a fixed target
pub mod logging {

    /// Info level logging - commit completions and lifecycle events
    #[macro_export]
    macro_rules! log_info {
        ($($arg:tt)*) => {{
            tracing::info!(target: $crate::constants::LOG_TARGET, $($arg)*);
        }};
    }

    /// Warning level logging - aborted collectives and rejected requests
    #[macro_export]
    macro_rules! log_warn {
        ($($arg:tt)*) => {{
            tracing::warn!(target: $crate::constants::LOG_TARGET, $($arg)*);
        }};
    }

    /// Error level logging - failures that leave a team unusable
    #[macro_export]
    macro_rules! log_error {
        ($($arg:tt)*) => {{
            tracing::error!(target: $crate::constants::LOG_TARGET, $($arg)*);
        }};
    }

    /// Debug level logging - commit phases, grow and shrink requests
    #[macro_export]
    macro_rules! log_debug {
        ($($arg:tt)*) => {{
            tracing::debug!(target: $crate::constants::LOG_TARGET, $($arg)*);
        }};
    }

    /// Trace level logging - individual bucket transitions and transfers
    #[macro_export]
    macro_rules! log_trace {
        ($($arg:tt)*) => {{
            tracing::trace!(target: $crate::constants::LOG_TARGET, $($arg)*);
        }};
    }
}
