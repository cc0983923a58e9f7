//! Error types and handling for globmem
//!
//! Local errors (invalid arguments, size mismatches, out-of-range and stale
//! references) only ever concern the calling unit. Collective failures abort a
//! commit on every participant alike.

use thiserror::Error;
use super::ids::{BucketId, Epoch, SegmentHandle, UnitId};

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for globmem
#[derive(Error, Debug)]
pub enum Error {
    /// Contract violation in a call argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Shrink request that the bucket table cannot honour
    #[error("Size mismatch: {0}")]
    SizeMismatch(#[from] SizeError),

    /// Reference into a bucket that has been released
    #[error("Stale reference: {bucket} of {unit} is no longer attached")]
    StaleReference {
        /// Unit owning the released bucket
        unit: UnitId,
        /// Sequence index of the released bucket
        bucket: BucketId,
    },

    /// Reference into a bucket its owner has not committed yet
    #[error("Uncommitted reference: {bucket} of {unit} is not part of the committed layout yet")]
    UncommittedReference {
        /// Unit owning the pending bucket
        unit: UnitId,
        /// Sequence index of the pending bucket
        bucket: BucketId,
    },

    /// Local offset beyond the size of the target partition or bucket
    #[error("Out of range: offset {offset} at {unit} (size {size})")]
    OutOfRange {
        /// Target unit
        unit: UnitId,
        /// Requested offset
        offset: usize,
        /// Size the offset was checked against
        size: usize,
    },

    /// Flat global index beyond the committed global size
    #[error("Index out of range: {index} (global size {size})")]
    IndexOutOfRange {
        /// Requested flat index
        index: usize,
        /// Committed global size
        size: usize,
    },

    /// Commit aborted on all participants
    #[error("Collective failure during commit to {epoch}: {reason}")]
    CollectiveFailure {
        /// Epoch the failed commit was heading for
        epoch: Epoch,
        /// Reason reported by the failing participant
        reason: String,
    },

    /// One-sided transfer or registration errors outside of commit
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Descriptor encoding errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a shrink request is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeError {
    /// More elements requested than the unit currently holds
    #[error("cannot shrink by {requested} elements, local size is {available}")]
    ExceedsLocalSize {
        /// Requested shrink amount
        requested: usize,
        /// Current local size
        available: usize,
    },

    /// Shrink would leave part of a committed bucket behind
    #[error("shrink by {requested} spans part of committed {bucket} (capacity {capacity})")]
    PartialBucket {
        /// Committed bucket that would be cut
        bucket: BucketId,
        /// Its capacity
        capacity: usize,
        /// Elements that would remain to be removed from it
        requested: usize,
    },
}

/// Errors raised by a transport implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The team has been aborted by one of its members
    #[error("team aborted: {0}")]
    Aborted(String),

    /// A collective operation did not complete in time
    #[error("collective operation timed out after {millis}ms")]
    Timeout {
        /// Elapsed milliseconds
        millis: u64,
    },

    /// Unit id outside the team
    #[error("unknown {0}")]
    UnknownUnit(UnitId),

    /// No registered segment under this handle
    #[error("no segment {handle} registered at {unit}")]
    UnknownSegment {
        /// Owning unit
        unit: UnitId,
        /// Handle that failed to resolve
        handle: SegmentHandle,
    },

    /// Transfer outside of the registered extent
    #[error("transfer of {len} bytes at offset {offset} exceeds segment of {extent} bytes")]
    OutOfBounds {
        /// Byte offset of the transfer
        offset: usize,
        /// Transfer length
        len: usize,
        /// Segment size in bytes
        extent: usize,
    },

    /// Memory registration was refused
    #[error("registration failed: {0}")]
    Registration(String),
}

/// Descriptor encoding and validation errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Bincode encoding error
    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Bincode decoding error
    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Descriptors that cannot form a consistent layout
    #[error("inconsistent descriptors: {0}")]
    Inconsistent(String),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a collective failure for the commit heading to `epoch`
    pub fn collective(epoch: Epoch, reason: impl Into<String>) -> Self {
        Self::CollectiveFailure { epoch, reason: reason.into() }
    }

    /// Check if this error only concerns the calling unit
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_)
                | Error::SizeMismatch(_)
                | Error::StaleReference { .. }
                | Error::UncommittedReference { .. }
                | Error::OutOfRange { .. }
                | Error::IndexOutOfRange { .. }
        )
    }

    /// Check if this error aborted a collective operation
    pub fn is_collective(&self) -> bool {
        matches!(self, Error::CollectiveFailure { .. })
    }

    /// Check if this is a stale reference error
    pub fn is_stale(&self) -> bool {
        matches!(self, Error::StaleReference { .. })
    }
}
