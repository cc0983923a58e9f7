/// Type definitions shared by every globmem module

/// Identifier types
pub mod ids;
/// System-wide error types
pub mod error;

pub use ids::{BucketId, Epoch, SegmentHandle, UnitId};
pub use error::{Error, ProtocolError, Result, SizeError, TransportError};
