//! Capabilities consumed from the surrounding runtime
//!
//! The allocator never talks to the network itself. Everything it needs from
//! the team (identity, collectives, registration and one-sided transfers) is
//! expressed by this trait.

use std::sync::Arc;
use crate::memory::segment::Segment;
use crate::types::{SegmentHandle, TransportError, UnitId};

/// Team communication capabilities of one unit
pub trait Transport: Send + Sync {
    /// Id of the calling unit
    fn my_id(&self) -> UnitId;

    /// Number of units in the team
    fn team_size(&self) -> usize;

    /// Block until every unit of the team has reached the barrier
    fn barrier(&self) -> Result<(), TransportError>;

    /// Contribute `payload` and receive every unit's payload, indexed by unit id
    fn all_to_all(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>, TransportError>;

    /// Make a local segment addressable by remote units
    fn register(&self, segment: Arc<Segment>) -> Result<SegmentHandle, TransportError>;

    /// Withdraw a registration made by this unit
    fn deregister(&self, handle: SegmentHandle) -> Result<(), TransportError>;

    /// Blocking one-sided read of `dst.len()` bytes at `offset` of a remote segment
    fn get(&self, unit: UnitId, handle: SegmentHandle, offset: usize, dst: &mut [u8]) -> Result<(), TransportError>;

    /// Blocking one-sided write of `src` at `offset` of a remote segment
    fn put(&self, unit: UnitId, handle: SegmentHandle, offset: usize, src: &[u8]) -> Result<(), TransportError>;

    /// Fail the current and all future collectives of the team
    fn abort(&self, reason: &str);
}

impl<X: Transport + ?Sized> Transport for Arc<X> {
    fn my_id(&self) -> UnitId {
        (**self).my_id()
    }

    fn team_size(&self) -> usize {
        (**self).team_size()
    }

    fn barrier(&self) -> Result<(), TransportError> {
        (**self).barrier()
    }

    fn all_to_all(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>, TransportError> {
        (**self).all_to_all(payload)
    }

    fn register(&self, segment: Arc<Segment>) -> Result<SegmentHandle, TransportError> {
        (**self).register(segment)
    }

    fn deregister(&self, handle: SegmentHandle) -> Result<(), TransportError> {
        (**self).deregister(handle)
    }

    fn get(&self, unit: UnitId, handle: SegmentHandle, offset: usize, dst: &mut [u8]) -> Result<(), TransportError> {
        (**self).get(unit, handle, offset, dst)
    }

    fn put(&self, unit: UnitId, handle: SegmentHandle, offset: usize, src: &[u8]) -> Result<(), TransportError> {
        (**self).put(unit, handle, offset, src)
    }

    fn abort(&self, reason: &str) {
        (**self).abort(reason)
    }
}
