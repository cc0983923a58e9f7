//! Buckets: contiguous local memory extents with a lifecycle state

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::Arc;
use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use crate::memory::segment::Segment;
use crate::types::{BucketId, Error, Result, SegmentHandle, UnitId};

/// Lifecycle state of a bucket
///
/// `PendingNew` → (commit) → `Valid` → (shrink consuming it) → `PendingDetach`
/// → (commit, excluded from the layout) → released at the following commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BucketState {
    /// Committed and part of the global layout
    Valid,
    /// Allocated locally, not yet committed
    PendingNew,
    /// Committed, consumed by a shrink, awaiting exclusion from the layout
    PendingDetach,
}

/// Single contiguous extent of `capacity` elements of `T` owned by one unit
pub struct Bucket<T> {
    unit: UnitId,
    id: BucketId,
    capacity: usize,
    state: BucketState,
    segment: Arc<Segment>,
    /// Registration handle, present once the bucket has been attached
    handle: Option<SegmentHandle>,
    /// Committed extent still serving the leading elements until this
    /// bucket's commit takes them over
    relocation: Option<Relocation>,
    _marker: PhantomData<T>,
}

/// Leading elements of a relocated bucket that live in the source extent
#[derive(Debug, Clone)]
struct Relocation {
    source: Arc<Segment>,
    len: usize,
}

impl<T: Pod> Bucket<T> {
    /// Size of one element in bytes
    pub const ELEMENT_SIZE: usize = mem::size_of::<T>();

    /// Allocate a zeroed pending bucket
    pub(crate) fn pending(unit: UnitId, id: BucketId, capacity: usize) -> Self {
        Self {
            unit,
            id,
            capacity,
            state: BucketState::PendingNew,
            segment: Arc::new(Segment::zeroed(capacity * Self::ELEMENT_SIZE)),
            handle: None,
            relocation: None,
            _marker: PhantomData,
        }
    }

    /// Allocate a pending bucket taking over the first `capacity` elements
    /// of the committed bucket `source`.
    ///
    /// Until the commit copies them over, those elements are read and written
    /// in `source`'s extent, which the committed layout still routes peers to.
    pub(crate) fn pending_relocation(id: BucketId, source: &Bucket<T>, capacity: usize) -> Self {
        let mut bucket = Self::pending(source.unit, id, capacity);
        bucket.relocation = Some(Relocation { source: source.segment.clone(), len: capacity });
        bucket
    }

    /// Owning unit
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Sequence index within the owning unit
    pub fn id(&self) -> BucketId {
        self.id
    }

    /// Capacity in elements
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current lifecycle state
    pub fn state(&self) -> BucketState {
        self.state
    }

    /// Registration handle, if attached
    pub fn handle(&self) -> Option<SegmentHandle> {
        self.handle
    }

    /// Memory this bucket registers with the transport
    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    /// Whether leading elements still live in the extent of a detached bucket
    pub fn is_relocating(&self) -> bool {
        self.relocation.is_some()
    }

    /// Extent and byte offset currently holding element `offset`
    pub fn backing(&self, offset: usize) -> (&Arc<Segment>, usize) {
        let byte_offset = offset * Self::ELEMENT_SIZE;
        match &self.relocation {
            Some(r) if offset < r.len => (&r.source, byte_offset),
            _ => (&self.segment, byte_offset),
        }
    }

    /// Counted in the unit's current local size
    pub fn is_live(&self) -> bool {
        self.state != BucketState::PendingDetach
    }

    /// Part of the last committed layout
    pub fn is_committed(&self) -> bool {
        matches!(self.state, BucketState::Valid | BucketState::PendingDetach)
    }

    /// Read the element at `offset`
    pub fn get(&self, offset: usize) -> Result<T> {
        self.check(offset)?;
        let mut value = T::zeroed();
        let (segment, byte_offset) = self.backing(offset);
        segment.read_at(byte_offset, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    /// Write the element at `offset`
    pub fn set(&self, offset: usize, value: T) -> Result<()> {
        self.check(offset)?;
        let (segment, byte_offset) = self.backing(offset);
        segment.write_at(byte_offset, bytemuck::bytes_of(&value))?;
        Ok(())
    }

    /// Grow or shrink an uncommitted bucket in place
    pub(crate) fn resize_pending(&mut self, capacity: usize) {
        debug_assert_eq!(self.state, BucketState::PendingNew);
        self.segment.resize(capacity * Self::ELEMENT_SIZE);
        self.capacity = capacity;
        if let Some(r) = &mut self.relocation {
            r.len = r.len.min(capacity);
        }
    }

    /// Copy the relocated elements from the source extent into this bucket's
    /// own segment. Peers must no longer access the source.
    pub(crate) fn copy_relocated(&self) -> Result<()> {
        if let Some(r) = &self.relocation {
            let bytes = r.source.prefix(r.len * Self::ELEMENT_SIZE);
            self.segment.write_at(0, &bytes)?;
        }
        Ok(())
    }

    /// Stop routing to the source extent once the copy is committed
    pub(crate) fn finish_relocation(&mut self) {
        self.relocation = None;
    }

    pub(crate) fn set_state(&mut self, state: BucketState) {
        self.state = state;
    }

    pub(crate) fn set_handle(&mut self, handle: Option<SegmentHandle>) {
        self.handle = handle;
    }

    fn check(&self, offset: usize) -> Result<()> {
        if offset >= self.capacity {
            return Err(Error::OutOfRange { unit: self.unit, offset, size: self.capacity });
        }
        Ok(())
    }
}

impl<T> fmt::Debug for Bucket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("unit", &self.unit)
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("state", &self.state)
            .field("handle", &self.handle)
            .field("relocating", &self.relocation.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_bucket_is_zeroed() {
        let b: Bucket<u32> = Bucket::pending(UnitId(0), BucketId(0), 4);
        assert_eq!(b.state(), BucketState::PendingNew);
        assert!(b.is_live());
        assert!(!b.is_committed());
        assert_eq!(b.segment().len(), 16);
        assert_eq!(b.get(3).unwrap(), 0);
    }

    #[test]
    fn typed_access_and_bounds() {
        let b: Bucket<i64> = Bucket::pending(UnitId(2), BucketId(5), 3);
        b.set(1, -42).unwrap();
        assert_eq!(b.get(1).unwrap(), -42);
        match b.get(3) {
            Err(Error::OutOfRange { unit, offset, size }) => {
                assert_eq!((unit, offset, size), (UnitId(2), 3, 3));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn relocation_shares_source_until_copied() {
        let b: Bucket<u16> = Bucket::pending(UnitId(0), BucketId(0), 4);
        for i in 0..4 {
            b.set(i, i as u16 + 10).unwrap();
        }
        let mut moved = Bucket::pending_relocation(BucketId(1), &b, 2);
        assert!(moved.is_relocating());
        assert_eq!(moved.capacity(), 2);
        assert_eq!(moved.get(1).unwrap(), 11);
        assert!(moved.get(2).is_err());

        // writes through either bucket land in the shared extent
        b.set(0, 500).unwrap();
        moved.set(1, 600).unwrap();
        assert_eq!(moved.get(0).unwrap(), 500);
        assert_eq!(b.get(1).unwrap(), 600);

        moved.copy_relocated().unwrap();
        moved.finish_relocation();
        b.set(0, 1).unwrap();
        assert!(!moved.is_relocating());
        assert_eq!(moved.get(0).unwrap(), 500);
        assert_eq!(moved.get(1).unwrap(), 600);
    }

    #[test]
    fn relocated_bucket_grows_past_the_shared_prefix() {
        let b: Bucket<u32> = Bucket::pending(UnitId(0), BucketId(0), 3);
        b.set(2, 9).unwrap();
        let mut moved = Bucket::pending_relocation(BucketId(1), &b, 3);
        moved.resize_pending(5);
        moved.set(4, 44).unwrap();
        assert_eq!(moved.get(2).unwrap(), 9);
        assert_eq!(moved.get(4).unwrap(), 44);
        assert!(b.get(4).is_err());

        moved.resize_pending(1);
        assert_eq!(moved.capacity(), 1);
        moved.resize_pending(3);
        assert_eq!(moved.get(2).unwrap(), 0);
    }

    #[test]
    fn in_place_resize_keeps_contents() {
        let mut b: Bucket<u16> = Bucket::pending(UnitId(0), BucketId(0), 4);
        b.set(3, 13).unwrap();
        b.resize_pending(6);
        assert_eq!(b.get(3).unwrap(), 13);
        assert_eq!(b.get(5).unwrap(), 0);
    }
}
