//! Global references and positions
//!
//! A `GlobalRef` names an element by (unit, bucket, offset within bucket).
//! It does not carry a flat index, so commits that shift offsets of other
//! buckets leave it valid.

use std::fmt;
use std::ops::Sub;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use crate::memory::segment::Segment;
use crate::types::{BucketId, SegmentHandle, UnitId};

/// Opaque handle to one element of the global memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalRef {
    unit: UnitId,
    bucket: BucketId,
    offset: usize,
}

impl GlobalRef {
    /// Reference element `offset` of `bucket` at `unit`
    pub fn new(unit: UnitId, bucket: BucketId, offset: usize) -> Self {
        Self { unit, bucket, offset }
    }

    /// Target unit
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Target bucket
    pub fn bucket(&self) -> BucketId {
        self.bucket
    }

    /// Element offset within the bucket
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl fmt::Display for GlobalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}+{}", self.unit, self.bucket, self.offset)
    }
}

/// Where a reference points once resolved
#[derive(Debug, Clone)]
pub enum Resolved {
    /// Memory owned by the calling unit
    Local {
        /// Backing segment of the bucket
        segment: Arc<Segment>,
        /// Byte offset of the element
        byte_offset: usize,
    },
    /// Memory of another unit, reachable by one-sided transfer
    Remote {
        /// Owning unit
        unit: UnitId,
        /// Registration handle of the bucket
        handle: SegmentHandle,
        /// Byte offset of the element
        byte_offset: usize,
    },
}

impl Resolved {
    /// Whether the element lives in the calling unit's memory
    pub fn is_local(&self) -> bool {
        matches!(self, Resolved::Local { .. })
    }
}

/// Position within one unit's partition, in the global index space of that unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobPos {
    /// Unit the position belongs to
    pub unit: UnitId,
    /// Local offset within the unit
    pub offset: usize,
}

impl GlobPos {
    /// Position `n` elements further
    pub fn advance(self, n: usize) -> Self {
        Self { unit: self.unit, offset: self.offset + n }
    }
}

/// Distance between two positions of the same unit
impl Sub for GlobPos {
    type Output = isize;

    fn sub(self, rhs: Self) -> isize {
        debug_assert_eq!(self.unit, rhs.unit, "positions of different units");
        self.offset as isize - rhs.offset as isize
    }
}

/// Position within the calling unit's own partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LocalPos(pub usize);

impl LocalPos {
    /// Position `n` elements further
    pub fn advance(self, n: usize) -> Self {
        LocalPos(self.0 + n)
    }
}

impl Sub for LocalPos {
    type Output = isize;

    fn sub(self, rhs: Self) -> isize {
        self.0 as isize - rhs.0 as isize
    }
}

/// Lazy, restartable traversal of references over one unit's buckets
#[derive(Debug, Clone)]
pub struct GlobRange {
    unit: UnitId,
    extents: Arc<[(BucketId, usize)]>,
    bucket: usize,
    offset: usize,
    remaining: usize,
}

impl GlobRange {
    /// Range over buckets given as (id, capacity) in local offset order
    pub fn new(unit: UnitId, extents: Vec<(BucketId, usize)>) -> Self {
        let remaining = extents.iter().map(|(_, capacity)| capacity).sum();
        Self { unit, extents: extents.into(), bucket: 0, offset: 0, remaining }
    }

    /// Unit being traversed
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Fresh traversal from the first element
    pub fn restart(&self) -> Self {
        Self::new(self.unit, self.extents.to_vec())
    }
}

impl Iterator for GlobRange {
    type Item = GlobalRef;

    fn next(&mut self) -> Option<GlobalRef> {
        while let Some(&(id, capacity)) = self.extents.get(self.bucket) {
            if self.offset < capacity {
                let gref = GlobalRef::new(self.unit, id, self.offset);
                self.offset += 1;
                self.remaining -= 1;
                return Some(gref);
            }
            self.bucket += 1;
            self.offset = 0;
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for GlobRange {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_order_by_unit_bucket_offset() {
        let a = GlobalRef::new(UnitId(0), BucketId(3), 9);
        let b = GlobalRef::new(UnitId(1), BucketId(0), 0);
        let c = GlobalRef::new(UnitId(1), BucketId(0), 1);
        assert!(a < b && b < c);
        assert_eq!(b.to_string(), "unit#1/bucket#0+0");
    }

    #[test]
    fn position_difference_is_the_distance() {
        let begin = GlobPos { unit: UnitId(2), offset: 0 };
        let end = begin.advance(15);
        assert_eq!(end - begin, 15);
        assert_eq!(begin - end, -15);
        assert_eq!(LocalPos(8) - LocalPos::default(), 8);
    }

    #[test]
    fn range_walks_buckets_lazily_and_restarts() {
        let mut range = GlobRange::new(UnitId(1), vec![(BucketId(0), 2), (BucketId(4), 1)]);
        assert_eq!(range.len(), 3);
        let first = range.next().unwrap();
        assert_eq!(first, GlobalRef::new(UnitId(1), BucketId(0), 0));
        let rest: Vec<_> = range.by_ref().collect();
        assert_eq!(
            rest,
            vec![GlobalRef::new(UnitId(1), BucketId(0), 1), GlobalRef::new(UnitId(1), BucketId(4), 0)]
        );
        assert!(range.next().is_none());
        assert_eq!(range.restart().count(), 3);
    }

    #[test]
    fn empty_range_is_finite() {
        let range = GlobRange::new(UnitId(0), vec![]);
        assert_eq!(range.count(), 0);
    }
}
