/// Identifier types for units, buckets, commit epochs and registered segments.
/// All identifiers are plain integers wrapped in newtypes so that a bucket
/// sequence index can never be passed where a unit id is expected.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Team-relative identifier of a participating unit.
///
/// Units are totally ordered by id; the global layout places unit 0 first.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct UnitId(pub u32);

/// Sequence index of a bucket within its owning unit.
///
/// Assigned in allocation order and never reused, so a bucket keeps its
/// identity across commits even when its flat global offset shifts.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct BucketId(pub u64);

/// Commit epoch counter. Every successful commit advances it by one on all units.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Epoch(pub u64);

/// Opaque handle returned by memory registration.
///
/// Only meaningful together with the unit that registered it.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SegmentHandle(pub u64);

impl UnitId {
    /// Create a unit id from a zero-based index
    pub fn new(id: u32) -> Self {
        UnitId(id)
    }

    /// Index of this unit for table lookups
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Unit id for a zero-based team position
    pub fn from_index(index: usize) -> Self {
        UnitId(index as u32)
    }
}

impl BucketId {
    /// Next sequence index after this one
    pub fn next(self) -> Self {
        BucketId(self.0 + 1)
    }
}

impl Epoch {
    /// The epoch following this one
    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bucket#{}", self.0)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch {}", self.0)
    }
}

impl fmt::Display for SegmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg:{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_ids_order_by_index() {
        let mut units = vec![UnitId(3), UnitId(0), UnitId(2)];
        units.sort();
        assert_eq!(units, vec![UnitId(0), UnitId(2), UnitId(3)]);
        assert_eq!(UnitId::from_index(2).index(), 2);
    }

    #[test]
    fn display_is_readable() {
        assert_eq!(UnitId(1).to_string(), "unit#1");
        assert_eq!(BucketId(7).to_string(), "bucket#7");
        assert_eq!(Epoch(2).next().to_string(), "epoch 3");
    }
}
