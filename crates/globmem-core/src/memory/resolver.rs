//! Global address resolution against a committed layout
//!
//! Pure lookups: no communication, no access to bucket memory.

use crate::memory::gref::GlobalRef;
use crate::memory::layout::{BucketExtent, GlobalLayout, UnitLayout};
use crate::types::{Error, Result, SegmentHandle, UnitId};

/// Registered location of a referenced element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Owning unit
    pub unit: UnitId,
    /// Registration handle of the bucket
    pub handle: SegmentHandle,
    /// Byte offset of the element within the bucket
    pub byte_offset: usize,
    /// Bucket is in its grace period
    pub retiring: bool,
}

/// Resolver bound to one layout
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    layout: &'a GlobalLayout,
}

impl<'a> Resolver<'a> {
    /// Resolve against `layout`
    pub fn new(layout: &'a GlobalLayout) -> Self {
        Self { layout }
    }

    fn unit(&self, unit: UnitId) -> Result<&'a UnitLayout> {
        self.layout.unit(unit).ok_or_else(|| {
            Error::invalid_argument(format!("{} is not part of a team of {}", unit, self.layout.team_size()))
        })
    }

    /// Locate the bucket a reference points into.
    ///
    /// Fails with `UncommittedReference` for buckets allocated after the
    /// layout, with `StaleReference` once the bucket has left the layout and
    /// with `OutOfRange` for offsets beyond the bucket.
    pub fn resolve(&self, gref: &GlobalRef) -> Result<Placement> {
        let unit = self.unit(gref.unit())?;
        let (extent, retiring): (&BucketExtent, bool) = match unit.find(gref.bucket()) {
            Some(found) => found,
            None if gref.bucket() >= unit.next_bucket() => {
                return Err(Error::UncommittedReference { unit: gref.unit(), bucket: gref.bucket() });
            }
            None => return Err(Error::StaleReference { unit: gref.unit(), bucket: gref.bucket() }),
        };
        if gref.offset() >= extent.capacity {
            return Err(Error::OutOfRange { unit: gref.unit(), offset: gref.offset(), size: extent.capacity });
        }
        Ok(Placement {
            unit: gref.unit(),
            handle: extent.handle,
            byte_offset: gref.offset() * self.layout.element_size(),
            retiring,
        })
    }

    /// Reference to committed local element `offset` of `unit`
    pub fn locate(&self, unit: UnitId, offset: usize) -> Result<GlobalRef> {
        let layout = self.unit(unit)?;
        let (idx, extent) = layout
            .bucket_at(offset)
            .ok_or(Error::OutOfRange { unit, offset, size: layout.local_size() })?;
        let start = layout.bucket_offset(idx).unwrap_or_default();
        Ok(GlobalRef::new(unit, extent.id, offset - start))
    }

    /// Reference to the element at flat global `index`
    pub fn resolve_index(&self, index: usize) -> Result<GlobalRef> {
        let (unit, local) = self
            .layout
            .unit_at(index)
            .ok_or(Error::IndexOutOfRange { index, size: self.layout.total() })?;
        self.locate(unit.unit(), local)
    }

    /// Flat global index of a committed reference, `None` while retiring
    pub fn index_of(&self, gref: &GlobalRef) -> Result<Option<usize>> {
        let placement = self.resolve(gref)?;
        if placement.retiring {
            return Ok(None);
        }
        let unit = self.unit(gref.unit())?;
        let idx = unit.attached().iter().position(|e| e.id == gref.bucket());
        let base = self.layout.unit_offset(gref.unit()).unwrap_or_default();
        Ok(idx
            .and_then(|i| unit.bucket_offset(i))
            .map(|start| base + start + gref.offset()))
    }
}
