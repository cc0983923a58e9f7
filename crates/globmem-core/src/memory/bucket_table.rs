//! Per-unit bucket table
//!
//! The table is the unit's private view of its partition. grow and shrink
//! act on it immediately and without communication; commit later publishes
//! the result through a `TableDescriptor`.

use std::mem;
use bytemuck::Pod;
use crate::comms::protocol::{BucketDescriptor, TableDescriptor};
use crate::constants::MAX_LOCAL_EXTENT_BYTES;
use crate::core::config::ShrinkPolicy;
use crate::memory::bucket::{Bucket, BucketState};
use crate::types::{BucketId, Epoch, Error, Result, SegmentHandle, SizeError, UnitId};
use crate::log_debug;

/// Ordered buckets of one unit, insertion order = allocation order
pub struct LocalBucketTable<T> {
    unit: UnitId,
    buckets: Vec<Bucket<T>>,
    next_id: BucketId,
    policy: ShrinkPolicy,
    max_local_capacity: Option<usize>,
}

/// One step of a planned shrink, applied only once the whole plan is valid
#[derive(Debug, Clone, Copy)]
enum ShrinkStep {
    /// Drop an uncommitted bucket entirely
    Remove(usize),
    /// Cut an uncommitted bucket down to the given capacity
    Truncate(usize, usize),
    /// Mark a committed bucket for detach
    Detach(usize),
    /// Detach a committed bucket, handing its first elements to a new bucket
    Relocate(usize, usize),
}

impl<T: Pod> LocalBucketTable<T> {
    /// Create an empty table for `unit`
    pub fn new(unit: UnitId, policy: ShrinkPolicy) -> Self {
        Self {
            unit,
            buckets: Vec::new(),
            next_id: BucketId(0),
            policy,
            max_local_capacity: None,
        }
    }

    /// Limit the local size this table may grow to
    pub fn with_max_local_capacity(mut self, max: Option<usize>) -> Self {
        self.max_local_capacity = max;
        self
    }

    /// Owning unit
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Partial shrink handling in effect
    pub fn policy(&self) -> ShrinkPolicy {
        self.policy
    }

    /// All buckets, including those pending detach
    pub fn buckets(&self) -> &[Bucket<T>] {
        &self.buckets
    }

    /// Buckets counted in the current local size, in local offset order
    pub fn live_buckets(&self) -> impl Iterator<Item = &Bucket<T>> + '_ {
        self.buckets.iter().filter(|b| b.is_live())
    }

    /// Look up a bucket by sequence index
    pub fn bucket(&self, id: BucketId) -> Option<&Bucket<T>> {
        self.buckets.iter().find(|b| b.id() == id)
    }

    /// Current local size, pending changes included
    pub fn local_size(&self) -> usize {
        self.live_buckets().map(Bucket::capacity).sum()
    }

    /// Local size as of the last commit
    pub fn committed_size(&self) -> usize {
        self.buckets
            .iter()
            .filter(|b| b.is_committed())
            .map(Bucket::capacity)
            .sum()
    }

    /// Net change of the local size since the last commit
    pub fn pending_delta(&self) -> i64 {
        self.local_size() as i64 - self.committed_size() as i64
    }

    /// Whether any bucket awaits a commit
    pub fn has_pending_changes(&self) -> bool {
        self.buckets.iter().any(|b| b.state() != BucketState::Valid)
    }

    /// Append `n` elements of capacity.
    ///
    /// Extends the tail bucket in place while it is uncommitted, otherwise
    /// appends a new pending bucket.
    pub fn grow(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let current = self.local_size();
        let target = current
            .checked_add(n)
            .ok_or_else(|| Error::invalid_argument(format!("grow by {} overflows local size {}", n, current)))?;
        self.check_extent(target)?;

        let unit = self.unit;
        if let Some(tail) = self.buckets.last_mut().filter(|b| b.state() == BucketState::PendingNew) {
            let capacity = tail.capacity() + n;
            log_debug!(unit = unit.0, bucket = tail.id().0, capacity, "extending pending bucket");
            tail.resize_pending(capacity);
            return Ok(());
        }

        let id = self.allocate_id();
        log_debug!(unit = unit.0, bucket = id.0, capacity = n, "appending pending bucket");
        self.buckets.push(Bucket::pending(unit, id, n));
        Ok(())
    }

    /// Remove `n` elements of capacity, consuming buckets from the back.
    ///
    /// Either the whole request is applied or the table is left unchanged.
    pub fn shrink(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let available = self.local_size();
        if n > available {
            return Err(SizeError::ExceedsLocalSize { requested: n, available }.into());
        }

        let steps = self.plan_shrink(n)?;
        log_debug!(unit = self.unit.0, n, steps = steps.len(), "applying shrink");

        let mut relocation = None;
        // Steps are in descending index order, so removals keep earlier indices stable
        for step in steps {
            match step {
                ShrinkStep::Remove(idx) => {
                    self.buckets.remove(idx);
                }
                ShrinkStep::Truncate(idx, capacity) => {
                    self.buckets[idx].resize_pending(capacity);
                }
                ShrinkStep::Detach(idx) => {
                    self.buckets[idx].set_state(BucketState::PendingDetach);
                }
                ShrinkStep::Relocate(idx, keep) => {
                    self.buckets[idx].set_state(BucketState::PendingDetach);
                    relocation = Some((idx, keep));
                }
            }
        }

        if let Some((idx, keep)) = relocation {
            let id = self.allocate_id();
            let relocated = Bucket::pending_relocation(id, &self.buckets[idx], keep);
            log_debug!(
                unit = self.unit.0,
                from = self.buckets[idx].id().0,
                to = id.0,
                keep,
                "relocating retained prefix of committed bucket"
            );
            self.buckets.push(relocated);
        }
        Ok(())
    }

    fn plan_shrink(&self, n: usize) -> Result<Vec<ShrinkStep>> {
        let mut remaining = n;
        let mut steps = Vec::new();

        for (idx, bucket) in self.buckets.iter().enumerate().rev() {
            if remaining == 0 {
                break;
            }
            let capacity = bucket.capacity();
            match bucket.state() {
                BucketState::PendingDetach => continue,
                BucketState::PendingNew => {
                    if capacity <= remaining {
                        steps.push(ShrinkStep::Remove(idx));
                        remaining -= capacity;
                    } else {
                        steps.push(ShrinkStep::Truncate(idx, capacity - remaining));
                        remaining = 0;
                    }
                }
                BucketState::Valid => {
                    if capacity <= remaining {
                        steps.push(ShrinkStep::Detach(idx));
                        remaining -= capacity;
                    } else {
                        match self.policy {
                            ShrinkPolicy::Strict => {
                                return Err(SizeError::PartialBucket {
                                    bucket: bucket.id(),
                                    capacity,
                                    requested: remaining,
                                }.into());
                            }
                            ShrinkPolicy::Relocate => {
                                steps.push(ShrinkStep::Relocate(idx, capacity - remaining));
                                remaining = 0;
                            }
                        }
                    }
                }
            }
        }

        debug_assert_eq!(remaining, 0);
        Ok(steps)
    }

    /// Bucket and intra-bucket offset holding local element `offset`
    pub fn locate(&self, offset: usize) -> Option<(&Bucket<T>, usize)> {
        let mut start = 0;
        for bucket in self.live_buckets() {
            if offset < start + bucket.capacity() {
                return Some((bucket, offset - start));
            }
            start += bucket.capacity();
        }
        None
    }

    /// Read local element `offset`
    pub fn get(&self, offset: usize) -> Result<T> {
        let (bucket, inner) = self.locate(offset).ok_or_else(|| self.out_of_range(offset))?;
        bucket.get(inner)
    }

    /// Write local element `offset`
    pub fn set(&self, offset: usize, value: T) -> Result<()> {
        let (bucket, inner) = self.locate(offset).ok_or_else(|| self.out_of_range(offset))?;
        bucket.set(inner, value)
    }

    /// Descriptor of the whole table as exchanged during commit
    pub fn descriptor(&self, epoch: Epoch) -> TableDescriptor {
        TableDescriptor {
            unit: self.unit,
            epoch,
            element_size: Bucket::<T>::ELEMENT_SIZE,
            next_bucket: self.next_id,
            buckets: self
                .buckets
                .iter()
                .map(|b| BucketDescriptor {
                    id: b.id(),
                    capacity: b.capacity(),
                    state: b.state(),
                    handle: b.handle(),
                })
                .collect(),
        }
    }

    /// Uncommitted buckets that still need a registration handle
    pub(crate) fn unregistered_mut(&mut self) -> impl Iterator<Item = &mut Bucket<T>> + '_ {
        self.buckets
            .iter_mut()
            .filter(|b| b.state() == BucketState::PendingNew && b.handle().is_none())
    }

    /// Forget the handles of uncommitted buckets, returning them for deregistration
    pub(crate) fn take_pending_handles(&mut self) -> Vec<SegmentHandle> {
        self.buckets
            .iter_mut()
            .filter(|b| b.state() == BucketState::PendingNew)
            .filter_map(|b| {
                let handle = b.handle();
                b.set_handle(None);
                handle
            })
            .collect()
    }

    /// Move relocated elements into the segments registered for them.
    ///
    /// Only valid once every unit has stopped accessing the previous layout.
    pub(crate) fn copy_relocations(&self) -> Result<()> {
        for bucket in self.buckets.iter().filter(|b| b.is_relocating()) {
            bucket.copy_relocated()?;
        }
        Ok(())
    }

    /// Apply a completed commit: pending buckets become valid and buckets
    /// pending detach leave the table. The detached buckets are returned so
    /// the caller can keep them alive for the grace period.
    pub(crate) fn finalize_commit(&mut self) -> Vec<Bucket<T>> {
        let (detached, mut kept): (Vec<_>, Vec<_>) = mem::take(&mut self.buckets)
            .into_iter()
            .partition(|b| b.state() == BucketState::PendingDetach);
        for bucket in kept.iter_mut() {
            if bucket.state() == BucketState::PendingNew {
                bucket.finish_relocation();
                bucket.set_state(BucketState::Valid);
            }
        }
        self.buckets = kept;
        detached
    }

    fn allocate_id(&mut self) -> BucketId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }

    fn check_extent(&self, elements: usize) -> Result<()> {
        if let Some(max) = self.max_local_capacity {
            if elements > max {
                return Err(Error::invalid_argument(format!(
                    "local size {} would exceed max local capacity {}",
                    elements, max
                )));
            }
        }
        match elements.checked_mul(Bucket::<T>::ELEMENT_SIZE) {
            Some(bytes) if bytes <= MAX_LOCAL_EXTENT_BYTES => Ok(()),
            _ => Err(Error::invalid_argument(format!(
                "local size of {} elements exceeds the addressable extent",
                elements
            ))),
        }
    }

    fn out_of_range(&self, offset: usize) -> Error {
        Error::OutOfRange { unit: self.unit, offset, size: self.local_size() }
    }
}
