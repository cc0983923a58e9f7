//! Dynamically resizable global memory
//!
//! `GlobDynamicMem` is one unit's handle on the team-wide memory. Local
//! resizes apply immediately to the unit's own bucket table; other units see
//! them only after the next collective `commit`.

use std::sync::Arc;
use arc_swap::ArcSwap;
use bytemuck::Pod;
use crate::comms::transport::Transport;
use crate::core::config::{MemoryConfig, ShrinkPolicy};
use crate::memory::bucket::Bucket;
use crate::memory::bucket_table::LocalBucketTable;
use crate::memory::commit::{self, CommitReport};
use crate::memory::gref::{GlobPos, GlobRange, GlobalRef, LocalPos, Resolved};
use crate::memory::layout::GlobalLayout;
use crate::memory::resolver::Resolver;
use crate::system::metrics;
use crate::types::{Epoch, Error, Result, UnitId};
use crate::{log_debug, log_info};

/// One unit's view of a team-wide, dynamically resizable memory of `T`
pub struct GlobDynamicMem<T: Pod, X: Transport> {
    transport: X,
    table: LocalBucketTable<T>,
    /// Buckets detached by the last commit, released by the next one
    retiring: Vec<Bucket<T>>,
    layout: ArcSwap<GlobalLayout>,
    last_commit: Option<CommitReport>,
}

impl<T: Pod, X: Transport> GlobDynamicMem<T, X> {
    /// Collectively allocate `initial_local_capacity` elements on every unit.
    ///
    /// Must be called by all units of the team; returns after the first commit.
    pub fn new(initial_local_capacity: usize, transport: X) -> Result<Self> {
        let config = MemoryConfig { initial_local_capacity, ..MemoryConfig::default() };
        Self::with_config(&config, transport)
    }

    /// Collectively allocate with explicit memory settings
    pub fn with_config(config: &MemoryConfig, transport: X) -> Result<Self> {
        let unit = transport.my_id();
        let team_size = transport.team_size();
        if team_size == 0 || unit.index() >= team_size {
            return Err(Error::invalid_argument(format!("{} is not part of a team of {}", unit, team_size)));
        }

        let mut table = LocalBucketTable::new(unit, config.shrink_policy)
            .with_max_local_capacity(config.max_local_capacity);
        if let Err(e) = table.grow(config.initial_local_capacity) {
            transport.abort(&format!("{} rejected initial capacity: {}", unit, e));
            return Err(e);
        }

        let mut mem = Self {
            transport,
            table,
            retiring: Vec::new(),
            layout: ArcSwap::from_pointee(GlobalLayout::empty(team_size, Bucket::<T>::ELEMENT_SIZE)),
            last_commit: None,
        };
        mem.commit()?;
        log_info!(
            unit = unit.0,
            team_size,
            initial_local_capacity = config.initial_local_capacity,
            "global memory allocated"
        );
        Ok(mem)
    }

    /// Calling unit
    pub fn my_id(&self) -> UnitId {
        self.transport.my_id()
    }

    /// Number of units in the team
    pub fn team_size(&self) -> usize {
        self.transport.team_size()
    }

    /// Underlying transport
    pub fn transport(&self) -> &X {
        &self.transport
    }

    /// Partial shrink handling in effect
    pub fn shrink_policy(&self) -> ShrinkPolicy {
        self.table.policy()
    }

    /// Epoch of the last completed commit
    pub fn epoch(&self) -> Epoch {
        self.layout.load().epoch()
    }

    /// Snapshot of the last committed layout
    pub fn layout(&self) -> Arc<GlobalLayout> {
        self.layout.load_full()
    }

    /// The calling unit's buckets, including those pending detach
    pub fn buckets(&self) -> &[Bucket<T>] {
        self.table.buckets()
    }

    /// Report of the last completed commit
    pub fn last_commit(&self) -> Option<&CommitReport> {
        self.last_commit.as_ref()
    }

    /// Add `n` elements to the calling unit's partition. Local only.
    pub fn grow(&mut self, n: usize) -> Result<()> {
        self.table.grow(n)?;
        metrics::record(|m| m.access.elements_grown.inc_by(n as u64));
        Ok(())
    }

    /// Remove `n` elements from the end of the calling unit's partition. Local only.
    pub fn shrink(&mut self, n: usize) -> Result<()> {
        self.table.shrink(n)?;
        metrics::record(|m| m.access.elements_shrunk.inc_by(n as u64));
        Ok(())
    }

    /// Grow or shrink the calling unit's partition so that `size()` becomes
    /// `target_total`. Local only.
    pub fn resize(&mut self, target_total: usize) -> Result<()> {
        let current = self.size();
        log_debug!(unit = self.my_id().0, current, target_total, "resize");
        if target_total >= current {
            self.grow(target_total - current)
        } else {
            self.shrink(current - target_total)
        }
    }

    /// Collectively publish every unit's pending changes as a new layout
    pub fn commit(&mut self) -> Result<CommitReport> {
        let current = self.layout.load_full();
        let (layout, report) = commit::commit(&mut self.table, &mut self.retiring, &self.transport, &current)?;
        self.layout.store(Arc::new(layout));
        self.last_commit = Some(report.clone());
        Ok(report)
    }

    /// Current local size of the calling unit, pending changes included
    pub fn local_size(&self) -> usize {
        self.table.local_size()
    }

    /// Local size of `unit`: the pending view for the calling unit, the
    /// committed size for every other unit
    pub fn local_size_of(&self, unit: UnitId) -> Result<usize> {
        if unit == self.my_id() {
            return Ok(self.table.local_size());
        }
        self.layout
            .load()
            .unit(unit)
            .map(|u| u.local_size())
            .ok_or_else(|| self.unknown_unit(unit))
    }

    /// Global size: committed sizes of other units plus the calling unit's
    /// current local size
    pub fn size(&self) -> usize {
        let layout = self.layout.load();
        let own_committed = layout.unit(self.my_id()).map(|u| u.local_size()).unwrap_or_default();
        layout.total() - own_committed + self.table.local_size()
    }

    /// First position of the calling unit's partition
    pub fn lbegin(&self) -> LocalPos {
        LocalPos(0)
    }

    /// One past the last position of the calling unit's partition
    pub fn lend(&self) -> LocalPos {
        LocalPos(self.table.local_size())
    }

    /// First position of `unit`'s partition
    pub fn lbegin_of(&self, unit: UnitId) -> Result<GlobPos> {
        self.local_size_of(unit)?;
        Ok(GlobPos { unit, offset: 0 })
    }

    /// One past the last position of `unit`'s partition
    pub fn lend_of(&self, unit: UnitId) -> Result<GlobPos> {
        let size = self.local_size_of(unit)?;
        Ok(GlobPos { unit, offset: size })
    }

    /// Read local element `offset` of the calling unit
    pub fn local_get(&self, offset: usize) -> Result<T> {
        self.table.get(offset)
    }

    /// Write local element `offset` of the calling unit
    pub fn local_set(&self, offset: usize, value: T) -> Result<()> {
        self.table.set(offset, value)
    }

    /// All elements of the calling unit's partition in local order
    pub fn local_values(&self) -> Result<Vec<T>> {
        let mut values = Vec::with_capacity(self.table.local_size());
        for bucket in self.table.live_buckets() {
            for offset in 0..bucket.capacity() {
                values.push(bucket.get(offset)?);
            }
        }
        Ok(values)
    }

    /// Overwrite the calling unit's partition with `f(local_offset)`
    pub fn fill_local(&self, mut f: impl FnMut(usize) -> T) -> Result<()> {
        let mut local = 0;
        for bucket in self.table.live_buckets() {
            for offset in 0..bucket.capacity() {
                bucket.set(offset, f(local))?;
                local += 1;
            }
        }
        Ok(())
    }

    /// Reference to local element `offset` of `unit`.
    ///
    /// Offsets into the calling unit follow its current buckets; offsets into
    /// other units follow the last committed layout. A reference into one of
    /// the caller's pending buckets fails with `UncommittedReference` on other
    /// units until the next commit.
    pub fn at(&self, unit: UnitId, offset: usize) -> Result<GlobalRef> {
        if unit == self.my_id() {
            let (bucket, inner) = self.table.locate(offset).ok_or(Error::OutOfRange {
                unit,
                offset,
                size: self.table.local_size(),
            })?;
            return Ok(GlobalRef::new(unit, bucket.id(), inner));
        }
        Resolver::new(&self.layout.load()).locate(unit, offset)
    }

    /// Reference to flat global `index` of the last committed layout
    pub fn at_index(&self, index: usize) -> Result<GlobalRef> {
        Resolver::new(&self.layout.load()).resolve_index(index)
    }

    /// Lazy traversal of references over `unit`'s partition
    pub fn unit_refs(&self, unit: UnitId) -> Result<GlobRange> {
        if unit == self.my_id() {
            let extents = self.table.live_buckets().map(|b| (b.id(), b.capacity())).collect();
            return Ok(GlobRange::new(unit, extents));
        }
        let layout = self.layout.load();
        let unit_layout = layout.unit(unit).ok_or_else(|| self.unknown_unit(unit))?;
        let extents = unit_layout.attached().iter().map(|e| (e.id, e.capacity)).collect();
        Ok(GlobRange::new(unit, extents))
    }

    /// Resolve a reference to local memory or to a remote registration
    pub fn deref(&self, gref: &GlobalRef) -> Result<Resolved> {
        let resolved = if gref.unit() == self.my_id() {
            self.deref_own(gref)
        } else {
            Resolver::new(&self.layout.load()).resolve(gref).map(|p| Resolved::Remote {
                unit: p.unit,
                handle: p.handle,
                byte_offset: p.byte_offset,
            })
        };
        if let Err(Error::StaleReference { .. }) = resolved {
            metrics::record(|m| m.access.stale_references.inc());
        }
        resolved
    }

    fn deref_own(&self, gref: &GlobalRef) -> Result<Resolved> {
        let bucket = self
            .table
            .bucket(gref.bucket())
            .or_else(|| self.retiring.iter().find(|b| b.id() == gref.bucket()))
            .ok_or(Error::StaleReference { unit: gref.unit(), bucket: gref.bucket() })?;
        if gref.offset() >= bucket.capacity() {
            return Err(Error::OutOfRange { unit: gref.unit(), offset: gref.offset(), size: bucket.capacity() });
        }
        let (segment, byte_offset) = bucket.backing(gref.offset());
        Ok(Resolved::Local { segment: segment.clone(), byte_offset })
    }

    /// Read the referenced element
    pub fn get_value(&self, gref: &GlobalRef) -> Result<T> {
        let mut value = T::zeroed();
        match self.deref(gref)? {
            Resolved::Local { segment, byte_offset } => {
                segment.read_at(byte_offset, bytemuck::bytes_of_mut(&mut value))?;
            }
            Resolved::Remote { unit, handle, byte_offset } => {
                self.transport.get(unit, handle, byte_offset, bytemuck::bytes_of_mut(&mut value))?;
                metrics::record(|m| m.access.remote_gets.inc());
            }
        }
        Ok(value)
    }

    /// Write the referenced element
    pub fn put_value(&self, gref: &GlobalRef, value: T) -> Result<()> {
        match self.deref(gref)? {
            Resolved::Local { segment, byte_offset } => {
                segment.write_at(byte_offset, bytemuck::bytes_of(&value))?;
            }
            Resolved::Remote { unit, handle, byte_offset } => {
                self.transport.put(unit, handle, byte_offset, bytemuck::bytes_of(&value))?;
                metrics::record(|m| m.access.remote_puts.inc());
            }
        }
        Ok(())
    }

    /// Copy the leading elements of `unit`'s partition into `dst`, one
    /// transfer per bucket. Returns the number of elements copied.
    pub fn copy_from_unit(&self, unit: UnitId, dst: &mut [T]) -> Result<usize> {
        if unit == self.my_id() {
            let values = self.local_values()?;
            let n = values.len().min(dst.len());
            dst[..n].copy_from_slice(&values[..n]);
            return Ok(n);
        }

        let layout = self.layout.load();
        let unit_layout = layout.unit(unit).ok_or_else(|| self.unknown_unit(unit))?;
        let mut copied = 0;
        for extent in unit_layout.attached() {
            if copied == dst.len() {
                break;
            }
            let n = extent.capacity.min(dst.len() - copied);
            let chunk = bytemuck::cast_slice_mut(&mut dst[copied..copied + n]);
            self.transport.get(unit, extent.handle, 0, chunk)?;
            metrics::record(|m| m.access.remote_gets.inc());
            copied += n;
        }
        Ok(copied)
    }

    /// Collectively withdraw every registration of this memory.
    ///
    /// Waits until all units arrive so no unit still reads released memory.
    pub fn release(self) -> Result<()> {
        self.transport.barrier()?;
        let handles = self
            .table
            .buckets()
            .iter()
            .chain(self.retiring.iter())
            .filter_map(Bucket::handle);
        for handle in handles {
            self.transport.deregister(handle)?;
        }
        log_debug!(unit = self.my_id().0, "global memory released");
        Ok(())
    }

    fn unknown_unit(&self, unit: UnitId) -> Error {
        Error::invalid_argument(format!("{} is not part of a team of {}", unit, self.team_size()))
    }
}
