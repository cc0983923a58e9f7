//! Global layout: the team-wide agreement on who holds which buckets
//!
//! A layout is rebuilt from the exchanged table descriptors at every commit
//! and never mutated afterwards. Units are ordered by id and buckets by
//! sequence index, so every unit derives the same layout from the same
//! descriptors.

use serde::{Deserialize, Serialize};
use crate::comms::protocol::TableDescriptor;
use crate::constants::INITIAL_EPOCH;
use crate::memory::bucket::BucketState;
use crate::types::{BucketId, Epoch, ProtocolError, SegmentHandle, UnitId};

/// A registered bucket as seen by the whole team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketExtent {
    /// Sequence index within the owning unit
    pub id: BucketId,
    /// Capacity in elements
    pub capacity: usize,
    /// Registration handle for one-sided access
    pub handle: SegmentHandle,
}

/// One unit's share of the global layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitLayout {
    unit: UnitId,
    /// Buckets addressable by offset, in sequence order
    attached: Vec<BucketExtent>,
    /// Local offset of the first element of each attached bucket
    bucket_offsets: Vec<usize>,
    /// Buckets excluded from offsets but still resolvable by reference
    retiring: Vec<BucketExtent>,
    /// Sequence indices from here on were allocated after this layout
    next_bucket: BucketId,
    local_size: usize,
}

impl UnitLayout {
    fn empty(unit: UnitId) -> Self {
        Self {
            unit,
            attached: Vec::new(),
            bucket_offsets: Vec::new(),
            retiring: Vec::new(),
            next_bucket: BucketId(0),
            local_size: 0,
        }
    }

    fn from_descriptor(desc: &TableDescriptor) -> Result<Self, ProtocolError> {
        let mut layout = Self::empty(desc.unit);
        layout.next_bucket = desc.next_bucket;
        let mut previous: Option<BucketId> = None;

        for bucket in &desc.buckets {
            if previous.is_some_and(|p| p >= bucket.id) || bucket.id >= desc.next_bucket {
                return Err(ProtocolError::Inconsistent(format!(
                    "{} lists {} out of sequence order",
                    desc.unit, bucket.id
                )));
            }
            previous = Some(bucket.id);

            let handle = bucket.handle.ok_or_else(|| {
                ProtocolError::Inconsistent(format!("{} of {} has no registration", bucket.id, desc.unit))
            })?;
            let extent = BucketExtent { id: bucket.id, capacity: bucket.capacity, handle };

            match bucket.state {
                BucketState::Valid | BucketState::PendingNew => {
                    layout.bucket_offsets.push(layout.local_size);
                    layout.local_size += bucket.capacity;
                    layout.attached.push(extent);
                }
                BucketState::PendingDetach => layout.retiring.push(extent),
            }
        }
        Ok(layout)
    }

    /// Owning unit
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Committed local size
    pub fn local_size(&self) -> usize {
        self.local_size
    }

    /// Attached buckets in sequence order
    pub fn attached(&self) -> &[BucketExtent] {
        &self.attached
    }

    /// Buckets in their grace period
    pub fn retiring(&self) -> &[BucketExtent] {
        &self.retiring
    }

    /// Local offset of the first element of the `idx`-th attached bucket
    pub fn bucket_offset(&self, idx: usize) -> Option<usize> {
        self.bucket_offsets.get(idx).copied()
    }

    /// Attached bucket holding local element `offset`, with its index
    pub fn bucket_at(&self, offset: usize) -> Option<(usize, &BucketExtent)> {
        if offset >= self.local_size {
            return None;
        }
        let idx = self.bucket_offsets.partition_point(|&start| start <= offset).checked_sub(1)?;
        self.attached.get(idx).map(|extent| (idx, extent))
    }

    /// First sequence index allocated after this layout was committed
    pub fn next_bucket(&self) -> BucketId {
        self.next_bucket
    }

    /// Look up a bucket by sequence index. The flag is set for retiring buckets.
    pub fn find(&self, id: BucketId) -> Option<(&BucketExtent, bool)> {
        if let Ok(idx) = self.attached.binary_search_by_key(&id, |e| e.id) {
            return Some((&self.attached[idx], false));
        }
        self.retiring.iter().find(|e| e.id == id).map(|e| (e, true))
    }
}

/// Immutable, team-wide layout of one epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalLayout {
    epoch: Epoch,
    element_size: usize,
    units: Vec<UnitLayout>,
    /// Global index of each unit's first element
    unit_offsets: Vec<usize>,
    total: usize,
    fingerprint: [u8; 32],
}

impl GlobalLayout {
    /// Layout before the first commit: every unit present and empty
    pub fn empty(team_size: usize, element_size: usize) -> Self {
        let units = (0..team_size).map(|i| UnitLayout::empty(UnitId::from_index(i))).collect();
        Self::assemble(Epoch(INITIAL_EPOCH), element_size, units)
    }

    /// Build the layout of `epoch` from one descriptor per unit, in unit order
    pub fn from_descriptors(
        epoch: Epoch,
        team_size: usize,
        descriptors: &[TableDescriptor],
    ) -> Result<Self, ProtocolError> {
        if descriptors.len() != team_size {
            return Err(ProtocolError::Inconsistent(format!(
                "expected {} descriptors, received {}",
                team_size,
                descriptors.len()
            )));
        }
        let element_size = descriptors.first().map(|d| d.element_size).unwrap_or_default();

        let mut units = Vec::with_capacity(team_size);
        for (idx, desc) in descriptors.iter().enumerate() {
            if desc.unit != UnitId::from_index(idx) {
                return Err(ProtocolError::Inconsistent(format!(
                    "slot {} carries the descriptor of {}",
                    idx, desc.unit
                )));
            }
            if desc.epoch != epoch {
                return Err(ProtocolError::Inconsistent(format!(
                    "{} is committing {}, expected {}",
                    desc.unit, desc.epoch, epoch
                )));
            }
            if desc.element_size != element_size {
                return Err(ProtocolError::Inconsistent(format!(
                    "{} uses {}-byte elements, expected {}",
                    desc.unit, desc.element_size, element_size
                )));
            }
            units.push(UnitLayout::from_descriptor(desc)?);
        }
        Ok(Self::assemble(epoch, element_size, units))
    }

    fn assemble(epoch: Epoch, element_size: usize, units: Vec<UnitLayout>) -> Self {
        let mut unit_offsets = Vec::with_capacity(units.len());
        let mut total = 0;
        for unit in &units {
            unit_offsets.push(total);
            total += unit.local_size;
        }
        let fingerprint = digest(epoch, element_size, &units);
        Self { epoch, element_size, units, unit_offsets, total, fingerprint }
    }

    /// Epoch this layout was committed at
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Element size in bytes
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Number of units
    pub fn team_size(&self) -> usize {
        self.units.len()
    }

    /// Committed global size in elements
    pub fn total(&self) -> usize {
        self.total
    }

    /// Per-unit layouts in unit order
    pub fn units(&self) -> &[UnitLayout] {
        &self.units
    }

    /// Layout of one unit
    pub fn unit(&self, unit: UnitId) -> Option<&UnitLayout> {
        self.units.get(unit.index())
    }

    /// Global index of the first element of `unit`
    pub fn unit_offset(&self, unit: UnitId) -> Option<usize> {
        self.unit_offsets.get(unit.index()).copied()
    }

    /// Unit holding global element `index`, with the index local to that unit
    pub fn unit_at(&self, index: usize) -> Option<(&UnitLayout, usize)> {
        if index >= self.total {
            return None;
        }
        // Empty units share their start with the next unit; the last match is the holder
        let idx = self.unit_offsets.partition_point(|&start| start <= index).checked_sub(1)?;
        let unit = self.units.get(idx)?;
        Some((unit, index - self.unit_offsets[idx]))
    }

    /// Digest identifying the layout contents, identical on every unit
    pub fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    /// Hex rendering of `fingerprint`
    pub fn fingerprint_hex(&self) -> String {
        blake3::Hash::from(self.fingerprint).to_hex().to_string()
    }
}

fn digest(epoch: Epoch, element_size: usize, units: &[UnitLayout]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&epoch.0.to_le_bytes());
    hasher.update(&(element_size as u64).to_le_bytes());
    for unit in units {
        hasher.update(&unit.unit.0.to_le_bytes());
        hasher.update(&unit.next_bucket.0.to_le_bytes());
        for (tag, extents) in [(0u8, &unit.attached), (1u8, &unit.retiring)] {
            hasher.update(&[tag]);
            hasher.update(&(extents.len() as u64).to_le_bytes());
            for extent in extents.iter() {
                hasher.update(&extent.id.0.to_le_bytes());
                hasher.update(&(extent.capacity as u64).to_le_bytes());
                hasher.update(&extent.handle.0.to_le_bytes());
            }
        }
    }
    *hasher.finalize().as_bytes()
}
