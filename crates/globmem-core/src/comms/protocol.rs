//! Binary protocol for the commit exchange
//!
//! Every unit contributes one `TableDescriptor` to the all-to-all exchange.
//! Descriptors are encoded with bincode's standard configuration.

use serde::{Serialize, Deserialize};
use bincode::serde::{encode_to_vec, decode_from_slice};
use bincode::config;
use crate::memory::bucket::BucketState;
use crate::types::{BucketId, Epoch, ProtocolError, SegmentHandle, UnitId};

/// Description of one bucket as seen by its owner at commit time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketDescriptor {
    /// Sequence index within the owning unit
    pub id: BucketId,
    /// Capacity in elements
    pub capacity: usize,
    /// State before the commit is applied
    pub state: BucketState,
    /// Registration handle (required for every bucket that will be attached)
    pub handle: Option<SegmentHandle>,
}

/// One unit's complete bucket table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Owning unit
    pub unit: UnitId,
    /// Epoch the commit is heading for
    pub epoch: Epoch,
    /// Element size in bytes, identical across the team
    pub element_size: usize,
    /// First sequence index the unit has not allocated yet
    pub next_bucket: BucketId,
    /// Buckets in allocation order
    pub buckets: Vec<BucketDescriptor>,
}

/// Serialize a table descriptor to binary format
pub fn encode_descriptor(desc: &TableDescriptor) -> Result<Vec<u8>, ProtocolError> {
    Ok(encode_to_vec(desc, config::standard())?)
}

/// Deserialize a table descriptor from binary format
pub fn decode_descriptor(data: &[u8]) -> Result<TableDescriptor, ProtocolError> {
    let (desc, read) = decode_from_slice::<TableDescriptor, _>(data, config::standard())?;
    if read != data.len() {
        return Err(ProtocolError::Inconsistent(format!(
            "{} trailing bytes after descriptor",
            data.len() - read
        )));
    }
    Ok(desc)
}

/// Decode the payloads of an exchange, one per unit in unit order
pub fn decode_exchange(payloads: &[Vec<u8>]) -> Result<Vec<TableDescriptor>, ProtocolError> {
    payloads.iter().map(|p| decode_descriptor(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TableDescriptor {
        TableDescriptor {
            unit: UnitId(2),
            epoch: Epoch(5),
            element_size: 4,
            next_bucket: BucketId(5),
            buckets: vec![
                BucketDescriptor { id: BucketId(0), capacity: 10, state: BucketState::Valid, handle: Some(SegmentHandle(3)) },
                BucketDescriptor { id: BucketId(4), capacity: 2, state: BucketState::PendingNew, handle: Some(SegmentHandle(9)) },
            ],
        }
    }

    #[test]
    fn descriptor_survives_encoding() {
        let desc = sample();
        let bytes = encode_descriptor(&desc).unwrap();
        assert_eq!(decode_descriptor(&bytes).unwrap(), desc);
    }

    #[test]
    fn rejects_truncated_and_padded_payloads() {
        let mut bytes = encode_descriptor(&sample()).unwrap();
        assert!(decode_descriptor(&bytes[..bytes.len() - 1]).is_err());
        bytes.push(0);
        assert!(matches!(decode_descriptor(&bytes), Err(ProtocolError::Inconsistent(_))));
    }
}
