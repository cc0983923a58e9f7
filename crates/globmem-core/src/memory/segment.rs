//! Byte extents backing buckets
//!
//! A `Segment` is what the transport registers and what one-sided transfers
//! read from and write to. Buckets view it as a typed element array.

use parking_lot::RwLock;
use crate::types::TransportError;

/// Contiguous, lock-protected byte extent
#[derive(Debug, Default)]
pub struct Segment {
    bytes: RwLock<Vec<u8>>,
}

impl Segment {
    /// Allocate a zeroed segment of `len` bytes
    pub fn zeroed(len: usize) -> Self {
        Self { bytes: RwLock::new(vec![0u8; len]) }
    }

    /// Create a segment holding a copy of `data`
    pub fn from_bytes(data: &[u8]) -> Self {
        Self { bytes: RwLock::new(data.to_vec()) }
    }

    /// Current extent in bytes
    pub fn len(&self) -> usize {
        self.bytes.read().len()
    }

    /// Whether the segment holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`
    pub fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), TransportError> {
        let bytes = self.bytes.read();
        let end = checked_end(offset, dst.len(), bytes.len())?;
        dst.copy_from_slice(&bytes[offset..end]);
        Ok(())
    }

    /// Copy `src` into the segment starting at `offset`
    pub fn write_at(&self, offset: usize, src: &[u8]) -> Result<(), TransportError> {
        let mut bytes = self.bytes.write();
        let end = checked_end(offset, src.len(), bytes.len())?;
        bytes[offset..end].copy_from_slice(src);
        Ok(())
    }

    /// Change the extent, zero-filling new bytes.
    ///
    /// Only valid while the segment is not registered with a transport.
    pub(crate) fn resize(&self, len: usize) {
        self.bytes.write().resize(len, 0);
    }

    /// Copy of the first `len` bytes
    pub(crate) fn prefix(&self, len: usize) -> Vec<u8> {
        let bytes = self.bytes.read();
        bytes[..len.min(bytes.len())].to_vec()
    }
}

fn checked_end(offset: usize, len: usize, extent: usize) -> Result<usize, TransportError> {
    offset
        .checked_add(len)
        .filter(|&end| end <= extent)
        .ok_or(TransportError::OutOfBounds { offset, len, extent })
}
