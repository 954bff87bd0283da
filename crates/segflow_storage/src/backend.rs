//! The byte store under one segment.

use crate::error::StorageResult;

/// Append-then-seal byte storage for one segment.
///
/// A segment is written front to back while its store is open for writing
/// and then sealed; sealed storage only serves reads. Block framing is the
/// caller's business: a backend sees opaque byte runs.
///
/// Appended bytes are readable as soon as `append` returns. `seal` makes
/// them durable and rejects any further append.
pub trait StorageBackend: Send + Sync {
    /// Appends `data`, returning the offset it starts at.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Sealed`](crate::StorageError::Sealed) after
    /// `seal`, or an I/O error.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Reads exactly `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd)
    /// if the range is not fully written, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Number of bytes appended so far.
    fn size(&self) -> u64;

    /// Makes the contents durable and closes the storage for appends.
    /// Sealing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the data cannot be synced.
    fn seal(&mut self) -> StorageResult<()>;

    /// Returns whether [`seal`](Self::seal) has been called.
    fn is_sealed(&self) -> bool;
}

/// Checks that `[offset, offset + len)` lies within `size` bytes.
pub(crate) fn check_span(offset: u64, len: usize, size: u64) -> StorageResult<u64> {
    let end = offset.saturating_add(len as u64);
    if end > size {
        return Err(crate::StorageError::ReadPastEnd { offset, len, size });
    }
    Ok(end)
}
