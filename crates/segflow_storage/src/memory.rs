//! Segment storage held in process memory.

use crate::backend::{check_span, StorageBackend};
use crate::error::{StorageError, StorageResult};

/// A segment kept in a `Vec<u8>`.
///
/// Backs ephemeral stores whose rows never need to outlive the process.
/// Concurrency is the owner's concern: the store wraps each backend in its
/// own lock.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    bytes: Vec<u8>,
    sealed: bool,
}

impl InMemoryBackend {
    /// Creates empty, unsealed storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for InMemoryBackend {
    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.sealed {
            return Err(StorageError::Sealed);
        }
        let offset = self.bytes.len() as u64;
        self.bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let end = check_span(offset, len, self.size())?;
        // Both bounds are within `bytes`, whose length fits in usize.
        Ok(self.bytes[offset as usize..end as usize].to_vec())
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn seal(&mut self) -> StorageResult<()> {
        self.sealed = true;
        self.bytes.shrink_to_fit();
        Ok(())
    }

    fn is_sealed(&self) -> bool {
        self.sealed
    }
}
