use crate::allocator::{CHUNK_SIZE, MIN_BLOCK_SIZE};
use crate::utils::align_up;
use crate::BlockSize;
use serde::{Deserialize, Serialize};

/// Configuration values for a heap allocator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// The minimum number of bytes requested from the memory whenever the heap runs out of free
    /// blocks.
    /// Default: 4096 bytes.
    pub chunk_size: BlockSize,
    /// Number of bytes of free space reserved when the allocator is created.
    /// Default: 4096 bytes.
    pub initial_size: BlockSize,
    /// Run the consistency checker after every public operation and log the violations it finds.
    /// This makes every operation linear in the size of the heap.
    /// Default: false.
    pub check_invariants: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            initial_size: CHUNK_SIZE,
            check_invariants: false,
        }
    }
}

impl HeapConfig {
    /// Return a copy of this config with the sizes rounded up to the alignment and to at least the
    /// minimum block size.
    pub fn validate(mut self) -> Self {
        self.chunk_size = normalize(self.chunk_size);
        self.initial_size = normalize(self.initial_size);
        self
    }
}

fn normalize(size: BlockSize) -> BlockSize {
    align_up(size.max(MIN_BLOCK_SIZE), 8).unwrap_or(BlockSize::MAX & !7)
}
