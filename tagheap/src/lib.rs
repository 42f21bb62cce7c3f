mod allocator;
mod config;
mod error;
mod memory;
mod utils;

pub use allocator::check::{BlockInfo, HeapReport, HeapStats, Verbosity, Violation};
pub use allocator::{
    FreeListIter, HeapAllocator, ALIGNMENT, CHUNK_SIZE, MAX_HEAP_SIZE, MIN_BLOCK_SIZE, OVERHEAD,
};
pub use config::HeapConfig;
pub use error::HeapError;
pub use memory::{Memory, VecMemory, DEFAULT_MEMORY_LIMIT};

/// A byte offset into the managed memory. Payload addresses handed out by the allocator are
/// always multiples of [`ALIGNMENT`].
pub type BlockAddress = u64;

/// Size of a block or a request in bytes.
pub type BlockSize = u64;

#[cfg(test)]
pub(crate) fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
