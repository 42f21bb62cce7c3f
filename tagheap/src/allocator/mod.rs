mod allocator;
pub(crate) mod check;
mod free_list;
mod tag;

use crate::utils::WORD_SIZE;
use crate::{BlockAddress, BlockSize};

pub use allocator::HeapAllocator;
pub use free_list::FreeListIter;

/// Alignment of every block and every payload address.
pub const ALIGNMENT: BlockSize = 8;

/// Bytes taken by the header and the footer of a block.
pub const OVERHEAD: BlockSize = 2 * WORD_SIZE;

/// The smallest block: header, footer and room for the two free list links.
pub const MIN_BLOCK_SIZE: BlockSize = 4 * WORD_SIZE;

/// Default number of bytes the heap grows by when no free block fits a request.
pub const CHUNK_SIZE: BlockSize = 1 << 12;

/// The heap can not grow past this address, free list links are stored in one word.
pub const MAX_HEAP_SIZE: u64 = u32::MAX as u64 & !(ALIGNMENT - 1);
