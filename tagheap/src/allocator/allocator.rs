use super::check::Verbosity;
use super::free_list::{FreeList, FreeListIter};
use super::tag::{header, header_addr, prev_block, read_tag, set_tags, BoundaryTag};
use super::{BlockAddress, BlockSize, ALIGNMENT, MAX_HEAP_SIZE, MIN_BLOCK_SIZE, OVERHEAD};
use crate::config::HeapConfig;
use crate::error::HeapError;
use crate::memory::Memory;
use crate::utils::{align_up, write_word, WORD_SIZE};

/// A heap allocator over a growable memory. The allocator assumes that it owns every byte of the
/// memory from the point it was created on.
///
/// The heap is framed by two sentinel blocks that are always allocated, so looking at the
/// neighbours of a block never needs a special case at the ends of the heap:
///
/// ```text
///  | pad | prologue hdr | prologue ftr | block | block | ... | epilogue hdr |
///                       ^ heap_start                                       ^ heap_end
/// ```
pub struct HeapAllocator<M: Memory> {
    pub(super) memory: M,
    pub(super) config: HeapConfig,
    /// Payload address of the prologue block.
    pub(super) heap_start: BlockAddress,
    /// One past the epilogue header.
    pub(super) heap_end: BlockAddress,
    pub(super) free_list: FreeList,
}

impl<M: Memory> HeapAllocator<M> {
    /// Create a new allocator over the given memory with the default configuration.
    pub fn new(memory: M) -> Result<Self, HeapError> {
        Self::with_config(memory, HeapConfig::default())
    }

    /// Create a new allocator over the given memory. This lays out the sentinel blocks and
    /// reserves the initial free space, both at the current end of the memory.
    pub fn with_config(memory: M, config: HeapConfig) -> Result<Self, HeapError> {
        let mut allocator = Self {
            memory,
            config: config.validate(),
            heap_start: 0,
            heap_end: 0,
            free_list: FreeList::new(),
        };

        allocator.initialize()?;
        Ok(allocator)
    }

    fn initialize(&mut self) -> Result<(), HeapError> {
        let end = self.memory.size();
        let start = align_up(end, ALIGNMENT).ok_or(HeapError::OutOfMemory)?;

        if start + 4 * WORD_SIZE > MAX_HEAP_SIZE {
            return Err(HeapError::OutOfMemory);
        }

        let base = self.memory.grow(start - end + 4 * WORD_SIZE)?;
        debug_assert_eq!(base, end);

        write_word(&mut self.memory, start, 0);
        self.heap_start = start + 2 * WORD_SIZE;
        set_tags(
            &mut self.memory,
            self.heap_start,
            BoundaryTag::allocated(OVERHEAD),
        );
        set_tags(
            &mut self.memory,
            self.heap_start + OVERHEAD,
            BoundaryTag::allocated(0),
        );
        self.heap_end = start + 4 * WORD_SIZE;

        let bp = self.grow_heap(self.config.initial_size)?;
        let bp = self.coalesce(bp);
        self.free_list.insert(&mut self.memory, bp);

        log::debug!(
            "heap initialized at 0x{:x} with {} free bytes",
            start,
            self.config.initial_size
        );

        Ok(())
    }

    /// Extend the heap by at least `min_bytes` and format the new space as one free block whose
    /// header takes the place of the old epilogue. The new block is neither coalesced nor put in
    /// the free list.
    fn grow_heap(&mut self, min_bytes: BlockSize) -> Result<BlockAddress, HeapError> {
        let size = align_up(min_bytes.max(MIN_BLOCK_SIZE), ALIGNMENT)
            .ok_or(HeapError::OutOfMemory)?;

        match self.heap_end.checked_add(size) {
            Some(end) if end <= MAX_HEAP_SIZE => {}
            _ => {
                log::warn!("heap can not grow by {} bytes past 0x{:x}", size, self.heap_end);
                return Err(HeapError::OutOfMemory);
            }
        }

        let bp = self.memory.grow(size).map_err(|e| {
            log::warn!("memory refused to grow by {} bytes", size);
            e
        })?;
        debug_assert_eq!(bp, self.heap_end, "memory did not grow contiguously.");

        set_tags(&mut self.memory, bp, BoundaryTag::free(size));
        set_tags(&mut self.memory, bp + size, BoundaryTag::allocated(0));
        self.heap_end = bp + size;

        log::debug!("heap grew by {} bytes, new block at 0x{:x}", size, bp);
        Ok(bp)
    }

    /// Allocate a block with room for at least `size` bytes and return its address. A zero size
    /// returns `None`.
    pub fn allocate(&mut self, size: BlockSize) -> Result<Option<BlockAddress>, HeapError> {
        let result = match size {
            0 => Ok(None),
            size => adjust(size)
                .and_then(|asize| self.allocate_adjusted(asize))
                .map(Some),
        };

        log::trace!("allocate({}) -> {:?}", size, result);
        self.after_operation("allocate");
        result
    }

    /// Free the block at the given address. The address must be one returned by this allocator
    /// which has not been freed since, `None` is ignored.
    pub fn free(&mut self, ptr: Option<BlockAddress>) -> Result<(), HeapError> {
        let result = match ptr {
            Some(bp) => self.free_block(bp),
            None => Ok(()),
        };

        log::trace!("free({:?}) -> {:?}", ptr, result);
        self.after_operation("free");
        result
    }

    /// Resize the block at the given address to hold `size` bytes. The block is resized in place
    /// when possible, otherwise the content is moved to a new block and the old one is freed.
    ///
    /// A `None` address behaves like [`HeapAllocator::allocate`], a zero size frees the block and
    /// returns `None`. If a new block can not be obtained the original block is left untouched.
    pub fn reallocate(
        &mut self,
        ptr: Option<BlockAddress>,
        size: BlockSize,
    ) -> Result<Option<BlockAddress>, HeapError> {
        let result = match (ptr, size) {
            (None, 0) => Ok(None),
            (None, size) => adjust(size)
                .and_then(|asize| self.allocate_adjusted(asize))
                .map(Some),
            (Some(bp), 0) => self.free_block(bp).map(|_| None),
            (Some(bp), size) => self.reallocate_block(bp, size).map(Some),
        };

        log::trace!("reallocate({:?}, {}) -> {:?}", ptr, size, result);
        self.after_operation("reallocate");
        result
    }

    /// Returns the number of payload bytes available in the allocated block at `ptr`.
    pub fn usable_size(&self, ptr: BlockAddress) -> Result<BlockSize, HeapError> {
        self.validate(ptr).map(|tag| tag.size - OVERHEAD)
    }

    /// Returns an iterator over `(address, size)` of the free blocks, in the order the fit search
    /// visits them.
    pub fn free_blocks(&self) -> FreeListIter<'_, M> {
        self.free_list.iter(&self.memory)
    }

    /// Read bytes from the heap, usually from the payload of an allocated block.
    ///
    /// # Panics
    ///
    /// If the range is not inside the memory.
    pub fn read(&self, addr: BlockAddress, buf: &mut [u8]) {
        self.memory.read(addr, buf);
    }

    /// Write bytes to the heap. Only the payload of allocated blocks belongs to the caller, writing
    /// anywhere else corrupts the heap.
    ///
    /// # Panics
    ///
    /// If the range is not inside the memory.
    pub fn write(&mut self, addr: BlockAddress, buf: &[u8]) {
        self.memory.write(addr, buf);
    }

    /// Returns the first and one past the last address of the heap, sentinels included.
    pub fn bounds(&self) -> (BlockAddress, BlockAddress) {
        (self.heap_start - OVERHEAD, self.heap_end)
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn into_memory(self) -> M {
        self.memory
    }

    fn allocate_adjusted(&mut self, asize: BlockSize) -> Result<BlockAddress, HeapError> {
        if let Some(bp) = self.find_fit(asize) {
            self.place(bp, asize);
            return Ok(bp);
        }

        let bp = self.grow_heap(asize.max(self.config.chunk_size))?;
        let bp = self.coalesce(bp);
        self.free_list.insert(&mut self.memory, bp);
        self.place(bp, asize);
        Ok(bp)
    }

    fn free_block(&mut self, bp: BlockAddress) -> Result<(), HeapError> {
        let tag = self.validate(bp)?;
        set_tags(&mut self.memory, bp, BoundaryTag::free(tag.size));
        let bp = self.coalesce(bp);
        self.free_list.insert(&mut self.memory, bp);
        Ok(())
    }

    fn reallocate_block(
        &mut self,
        bp: BlockAddress,
        size: BlockSize,
    ) -> Result<BlockAddress, HeapError> {
        let current = self.validate(bp)?.size;

        if size == current - OVERHEAD {
            return Ok(bp);
        }

        let asize = adjust(size)?;

        if asize <= current {
            self.split(bp, current, asize);
            return Ok(bp);
        }

        let next = bp + current;
        let next_tag = header(&self.memory, next);
        if !next_tag.allocated && current + next_tag.size >= asize {
            self.free_list.remove(&mut self.memory, next);
            self.split(bp, current + next_tag.size, asize);
            log::debug!("block at 0x{:x} grew in place to {} bytes", bp, asize);
            return Ok(bp);
        }

        let new_bp = self.allocate_adjusted(asize)?;
        let len = (current - OVERHEAD).min(size);
        self.memory.copy(bp, new_bp, len);
        self.free_block(bp)?;
        log::debug!("block at 0x{:x} moved to 0x{:x}", bp, new_bp);
        Ok(new_bp)
    }

    /// First fit: the first block in the free list which is large enough.
    fn find_fit(&self, asize: BlockSize) -> Option<BlockAddress> {
        self.free_list
            .iter(&self.memory)
            .find(|&(_, size)| size >= asize)
            .map(|(bp, _)| bp)
    }

    /// Allocate `asize` bytes at the start of the free block `bp`.
    fn place(&mut self, bp: BlockAddress, asize: BlockSize) {
        self.free_list.remove(&mut self.memory, bp);
        let size = header(&self.memory, bp).size;
        self.split(bp, size, asize);
    }

    /// Mark the `total` bytes at `bp` as an allocated block of `asize` bytes, and turn what is left
    /// into a free block when it is large enough to be one. A remainder too small to hold a block
    /// stays in the allocated block.
    fn split(&mut self, bp: BlockAddress, total: BlockSize, asize: BlockSize) {
        debug_assert!(asize <= total);

        if total - asize < MIN_BLOCK_SIZE {
            set_tags(&mut self.memory, bp, BoundaryTag::allocated(total));
            return;
        }

        set_tags(&mut self.memory, bp, BoundaryTag::allocated(asize));
        let rest = bp + asize;
        set_tags(&mut self.memory, rest, BoundaryTag::free(total - asize));
        // only a shrinking block can have a free block on its right.
        let rest = self.coalesce(rest);
        self.free_list.insert(&mut self.memory, rest);
    }

    /// Merge the free block at `bp` with its free physical neighbours and return the address of the
    /// merged block. The given block must not be in the free list, the neighbours it absorbs are
    /// removed from it, and the caller inserts the result.
    fn coalesce(&mut self, bp: BlockAddress) -> BlockAddress {
        let mut size = header(&self.memory, bp).size;
        let prev_allocated = read_tag(&self.memory, bp - OVERHEAD).allocated;
        let next = bp + size;
        let next_tag = header(&self.memory, next);

        let bp = match (prev_allocated, next_tag.allocated) {
            (true, true) => return bp,
            (true, false) => {
                self.free_list.remove(&mut self.memory, next);
                size += next_tag.size;
                bp
            }
            (false, true) => {
                let prev = prev_block(&self.memory, bp);
                self.free_list.remove(&mut self.memory, prev);
                size += header(&self.memory, prev).size;
                prev
            }
            (false, false) => {
                let prev = prev_block(&self.memory, bp);
                self.free_list.remove(&mut self.memory, prev);
                self.free_list.remove(&mut self.memory, next);
                size += header(&self.memory, prev).size + next_tag.size;
                prev
            }
        };

        set_tags(&mut self.memory, bp, BoundaryTag::free(size));
        bp
    }

    /// Check that `bp` looks like the payload address of an allocated block and return its tag.
    fn validate(&self, bp: BlockAddress) -> Result<BoundaryTag, HeapError> {
        let first = self.heap_start + OVERHEAD;
        let valid = bp >= first && bp < self.heap_end && bp % ALIGNMENT == 0 && {
            let tag = read_tag(&self.memory, header_addr(bp));
            tag.allocated
                && tag.size >= MIN_BLOCK_SIZE
                && tag.size % ALIGNMENT == 0
                && bp + tag.size <= self.heap_end
                && read_tag(&self.memory, bp + tag.size - OVERHEAD) == tag
        };

        if valid {
            Ok(header(&self.memory, bp))
        } else {
            log::warn!("rejected invalid pointer 0x{:x}", bp);
            Err(HeapError::InvalidPointer(bp))
        }
    }

    fn after_operation(&self, operation: &str) {
        if !self.config.check_invariants {
            return;
        }

        for violation in self.check_invariants(Verbosity::Quiet).violations {
            log::error!("{} left the heap inconsistent: {}", operation, violation);
        }
    }
}

/// Round a request up to a block size: room for the boundary tags, aligned, and large enough to
/// hold the free list links once the block is freed.
fn adjust(size: BlockSize) -> Result<BlockSize, HeapError> {
    let asize = size
        .checked_add(OVERHEAD)
        .and_then(|size| align_up(size, ALIGNMENT))
        .ok_or(HeapError::OutOfMemory)?
        .max(MIN_BLOCK_SIZE);

    if asize > MAX_HEAP_SIZE {
        return Err(HeapError::OutOfMemory);
    }

    Ok(asize)
}
