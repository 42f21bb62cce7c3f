use super::tag::header;
use super::{BlockAddress, BlockSize};
use crate::memory::Memory;
use crate::utils::{read_word, write_word, WORD_SIZE};

/// An explicit list of the free blocks in the heap. The list nodes live inside the payload of the
/// free blocks themselves: the first word of the payload links to the previous free block and the
/// second word to the next one, `0` marks the end of the list in either direction.
///
/// New blocks are pushed to the head, so the list is ordered from the most recently freed block
/// to the least recently freed one.
#[derive(Debug, Default)]
pub struct FreeList {
    head: Option<BlockAddress>,
}

impl FreeList {
    /// Create a new empty [`FreeList`]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn head(&self) -> Option<BlockAddress> {
        self.head
    }

    /// Push the free block at `bp` to the head of the list. The block must not already be in the
    /// list.
    pub fn insert<M: Memory>(&mut self, memory: &mut M, bp: BlockAddress) {
        set_prev(memory, bp, None);
        set_next(memory, bp, self.head);

        if let Some(head) = self.head {
            set_prev(memory, head, Some(bp));
        }

        self.head = Some(bp);
    }

    /// Unlink the block at `bp` from the list using its own links, no traversal is needed. The
    /// block must be in the list.
    pub fn remove<M: Memory>(&mut self, memory: &mut M, bp: BlockAddress) {
        let prev = prev_link(memory, bp);
        let next = next_link(memory, bp);

        match prev {
            Some(prev) => set_next(memory, prev, next),
            None => {
                debug_assert_eq!(self.head, Some(bp), "removed block is not in the free list.");
                self.head = next;
            }
        }

        if let Some(next) = next {
            set_prev(memory, next, prev);
        }
    }

    /// Return an iterator over the free blocks from the head to the tail.
    pub fn iter<'m, M: Memory>(&self, memory: &'m M) -> FreeListIter<'m, M> {
        FreeListIter {
            memory,
            head: self.head,
        }
    }
}

/// Iterates over `(address, size)` of the blocks in a [`FreeList`]. Holding the iterator borrows
/// the memory, so the list cannot change under it.
pub struct FreeListIter<'m, M: Memory> {
    memory: &'m M,
    head: Option<BlockAddress>,
}

impl<'m, M: Memory> Iterator for FreeListIter<'m, M> {
    type Item = (BlockAddress, BlockSize);

    fn next(&mut self) -> Option<Self::Item> {
        let bp = self.head?;
        self.head = next_link(self.memory, bp);
        Some((bp, header(self.memory, bp).size))
    }
}

#[inline]
fn decode(word: u32) -> Option<BlockAddress> {
    match word {
        0 => None,
        addr => Some(addr as BlockAddress),
    }
}

#[inline]
fn encode(link: Option<BlockAddress>) -> u32 {
    link.map(|addr| addr as u32).unwrap_or(0)
}

#[inline]
pub fn prev_link<M: Memory>(memory: &M, bp: BlockAddress) -> Option<BlockAddress> {
    decode(read_word(memory, bp))
}

#[inline]
pub fn next_link<M: Memory>(memory: &M, bp: BlockAddress) -> Option<BlockAddress> {
    decode(read_word(memory, bp + WORD_SIZE))
}

#[inline]
fn set_prev<M: Memory>(memory: &mut M, bp: BlockAddress, link: Option<BlockAddress>) {
    write_word(memory, bp, encode(link));
}

#[inline]
fn set_next<M: Memory>(memory: &mut M, bp: BlockAddress, link: Option<BlockAddress>) {
    write_word(memory, bp + WORD_SIZE, encode(link));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::tag::{set_tags, BoundaryTag};
    use crate::memory::VecMemory;

    /// Lay out four free blocks of 16 bytes at payload addresses 8, 24, 40 and 56.
    fn memory() -> VecMemory {
        let mut memory = VecMemory::new();
        memory.grow(80).unwrap();
        for bp in [8, 24, 40, 56] {
            set_tags(&mut memory, bp, BoundaryTag::free(16));
        }
        memory
    }

    fn addresses<M: Memory>(list: &FreeList, memory: &M) -> Vec<BlockAddress> {
        list.iter(memory).map(|(bp, _)| bp).collect()
    }

    /// Walk the list backwards from the tail using the prev links.
    fn backwards<M: Memory>(list: &FreeList, memory: &M) -> Vec<BlockAddress> {
        let mut result = Vec::new();
        let mut tail = list.iter(memory).last().map(|(bp, _)| bp);
        while let Some(bp) = tail {
            result.push(bp);
            tail = prev_link(memory, bp);
        }
        result
    }

    #[test]
    fn insert_is_lifo() {
        let mut memory = memory();
        let mut list = FreeList::new();
        assert_eq!(list.head(), None);
        assert_eq!(list.iter(&memory).next(), None);

        list.insert(&mut memory, 8);
        list.insert(&mut memory, 40);
        list.insert(&mut memory, 24);

        assert_eq!(list.head(), Some(24));
        assert_eq!(addresses(&list, &memory), vec![24, 40, 8]);
        assert_eq!(backwards(&list, &memory), vec![8, 40, 24]);
        assert_eq!(
            list.iter(&memory).collect::<Vec<_>>(),
            vec![(24, 16), (40, 16), (8, 16)]
        );
    }

    #[test]
    fn remove_positions() {
        let mut memory = memory();
        let mut list = FreeList::new();
        for bp in [8, 24, 40, 56] {
            list.insert(&mut memory, bp);
        }
        assert_eq!(addresses(&list, &memory), vec![56, 40, 24, 8]);

        // interior
        list.remove(&mut memory, 40);
        assert_eq!(addresses(&list, &memory), vec![56, 24, 8]);
        assert_eq!(backwards(&list, &memory), vec![8, 24, 56]);

        // tail
        list.remove(&mut memory, 8);
        assert_eq!(addresses(&list, &memory), vec![56, 24]);
        assert_eq!(backwards(&list, &memory), vec![24, 56]);

        // head
        list.remove(&mut memory, 56);
        assert_eq!(list.head(), Some(24));
        assert_eq!(prev_link(&memory, 24), None);

        // sole element
        list.remove(&mut memory, 24);
        assert_eq!(list.head(), None);
        assert_eq!(addresses(&list, &memory), vec![]);
    }

    #[test]
    fn reinsert_after_remove() {
        let mut memory = memory();
        let mut list = FreeList::new();
        list.insert(&mut memory, 8);
        list.insert(&mut memory, 24);
        list.remove(&mut memory, 8);
        list.insert(&mut memory, 8);
        assert_eq!(addresses(&list, &memory), vec![8, 24]);
        assert_eq!(backwards(&list, &memory), vec![24, 8]);
    }
}
