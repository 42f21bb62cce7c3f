//! Boundary tags and the block navigation built on top of them.
//!
//! Every block looks like this in memory, `bp` being the payload address handed to the user:
//!
//! ```text
//!  bp - 4     bp          bp + 4                            bp + size - 8
//!  | header   | prev link | next link | payload / padding ... | footer   |
//!             |<-- only while free -->|
//! ```

use super::{BlockAddress, BlockSize, ALIGNMENT, MAX_HEAP_SIZE, OVERHEAD};
use crate::memory::Memory;
use crate::utils::{read_word, write_word, WORD_SIZE};

/// The decoded content of a header or a footer. The size is always a multiple of 8, so the packed
/// form uses bit 0 of the size word as the allocated flag.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BoundaryTag {
    pub size: BlockSize,
    pub allocated: bool,
}

impl BoundaryTag {
    #[inline]
    pub const fn free(size: BlockSize) -> Self {
        Self {
            size,
            allocated: false,
        }
    }

    #[inline]
    pub const fn allocated(size: BlockSize) -> Self {
        Self {
            size,
            allocated: true,
        }
    }

    /// Pack this tag into one word.
    ///
    /// # Panics
    ///
    /// If the size is not aligned or does not fit in a word.
    pub fn pack(self) -> u32 {
        assert!(
            self.size % ALIGNMENT == 0 && self.size <= MAX_HEAP_SIZE,
            "invalid block size {}.",
            self.size
        );

        self.size as u32 | self.allocated as u32
    }

    /// Unpack a tag word. The bits between the flag and the size are ignored.
    pub fn unpack(word: u32) -> Self {
        Self {
            size: (word & !(ALIGNMENT as u32 - 1)) as BlockSize,
            allocated: word & 1 == 1,
        }
    }
}

#[inline]
pub fn header_addr(bp: BlockAddress) -> u64 {
    bp - WORD_SIZE
}

#[inline]
pub fn footer_addr(bp: BlockAddress, size: BlockSize) -> u64 {
    bp + size - OVERHEAD
}

#[inline]
pub fn read_tag<M: Memory>(memory: &M, addr: u64) -> BoundaryTag {
    BoundaryTag::unpack(read_word(memory, addr))
}

/// Read the header of the block at `bp`.
#[inline]
pub fn header<M: Memory>(memory: &M, bp: BlockAddress) -> BoundaryTag {
    read_tag(memory, header_addr(bp))
}

/// Write the same tag to the header and the footer of the block at `bp`. The footer position is
/// derived from the new size.
pub fn set_tags<M: Memory>(memory: &mut M, bp: BlockAddress, tag: BoundaryTag) {
    let word = tag.pack();
    write_word(memory, header_addr(bp), word);
    if tag.size > 0 {
        write_word(memory, footer_addr(bp, tag.size), word);
    }
}

/// Payload address of the block physically after `bp`.
#[inline]
pub fn next_block<M: Memory>(memory: &M, bp: BlockAddress) -> BlockAddress {
    bp + header(memory, bp).size
}

/// Payload address of the block physically before `bp`, found through its footer.
#[inline]
pub fn prev_block<M: Memory>(memory: &M, bp: BlockAddress) -> BlockAddress {
    bp - read_tag(memory, bp - OVERHEAD).size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::VecMemory;

    #[test]
    fn pack_unpack() {
        assert_eq!(BoundaryTag::allocated(24).pack(), 25);
        assert_eq!(BoundaryTag::free(24).pack(), 24);
        assert_eq!(BoundaryTag::unpack(25), BoundaryTag::allocated(24));
        assert_eq!(BoundaryTag::unpack(24), BoundaryTag::free(24));
        assert_eq!(BoundaryTag::unpack(0x1007), BoundaryTag::allocated(0x1000));
        assert_eq!(BoundaryTag::allocated(0).pack(), 1);
    }

    #[test]
    #[should_panic]
    fn pack_unaligned() {
        BoundaryTag::free(20).pack();
    }

    #[test]
    fn navigation() {
        let mut memory = VecMemory::new();
        memory.grow(64).unwrap();

        // two blocks of 16 and 24 bytes starting at payload address 8.
        set_tags(&mut memory, 8, BoundaryTag::allocated(16));
        set_tags(&mut memory, 24, BoundaryTag::free(24));

        assert_eq!(read_word(&memory, 4), 17);
        assert_eq!(read_word(&memory, 16), 17);
        assert_eq!(header(&memory, 24), BoundaryTag::free(24));
        assert_eq!(read_tag(&memory, footer_addr(24, 24)), BoundaryTag::free(24));

        assert_eq!(next_block(&memory, 8), 24);
        assert_eq!(prev_block(&memory, 24), 8);
        assert_eq!(next_block(&memory, 24), 48);
    }
}
