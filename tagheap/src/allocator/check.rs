//! A read-only consistency checker for the heap.
//!
//! The checker walks the heap twice: once physically, block by block from the prologue to the
//! epilogue, and once through the free list. Every problem it finds is collected in a
//! [`HeapReport`] together with some statistics about the heap. It never modifies the heap and it
//! never fails, a violation means the heap was already corrupted by an earlier operation.

use super::allocator::HeapAllocator;
use super::free_list::{next_link, prev_link};
use super::tag::{header_addr, read_tag, BoundaryTag};
use super::{BlockAddress, BlockSize, ALIGNMENT, MIN_BLOCK_SIZE, OVERHEAD};
use crate::memory::Memory;
use crate::utils::read_word;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// How much the checker records and logs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// Only collect the violations and the statistics.
    Quiet,
    /// Also log the statistics.
    Summary,
    /// Also record and log every block of the heap.
    Blocks,
}

/// A broken heap invariant and where it was found.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// The prologue block is not an allocated block of 8 bytes.
    BadPrologue { address: BlockAddress },
    /// The epilogue header is not an allocated block of size zero, or the heap does not end at the
    /// end of the memory.
    BadEpilogue { address: BlockAddress },
    /// A free list link is inside the heap but not aligned.
    Misaligned { address: BlockAddress },
    /// The header and the footer of a block differ.
    TagMismatch {
        address: BlockAddress,
        header: u32,
        footer: u32,
    },
    /// The size is too small or runs past the end of the heap. The walk stops here.
    BadSize {
        address: BlockAddress,
        size: BlockSize,
    },
    /// Two physically adjacent blocks are both free.
    AdjacentFree {
        address: BlockAddress,
        next: BlockAddress,
    },
    /// A free list link points outside of the heap. `from` is `None` for the list head.
    LinkOutOfRange {
        from: Option<BlockAddress>,
        link: BlockAddress,
    },
    AllocatedInFreeList { address: BlockAddress },
    /// The prev link of a block does not point to the block before it in the list.
    BrokenBackLink {
        address: BlockAddress,
        expected: Option<BlockAddress>,
        found: Option<BlockAddress>,
    },
    /// The free list visits the same block twice.
    FreeListCycle { address: BlockAddress },
    /// A free block found in the heap is not in the free list.
    MissingFromFreeList { address: BlockAddress },
    /// A free list entry is not the start of a free block found in the heap.
    StrayFreeListEntry { address: BlockAddress },
}

/// Numbers gathered while walking the heap.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    /// Bytes from the alignment pad to the end of the epilogue.
    pub heap_size: u64,
    pub allocated_blocks: usize,
    pub allocated_bytes: u64,
    pub free_blocks: usize,
    pub free_bytes: u64,
    pub largest_free_block: BlockSize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    pub address: BlockAddress,
    pub size: BlockSize,
    pub allocated: bool,
}

/// The result of a heap check.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct HeapReport {
    pub violations: Vec<Violation>,
    pub stats: HeapStats,
    /// Every block in address order, only filled with [`Verbosity::Blocks`].
    pub blocks: Vec<BlockInfo>,
}

impl HeapReport {
    /// Returns true if no violation was found.
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

impl<M: Memory> HeapAllocator<M> {
    /// Check the heap invariants and gather statistics about the heap.
    pub fn check_invariants(&self, verbosity: Verbosity) -> HeapReport {
        let mut report = HeapReport::default();
        let (low, high) = self.bounds();
        report.stats.heap_size = high - low;

        let prologue = BoundaryTag::allocated(OVERHEAD).pack();
        if read_word(&self.memory, header_addr(self.heap_start)) != prologue
            || read_word(&self.memory, self.heap_start) != prologue
        {
            report.violations.push(Violation::BadPrologue {
                address: self.heap_start,
            });
        }

        if read_tag(&self.memory, header_addr(self.heap_end)) != BoundaryTag::allocated(0)
            || self.heap_end != self.memory.size()
        {
            report.violations.push(Violation::BadEpilogue {
                address: header_addr(self.heap_end),
            });
        }

        let free = self.walk_heap(verbosity, &mut report);
        self.walk_free_list(&free, &mut report);

        if verbosity >= Verbosity::Summary {
            log::debug!("{}", report.stats);
            for violation in &report.violations {
                log::debug!("{}", violation);
            }
        }

        report
    }

    /// Returns statistics about the heap.
    pub fn stats(&self) -> HeapStats {
        self.check_invariants(Verbosity::Quiet).stats
    }

    /// Walk the blocks in address order and return the set of free blocks.
    fn walk_heap(&self, verbosity: Verbosity, report: &mut HeapReport) -> BTreeSet<BlockAddress> {
        let mut free = BTreeSet::new();
        let mut previous_free: Option<BlockAddress> = None;
        let mut bp = self.heap_start + OVERHEAD;

        while bp < self.heap_end {
            let word = read_word(&self.memory, header_addr(bp));
            let tag = BoundaryTag::unpack(word);

            if tag.size < MIN_BLOCK_SIZE || bp + tag.size > self.heap_end {
                report.violations.push(Violation::BadSize {
                    address: bp,
                    size: tag.size,
                });
                break;
            }

            let footer = read_word(&self.memory, bp + tag.size - OVERHEAD);
            if footer != word {
                report.violations.push(Violation::TagMismatch {
                    address: bp,
                    header: word,
                    footer,
                });
            }

            if verbosity >= Verbosity::Blocks {
                log::debug!(
                    "0x{:08x}: {:>8} bytes {}",
                    bp,
                    tag.size,
                    if tag.allocated { "allocated" } else { "free" }
                );
                report.blocks.push(BlockInfo {
                    address: bp,
                    size: tag.size,
                    allocated: tag.allocated,
                });
            }

            let stats = &mut report.stats;
            if tag.allocated {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += tag.size;
                previous_free = None;
            } else {
                if let Some(address) = previous_free {
                    report
                        .violations
                        .push(Violation::AdjacentFree { address, next: bp });
                }

                stats.free_blocks += 1;
                stats.free_bytes += tag.size;
                stats.largest_free_block = stats.largest_free_block.max(tag.size);
                free.insert(bp);
                previous_free = Some(bp);
            }

            bp += tag.size;
        }

        free
    }

    fn walk_free_list(&self, free: &BTreeSet<BlockAddress>, report: &mut HeapReport) {
        let first = self.heap_start + OVERHEAD;
        let mut listed = BTreeSet::new();
        let mut previous: Option<BlockAddress> = None;
        let mut cursor = self.free_list.head();

        while let Some(bp) = cursor {
            if bp < first || bp + MIN_BLOCK_SIZE > self.heap_end {
                report.violations.push(Violation::LinkOutOfRange {
                    from: previous,
                    link: bp,
                });
                break;
            }

            if bp % ALIGNMENT != 0 {
                report
                    .violations
                    .push(Violation::Misaligned { address: bp });
                break;
            }

            if !listed.insert(bp) {
                report
                    .violations
                    .push(Violation::FreeListCycle { address: bp });
                break;
            }

            if read_tag(&self.memory, header_addr(bp)).allocated {
                report
                    .violations
                    .push(Violation::AllocatedInFreeList { address: bp });
            } else if !free.contains(&bp) {
                report
                    .violations
                    .push(Violation::StrayFreeListEntry { address: bp });
            }

            let found = prev_link(&self.memory, bp);
            if found != previous {
                report.violations.push(Violation::BrokenBackLink {
                    address: bp,
                    expected: previous,
                    found,
                });
            }

            previous = Some(bp);
            cursor = next_link(&self.memory, bp);
        }

        for &address in free.difference(&listed) {
            report
                .violations
                .push(Violation::MissingFromFreeList { address });
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadPrologue { address } => write!(f, "0x{:x}: bad prologue block", address),
            Self::BadEpilogue { address } => write!(f, "0x{:x}: bad epilogue block", address),
            Self::Misaligned { address } => write!(f, "0x{:x}: free list link is not aligned", address),
            Self::TagMismatch {
                address,
                header,
                footer,
            } => write!(
                f,
                "0x{:x}: header 0x{:x} does not match footer 0x{:x}",
                address, header, footer
            ),
            Self::BadSize { address, size } => {
                write!(f, "0x{:x}: invalid block size {}", address, size)
            }
            Self::AdjacentFree { address, next } => write!(
                f,
                "0x{:x}: free block is followed by free block 0x{:x}",
                address, next
            ),
            Self::LinkOutOfRange {
                from: Some(from),
                link,
            } => write!(f, "0x{:x}: free list link 0x{:x} is out of range", from, link),
            Self::LinkOutOfRange { from: None, link } => {
                write!(f, "free list head 0x{:x} is out of range", link)
            }
            Self::AllocatedInFreeList { address } => {
                write!(f, "0x{:x}: allocated block in the free list", address)
            }
            Self::BrokenBackLink {
                address,
                expected,
                found,
            } => write!(
                f,
                "0x{:x}: prev link is {:?}, expected {:?}",
                address, found, expected
            ),
            Self::FreeListCycle { address } => {
                write!(f, "0x{:x}: free list visits the block twice", address)
            }
            Self::MissingFromFreeList { address } => {
                write!(f, "0x{:x}: free block is not in the free list", address)
            }
            Self::StrayFreeListEntry { address } => {
                write!(f, "0x{:x}: free list entry is not a free block", address)
            }
        }
    }
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "heap {} bytes, {} allocated blocks ({} bytes), {} free blocks ({} bytes, largest {})",
            self.heap_size,
            self.allocated_blocks,
            self.allocated_bytes,
            self.free_blocks,
            self.free_bytes,
            self.largest_free_block
        )
    }
}

impl fmt::Display for HeapReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}", self.stats)?;

        for block in &self.blocks {
            writeln!(
                f,
                "  0x{:08x}: {:>8} bytes {}",
                block.address,
                block.size,
                if block.allocated { "allocated" } else { "free" }
            )?;
        }

        for violation in &self.violations {
            writeln!(f, "  error: {}", violation)?;
        }

        Ok(())
    }
}
