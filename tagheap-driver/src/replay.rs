//! Replays a trace against a fresh heap and validates every block the allocator hands out.

use crate::config::DriverConfig;
use crate::trace::{Op, Trace};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tagheap::{BlockAddress, HeapAllocator, Verbosity, VecMemory, ALIGNMENT};

/// The outcome of a successful replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayStats {
    pub ops: usize,
    /// Largest sum of the requested sizes of the live blocks at any point.
    pub peak_payload: u64,
    /// Size of the heap after the last operation.
    pub heap_size: u64,
    pub utilization: f64,
}

#[derive(Debug, Copy, Clone)]
struct Block {
    address: BlockAddress,
    size: u64,
}

struct Replay {
    heap: HeapAllocator<VecMemory>,
    check: bool,
    /// The live block of each id.
    blocks: Vec<Option<Block>>,
    /// Live payload ranges by start address, used to detect overlaps.
    ranges: BTreeMap<BlockAddress, (BlockAddress, usize)>,
    payload: u64,
    peak_payload: u64,
}

/// Replay every operation of the trace, then free the remaining blocks and make sure the heap is
/// back to a single free block.
pub fn replay(trace: &Trace, config: &DriverConfig) -> Result<ReplayStats> {
    let memory = VecMemory::with_limit(config.memory_limit);
    log::debug!("replaying with a memory limit of {} bytes", memory.limit());
    let heap = HeapAllocator::with_config(memory, config.heap)
        .context("Failed to initialize the heap")?;

    // only the ids the operations use, the declared count comes from the file.
    let num_ids = trace.ops.iter().map(|op| op.id() + 1).max().unwrap_or(0);
    let mut replay = Replay {
        heap,
        check: config.check,
        blocks: vec![None; num_ids],
        ranges: BTreeMap::new(),
        payload: 0,
        peak_payload: 0,
    };

    for (index, op) in trace.ops.iter().enumerate() {
        replay
            .apply(*op)
            .with_context(|| format!("Operation {} ({:?}) failed", index, op))?;
    }

    let (low, high) = replay.heap.bounds();
    let heap_size = high - low;

    for id in 0..num_ids {
        if replay.blocks[id].is_some() {
            replay
                .apply(Op::Free { id })
                .with_context(|| format!("Failed to release block {}", id))?;
        }
    }

    let report = replay.heap.check_invariants(Verbosity::Summary);
    if !report.is_consistent() {
        bail!("The heap is corrupted after releasing every block:\n{}", report);
    }
    if report.stats.allocated_blocks != 0 || report.stats.free_blocks != 1 {
        bail!(
            "The heap did not collapse to a single free block: {}",
            report.stats
        );
    }

    Ok(ReplayStats {
        ops: trace.ops.len(),
        peak_payload: replay.peak_payload,
        heap_size,
        utilization: replay.peak_payload as f64 / heap_size as f64,
    })
}

impl Replay {
    fn apply(&mut self, op: Op) -> Result<()> {
        match op {
            Op::Allocate { id, size } => {
                if self.blocks[id].is_some() {
                    bail!("Block {} is already allocated", id);
                }

                let address = self.heap.allocate(size)?;
                self.track(id, address, size)?;
            }
            Op::Reallocate { id, size } => {
                let old = self.untrack(id);
                let address = self
                    .heap
                    .reallocate(old.map(|block| block.address), size)?;

                if let (Some(old), Some(address)) = (old, address) {
                    self.verify(id, address, old.size.min(size))
                        .context("Contents were not preserved")?;
                }

                self.track(id, address, size)?;
            }
            Op::Free { id } => {
                let block = match self.untrack(id) {
                    Some(block) => block,
                    None => bail!("Block {} is not allocated", id),
                };

                self.verify(id, block.address, block.size)
                    .context("Block was overwritten")?;
                self.heap.free(Some(block.address))?;
            }
        }

        if self.check {
            let report = self.heap.check_invariants(Verbosity::Quiet);
            if !report.is_consistent() {
                bail!("Heap check failed:\n{}", report);
            }
        }

        Ok(())
    }

    /// Validate a block the allocator just handed out, fill it and start tracking it.
    fn track(&mut self, id: usize, address: Option<BlockAddress>, size: u64) -> Result<()> {
        let address = match address {
            Some(address) => address,
            None if size == 0 => return Ok(()),
            None => bail!("No block returned for a request of {} bytes", size),
        };

        if address % ALIGNMENT != 0 {
            bail!("Block 0x{:x} is not aligned to {} bytes", address, ALIGNMENT);
        }

        let end = address + size;
        let (low, high) = self.heap.bounds();
        if address < low || end > high {
            bail!(
                "Block 0x{:x}..0x{:x} lies outside of the heap 0x{:x}..0x{:x}",
                address,
                end,
                low,
                high
            );
        }

        let usable = self.heap.usable_size(address)?;
        if usable < size {
            bail!("Block 0x{:x} has only {} usable bytes, {} requested", address, usable, size);
        }

        if let Some((&start, &(other_end, other))) = self.ranges.range(..end).next_back() {
            if other_end > address {
                bail!(
                    "Block 0x{:x}..0x{:x} overlaps block {} at 0x{:x}..0x{:x}",
                    address,
                    end,
                    other,
                    start,
                    other_end
                );
            }
        }

        self.heap.write(address, &pattern(id, size));
        self.ranges.insert(address, (end, id));
        self.blocks[id] = Some(Block { address, size });

        self.payload += size;
        self.peak_payload = self.peak_payload.max(self.payload);

        Ok(())
    }

    fn untrack(&mut self, id: usize) -> Option<Block> {
        let block = self.blocks[id].take()?;
        self.ranges.remove(&block.address);
        self.payload -= block.size;
        Some(block)
    }

    /// Make sure the first `len` bytes at `address` still hold the pattern of the block `id`.
    fn verify(&self, id: usize, address: BlockAddress, len: u64) -> Result<()> {
        let mut content = vec![0; len as usize];
        self.heap.read(address, &mut content);

        let expected = pattern(id, len);
        if let Some(offset) = content.iter().zip(&expected).position(|(a, b)| a != b) {
            bail!(
                "Byte {} of block {} at 0x{:x} is 0x{:02x}, expected 0x{:02x}",
                offset,
                id,
                address,
                content[offset],
                expected[offset]
            );
        }

        Ok(())
    }
}

/// The bytes the driver writes to the payload of the block `id`.
fn pattern(id: usize, len: u64) -> Vec<u8> {
    let seed = (id as u8).wrapping_mul(31).wrapping_add(7);
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}
