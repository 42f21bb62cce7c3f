use crate::memory::Memory;

/// Size of one word in the heap, the unit of boundary tags and free list links.
pub const WORD_SIZE: u64 = 4;

// Reads a little-endian word from memory.
#[inline]
pub fn read_word<M: Memory>(memory: &M, addr: u64) -> u32 {
    let mut buf = [0; WORD_SIZE as usize];
    memory.read(addr, &mut buf);
    u32::from_le_bytes(buf)
}

// Writes a little-endian word to memory.
#[inline]
pub fn write_word<M: Memory>(memory: &mut M, addr: u64, value: u32) {
    memory.write(addr, &value.to_le_bytes());
}

/// Round the given value up to the next multiple of `align`, which must be a power of two.
/// Returns `None` on overflow.
#[inline]
pub const fn align_up(value: u64, align: u64) -> Option<u64> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::VecMemory;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), Some(0));
        assert_eq!(align_up(1, 8), Some(8));
        assert_eq!(align_up(8, 8), Some(8));
        assert_eq!(align_up(13, 8), Some(16));
        assert_eq!(align_up(u64::MAX, 8), None);
    }

    #[test]
    fn word_round_trip() {
        let mut memory = VecMemory::new();
        memory.grow(8).unwrap();
        write_word(&mut memory, 4, 0xdeadbeef);
        assert_eq!(read_word(&memory, 4), 0xdeadbeef);
        assert_eq!(memory.as_bytes(), &[0, 0, 0, 0, 0xef, 0xbe, 0xad, 0xde]);
    }
}
