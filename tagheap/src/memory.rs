use crate::{BlockAddress, HeapError};

/// Default byte limit of a [`VecMemory`]: 20MiB.
pub const DEFAULT_MEMORY_LIMIT: u64 = 20 << 20;

/// The memory interface. An implementation provides one contiguous range of bytes that can only
/// ever be extended at its high end.
pub trait Memory {
    /// Returns the current size of the memory in bytes.
    fn size(&self) -> u64;

    /// Tries to extend the memory by `delta` zeroed bytes at its end and returns the address of the
    /// first new byte. On failure the memory must be left unchanged.
    fn grow(&mut self, delta: u64) -> Result<BlockAddress, HeapError>;

    /// Reads `buf.len()` bytes starting at the given offset.
    ///
    /// # Panics
    ///
    /// If the range is not inside the memory.
    fn read(&self, offset: u64, buf: &mut [u8]);

    /// Writes the given bytes starting at the given offset.
    ///
    /// # Panics
    ///
    /// If the range is not inside the memory.
    fn write(&mut self, offset: u64, buf: &[u8]);

    /// Returns the lowest and one past the highest valid address.
    fn bounds(&self) -> (BlockAddress, BlockAddress) {
        (0, self.size())
    }

    /// Copies `len` bytes from `src` to `dst`, the ranges may overlap.
    fn copy(&mut self, src: u64, dst: u64, len: u64) {
        let mut buf = vec![0; len as usize];
        self.read(src, &mut buf);
        self.write(dst, &buf);
    }
}

/// A memory that stores everything in a vector on the heap of the host process.
#[derive(Debug, Clone)]
pub struct VecMemory {
    data: Vec<u8>,
    limit: u64,
}

impl Default for VecMemory {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MEMORY_LIMIT)
    }
}

impl VecMemory {
    /// Create a new empty memory with the default limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty memory that refuses to grow past `limit` bytes.
    pub fn with_limit(limit: u64) -> Self {
        Self {
            data: Vec::new(),
            limit,
        }
    }

    /// Returns the maximum number of bytes this memory can grow to.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Returns the entire content of the memory.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    fn range(&self, offset: u64, len: usize) -> std::ops::Range<usize> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.data.len() => start..end,
            _ => panic!(
                "access to {} bytes at 0x{:x} is out of memory bounds (size 0x{:x}).",
                len,
                offset,
                self.data.len()
            ),
        }
    }
}

impl Memory for VecMemory {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn grow(&mut self, delta: u64) -> Result<BlockAddress, HeapError> {
        let start = self.size();
        let new_size = start.checked_add(delta).ok_or(HeapError::OutOfMemory)?;

        if new_size > self.limit {
            return Err(HeapError::OutOfMemory);
        }

        self.data.resize(new_size as usize, 0);
        Ok(start)
    }

    fn read(&self, offset: u64, buf: &mut [u8]) {
        let range = self.range(offset, buf.len());
        buf.copy_from_slice(&self.data[range]);
    }

    fn write(&mut self, offset: u64, buf: &[u8]) {
        let range = self.range(offset, buf.len());
        self.data[range].copy_from_slice(buf);
    }

    fn copy(&mut self, src: u64, dst: u64, len: u64) {
        let range = self.range(src, len as usize);
        // validates the destination range.
        self.range(dst, len as usize);
        self.data.copy_within(range, dst as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_returns_previous_end() {
        let mut memory = VecMemory::with_limit(64);
        assert_eq!(memory.grow(16), Ok(0));
        assert_eq!(memory.grow(16), Ok(16));
        assert_eq!(memory.size(), 32);
        assert_eq!(memory.bounds(), (0, 32));
    }

    #[test]
    fn grow_past_limit() {
        let mut memory = VecMemory::with_limit(64);
        assert_eq!(memory.grow(48), Ok(0));
        assert_eq!(memory.grow(17), Err(HeapError::OutOfMemory));
        assert_eq!(memory.size(), 48);
        assert_eq!(memory.grow(u64::MAX), Err(HeapError::OutOfMemory));
        assert_eq!(memory.grow(16), Ok(48));
    }

    #[test]
    fn read_write() {
        let mut memory = VecMemory::new();
        memory.grow(32).unwrap();
        memory.write(4, &[1, 2, 3, 4]);

        let mut buf = [0; 6];
        memory.read(3, &mut buf);
        assert_eq!(buf, [0, 1, 2, 3, 4, 0]);
    }

    #[test]
    fn copy_overlapping() {
        let mut memory = VecMemory::new();
        memory.grow(16).unwrap();
        memory.write(0, &[1, 2, 3, 4, 5]);
        memory.copy(0, 2, 5);
        assert_eq!(&memory.as_bytes()[..8], &[1, 2, 1, 2, 3, 4, 5, 0]);
    }

    #[test]
    #[should_panic]
    fn write_out_of_bounds() {
        let mut memory = VecMemory::new();
        memory.grow(8).unwrap();
        memory.write(6, &[0; 4]);
    }
}
