use crate::BlockAddress;
use std::error;
use std::fmt;

/// A possible error value when dealing with the heap.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HeapError {
    /// No more memory could be obtained from the underlying memory, or the request is larger than
    /// the heap could ever address.
    OutOfMemory,
    /// The address was not handed out by this allocator, or it has already been freed.
    InvalidPointer(BlockAddress),
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("Out of memory"),
            Self::InvalidPointer(addr) => write!(f, "Invalid pointer 0x{:x}", addr),
        }
    }
}

impl error::Error for HeapError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(HeapError::OutOfMemory.to_string(), "Out of memory");
        assert_eq!(
            HeapError::InvalidPointer(0x1a).to_string(),
            "Invalid pointer 0x1a"
        );
    }
}
