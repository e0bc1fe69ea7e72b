//! Sparse memory model
//!
//! This module provides the byte-addressable memory used to replay a concrete
//! heap from a solver model:
//! - [`tree`]: the [`SegmentTree`] itself and its traversal engine
//! - [`node`]: per-node state ([`FillState`], [`AllocStatus`], lazy buffers)
//! - [`visitor`]: the operation strategies plugged into the traversal
//! - [`interval`]: contiguous runs collected from the tree (used by `memmove`)
//! - [`simulator`]: the [`MemorySimulator`] facade with stack/heap/global regions
//! - [`errors`]: the fatal conditions every operation can raise
//!
//! # Address Space
//!
//! The simulated range `[start, end)` is split by repeated halving. A node
//! stops splitting once its span equals `chunk_size`; such a leaf holds raw
//! bytes. Nothing is materialized for addresses that were never touched:
//! ```text
//! [0x0000, 0x4000)
//! ├── [0x0000, 0x2000)
//! │   ├── [0x0000, 0x1000)   (absent)
//! │   └── [0x1000, 0x2000)   Malloc, 16 bytes, buffer
//! └── [0x2000, 0x4000)       (absent)
//! ```

pub mod errors;
pub mod interval;
pub mod node;
pub mod simulator;
pub mod tree;
pub(crate) mod visitor;

pub use errors::MemoryError;
pub use node::{AllocStatus, FillState, Node};
pub use simulator::{LiveAllocation, MallocFill, MemorySimulator, Region};
pub use tree::{AddressRange, AllocationInfo, Segment, SegmentTree, TreeStats};

/// Simulated address (64-bit)
pub type Address = u64;

/// Byte count inside the simulated address space
pub type Size = u64;

/// Midpoint of `[from, to)`, rounded down
pub fn middle(from: Address, to: Address) -> Address {
    from + (to - from) / 2
}

/// Round `size` up to the span of the smallest node able to hold it
///
/// Spans are `chunk_size * 2^k`, so the result is at least `chunk_size`.
pub fn span_for(size: Size, chunk_size: Size) -> Option<Size> {
    let mut span = chunk_size;
    while span < size {
        span = span.checked_mul(2)?;
    }
    Some(span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_middle() {
        assert_eq!(middle(0, 16), 8);
        assert_eq!(middle(0x1000, 0x2000), 0x1800);
        assert_eq!(middle(0, u64::MAX), u64::MAX / 2);
    }

    #[test]
    fn test_span_for() {
        assert_eq!(span_for(1, 4096), Some(4096));
        assert_eq!(span_for(4096, 4096), Some(4096));
        assert_eq!(span_for(4097, 4096), Some(8192));
        assert_eq!(span_for(3 * 4096, 4096), Some(4 * 4096));
        assert_eq!(span_for(u64::MAX, 4096), None);
    }
}
