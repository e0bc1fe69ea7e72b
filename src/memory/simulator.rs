//! Program-level memory on top of the segment tree
//!
//! [`MemorySimulator`] is what an executor talks to: it decides *where* things
//! live and leaves *what* they contain to the [`SegmentTree`].
//!
//! # Layout
//!
//! The range is cut into four equal regions:
//! ```text
//! [start, +q)     null     never handed out, so `start` is never a valid pointer
//! [+q,   +2q)     globals
//! [+2q,  +3q)     stack    rewound by pop_frame
//! [+3q,  +4q)     heap     bump only, addresses are never reused
//! ```
//!
//! Every allocation gets a span of `chunk_size * 2^k` (the smallest one that
//! fits) at a span-aligned address, so it lands on exactly one tree node. Spans
//! already holding an allocation made directly through the tree are skipped.

use super::errors::{signal, MemoryError};
use super::node::{AllocStatus, FillState};
use super::tree::{AddressRange, AllocationInfo, SegmentTree};
use super::{span_for, Address, Size};
use std::fmt;
use tracing::debug;

/// Initial contents of a heap block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MallocFill {
    /// Reading before writing is an error
    #[default]
    Uninit,
    /// Zero-filled, like calloc
    Zero,
    /// Contents are unspecified but readable
    Unknown,
}

impl MallocFill {
    pub fn fill_state(self) -> FillState {
        match self {
            MallocFill::Uninit => FillState::Uninit,
            MallocFill::Zero => FillState::Memset(0),
            MallocFill::Unknown => FillState::Unknown,
        }
    }
}

/// Which quarter of the range an address belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Null,
    Globals,
    Stack,
    Heap,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Null => write!(f, "null"),
            Region::Globals => write!(f, "globals"),
            Region::Stack => write!(f, "stack"),
            Region::Heap => write!(f, "heap"),
        }
    }
}

/// An allocation currently held in the tree, with the region it lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveAllocation {
    pub start: Address,
    pub size: Size,
    pub status: AllocStatus,
    pub fill: FillState,
    pub region: Region,
}

/// Bump allocator over one region
#[derive(Debug, Clone)]
struct Arena {
    base: Address,
    limit: Address,
    next: Address,
}

impl Arena {
    fn new(base: Address, limit: Address) -> Self {
        Arena {
            base,
            limit,
            next: base,
        }
    }

    /// Reserve a span-aligned slot for `size` bytes
    fn bump(&mut self, size: Size, chunk_size: Size) -> Result<Address, MemoryError> {
        let out_of_memory = MemoryError::OutOfMemory {
            requested: size,
            available: self.limit - self.next,
        };
        let span = match span_for(size, chunk_size) {
            Some(span) => span,
            None => return signal(out_of_memory),
        };

        // region bases are multiples of every span that fits in the region
        let offset = self.next - self.base;
        let aligned = match offset.checked_next_multiple_of(span) {
            Some(aligned) => self.base + aligned,
            None => return signal(out_of_memory),
        };
        match aligned.checked_add(span) {
            Some(end) if end <= self.limit => {
                self.next = end;
                Ok(aligned)
            }
            _ => signal(out_of_memory),
        }
    }
}

/// Allocas of one stack frame
#[derive(Debug, Clone)]
struct Frame {
    stack_mark: Address,
    allocas: Vec<Address>,
}

/// Byte-addressable program memory: globals, a stack of frames and a heap
#[derive(Debug, Clone)]
pub struct MemorySimulator {
    tree: SegmentTree,
    quarter: Size,
    globals: Arena,
    stack: Arena,
    heap: Arena,
    frames: Vec<Frame>,
}

impl MemorySimulator {
    pub fn new(range: AddressRange) -> Result<Self, MemoryError> {
        if range.width() / 4 < range.chunk_size {
            return signal(MemoryError::InvalidGeometry {
                message: format!(
                    "range of {} bytes cannot hold four regions of {}-byte chunks",
                    range.width(),
                    range.chunk_size
                ),
            });
        }

        let quarter = range.width() / 4;
        let region = |n: u64| range.start + n * quarter;
        let stack = Arena::new(region(2), region(3));

        Ok(MemorySimulator {
            tree: SegmentTree::with_range(range),
            quarter,
            globals: Arena::new(region(1), region(2)),
            frames: vec![Frame {
                stack_mark: stack.next,
                allocas: Vec::new(),
            }],
            stack,
            heap: Arena::new(region(3), range.end),
        })
    }

    pub fn tree(&self) -> &SegmentTree {
        &self.tree
    }

    /// Direct access to the underlying tree, bypassing region bookkeeping
    pub fn tree_mut(&mut self) -> &mut SegmentTree {
        &mut self.tree
    }

    pub fn range(&self) -> &AddressRange {
        self.tree.range()
    }

    /// The null pointer of this address space
    pub fn null(&self) -> Address {
        self.range().start
    }

    pub fn region_of(&self, addr: Address) -> Option<Region> {
        let range = self.range();
        if !range.contains(addr) {
            return None;
        }
        Some(match (addr - range.start) / self.quarter {
            0 => Region::Null,
            1 => Region::Globals,
            2 => Region::Stack,
            _ => Region::Heap,
        })
    }

    fn live(&self, alloc: AllocationInfo) -> Option<LiveAllocation> {
        Some(LiveAllocation {
            start: alloc.start,
            size: alloc.claimed,
            status: alloc.status,
            fill: alloc.fill,
            region: self.region_of(alloc.start)?,
        })
    }

    /// Live allocations in address order, whichever way they were made
    pub fn allocations(&self) -> Vec<LiveAllocation> {
        self.tree
            .allocations()
            .into_iter()
            .filter_map(|alloc| self.live(alloc))
            .collect()
    }

    pub fn allocation_at(&self, start: Address) -> Option<LiveAllocation> {
        self.tree
            .allocation_at(start)
            .and_then(|alloc| self.live(alloc))
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    fn place(
        &mut self,
        region: Region,
        size: Size,
        fill: FillState,
        status: AllocStatus,
    ) -> Result<Address, MemoryError> {
        let chunk_size = self.range().chunk_size;
        let arena = match region {
            Region::Globals => &mut self.globals,
            Region::Stack => &mut self.stack,
            Region::Heap => &mut self.heap,
            Region::Null => {
                return signal(MemoryError::unsupported(
                    self.tree.range().start,
                    "nothing is allocated in the null region",
                ))
            }
        };
        let start = loop {
            let candidate = arena.bump(size, chunk_size)?;
            let occupied = self.tree.allocations_in(candidate, arena.next);
            match occupied.iter().map(|alloc| alloc.node_end).max() {
                None => break candidate,
                Some(end) => {
                    debug!(candidate, end, %region, "span already allocated, skipping");
                    arena.next = arena.next.max(end);
                }
            }
        };
        self.tree.allocate(start, size, fill, status)?;

        debug!(start, size, %region, %status, "placed allocation");
        Ok(start)
    }

    /// Stack slot for `count` elements of `elem_size` bytes, zero-filled
    pub fn alloca(&mut self, count: Size, elem_size: Size) -> Result<Address, MemoryError> {
        let size = byte_count(count, elem_size)?.max(1);
        let start = self.place(Region::Stack, size, FillState::Memset(0), AllocStatus::Alloca)?;
        if let Some(frame) = self.frames.last_mut() {
            frame.allocas.push(start);
        }
        Ok(start)
    }

    pub fn malloc(&mut self, size: Size, fill: MallocFill) -> Result<Address, MemoryError> {
        self.place(Region::Heap, size.max(1), fill.fill_state(), AllocStatus::Malloc)
    }

    pub fn calloc(&mut self, count: Size, elem_size: Size) -> Result<Address, MemoryError> {
        self.malloc(byte_count(count, elem_size)?, MallocFill::Zero)
    }

    /// Zero-initialised global object
    pub fn global(&mut self, size: Size) -> Result<Address, MemoryError> {
        self.place(Region::Globals, size.max(1), FillState::Memset(0), AllocStatus::Global)
    }

    /// Release a heap block; freeing the null pointer does nothing
    pub fn free(&mut self, addr: Address) -> Result<(), MemoryError> {
        if addr == self.null() {
            return Ok(());
        }
        self.tree.free(addr, AllocStatus::Malloc)
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Frame {
            stack_mark: self.stack.next,
            allocas: Vec::new(),
        });
    }

    /// Drop the innermost frame, releasing its allocas
    pub fn pop_frame(&mut self) -> Result<(), MemoryError> {
        if self.frames.len() <= 1 {
            return signal(MemoryError::inconsistency("pop of the outermost stack frame"));
        }
        let Some(frame) = self.frames.pop() else {
            return signal(MemoryError::inconsistency("stack frame list is empty"));
        };

        for start in frame.allocas.iter().rev() {
            self.tree.free(*start, AllocStatus::Alloca)?;
        }
        self.stack.next = frame.stack_mark;
        debug!(released = frame.allocas.len(), depth = self.frames.len(), "popped frame");
        Ok(())
    }

    pub fn store_bytes(&mut self, addr: Address, data: &[u8]) -> Result<(), MemoryError> {
        self.tree.store(addr, data)
    }

    pub fn load_bytes(&mut self, addr: Address, len: Size) -> Result<Vec<u8>, MemoryError> {
        self.tree.read(addr, len)
    }

    /// Store the low `width` bytes of `value`, little-endian
    pub fn store_int(
        &mut self,
        addr: Address,
        value: u64,
        width: usize,
    ) -> Result<(), MemoryError> {
        check_int_width(addr, width)?;
        self.tree.store(addr, &value.to_le_bytes()[..width])
    }

    /// Load a `width`-byte little-endian integer, zero-extended
    pub fn load_int(&mut self, addr: Address, width: usize) -> Result<u64, MemoryError> {
        check_int_width(addr, width)?;
        let bytes = self.tree.read(addr, width as Size)?;
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn memset(&mut self, addr: Address, fill: u8, size: Size) -> Result<(), MemoryError> {
        self.tree.memset(addr, fill, size)
    }

    /// Copy through a temporary, so overlapping ranges are tolerated
    pub fn memcpy(&mut self, dst: Address, src: Address, size: Size) -> Result<(), MemoryError> {
        let bytes = self.tree.read(src, size)?;
        self.tree.store(dst, &bytes)
    }

    pub fn memmove(&mut self, dst: Address, src: Address, size: Size) -> Result<(), MemoryError> {
        self.tree.memmove(src, dst, size)
    }

    pub fn memchr(
        &mut self,
        addr: Address,
        ch: u8,
        limit: Option<Size>,
    ) -> Result<Option<Address>, MemoryError> {
        self.tree.memchr(addr, ch, limit)
    }

    /// Length of the NUL-terminated string at `addr`
    pub fn strlen(&mut self, addr: Address) -> Result<Size, MemoryError> {
        match self.tree.memchr(addr, 0, None)? {
            Some(end) => Ok(end - addr),
            None => signal(MemoryError::IllegalLoad { address: addr }),
        }
    }
}

fn byte_count(count: Size, elem_size: Size) -> Result<Size, MemoryError> {
    match count.checked_mul(elem_size) {
        Some(size) => Ok(size),
        None => signal(MemoryError::OutOfMemory {
            requested: Size::MAX,
            available: 0,
        }),
    }
}

fn check_int_width(addr: Address, width: usize) -> Result<(), MemoryError> {
    if (1..=8).contains(&width) {
        return Ok(());
    }
    signal(MemoryError::unsupported(
        addr,
        format!("integer width {} is not between 1 and 8 bytes", width),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_aligns_to_span() {
        let mut arena = Arena::new(0x4000, 0x8000);
        assert_eq!(arena.bump(16, 0x100).unwrap(), 0x4000);
        assert_eq!(arena.bump(0x101, 0x100).unwrap(), 0x4200);
        assert_eq!(arena.bump(1, 0x100).unwrap(), 0x4400);
        assert_eq!(arena.next, 0x4500);
    }

    #[test]
    fn test_arena_exhaustion() {
        let mut arena = Arena::new(0, 0x200);
        arena.bump(0x100, 0x100).unwrap();
        assert!(matches!(
            arena.bump(0x101, 0x100),
            Err(MemoryError::OutOfMemory { requested: 0x101, available: 0x100 })
        ));
    }

    #[test]
    fn test_regions() {
        let range = AddressRange::new(0, 0x10000, 0x100).unwrap();
        let sim = MemorySimulator::new(range).unwrap();
        assert_eq!(sim.region_of(0), Some(Region::Null));
        assert_eq!(sim.region_of(0x4000), Some(Region::Globals));
        assert_eq!(sim.region_of(0xbfff), Some(Region::Stack));
        assert_eq!(sim.region_of(0xc000), Some(Region::Heap));
        assert_eq!(sim.region_of(0x10000), None);
    }

    #[test]
    fn test_too_small_for_regions() {
        let range = AddressRange::new(0, 0x200, 0x100).unwrap();
        assert!(matches!(
            MemorySimulator::new(range),
            Err(MemoryError::InvalidGeometry { .. })
        ));
    }
}
