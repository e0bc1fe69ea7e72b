//! The segment tree and its traversal engine
//!
//! [`SegmentTree`] tracks a huge address range without materializing storage
//! for it. Every public operation builds one [`Visitor`] and hands it to
//! [`walk`], the single routine that knows how to find (or create) the node
//! responsible for an address.

use super::errors::{signal, MemoryError};
use super::interval::{merge_adjacent, Interval, IntervalContent};
use super::node::{force, AllocStatus, FillState, Node};
use super::visitor::{Flow, LoadHit, LoadProbe, Visitor};
use super::{middle, Address, Size};
use crate::config::MAX_CHUNK_SIZE;
use std::fmt::Write as _;
use tracing::{debug, instrument, trace};

/// Whole simulated range plus leaf granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub start: Address,
    pub end: Address,
    pub chunk_size: Size,
}

impl AddressRange {
    /// Validate a geometry
    ///
    /// The width must be `chunk_size * 2^k` so that repeated halving lands
    /// exactly on chunk-sized leaves.
    pub fn new(start: Address, end: Address, chunk_size: Size) -> Result<Self, MemoryError> {
        let invalid = |message: String| signal(MemoryError::InvalidGeometry { message });

        if start >= end {
            return invalid(format!("empty range [0x{:x}, 0x{:x})", start, end));
        }
        if chunk_size == 0 {
            return invalid("chunk size must be positive".to_string());
        }
        if chunk_size > MAX_CHUNK_SIZE {
            return invalid(format!(
                "chunk size {} exceeds the maximum of {}",
                chunk_size, MAX_CHUNK_SIZE
            ));
        }
        let width = end - start;
        if width % chunk_size != 0 || !(width / chunk_size).is_power_of_two() {
            return invalid(format!(
                "range width {} is not chunk size {} times a power of two",
                width, chunk_size
            ));
        }

        Ok(AddressRange {
            start,
            end,
            chunk_size,
        })
    }

    pub fn width(&self) -> Size {
        self.end - self.start
    }

    pub fn contains(&self, at: Address) -> bool {
        self.start <= at && at < self.end
    }

    /// Number of halvings between the root and a leaf
    pub fn depth(&self) -> u32 {
        (self.width() / self.chunk_size).trailing_zeros()
    }

    /// Whether `[at, at + len)` lies inside the range
    pub fn covers(&self, at: Address, len: Size) -> bool {
        self.contains(at) && len <= self.end - at
    }

    pub(crate) fn chunk_len(&self) -> usize {
        // bounded by MAX_CHUNK_SIZE at construction
        self.chunk_size as usize
    }
}

/// A contiguous run returned by [`SegmentTree::get`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Bytes of a materialized leaf, starting at the requested address
    Bytes(&'a [u8]),
    /// `len` bytes that all equal `byte`
    Fill { byte: u8, len: Size },
}

impl Segment<'_> {
    pub fn len(&self) -> Size {
        match self {
            Segment::Bytes(bytes) => bytes.len() as Size,
            Segment::Fill { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte at `offset` within the segment
    pub fn byte_at(&self, offset: usize) -> Option<u8> {
        match self {
            Segment::Bytes(bytes) => bytes.get(offset).copied(),
            Segment::Fill { byte, len } => ((offset as Size) < *len).then_some(*byte),
        }
    }
}

/// Counters describing how much of the tree is materialized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub nodes: usize,
    pub leaves: usize,
    pub buffers: usize,
    pub allocations: usize,
    /// Approximate heap footprint of nodes and buffers
    pub heap_bytes: usize,
}

/// One allocated node, as listed by [`SegmentTree::allocations`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationInfo {
    pub start: Address,
    /// End of the node holding the allocation; nothing else may be placed before it
    pub node_end: Address,
    pub claimed: Size,
    pub status: AllocStatus,
    pub fill: FillState,
}

/// Walk from `slot` toward `at`, creating nodes as needed
///
/// Returns the node where the visitor resolved the operation, or `None` if the
/// visitor dropped it (free).
pub(crate) fn walk<'n>(
    range: &AddressRange,
    at: Address,
    visitor: &mut Visitor<'_>,
    slot: &'n mut Option<Box<Node>>,
    minbound: Address,
    maxbound: Address,
) -> Result<Option<&'n mut Node>, MemoryError> {
    if at < minbound || at >= maxbound {
        return signal(MemoryError::inconsistency(format!(
            "walk to 0x{:x} left [0x{:x}, 0x{:x})",
            at, minbound, maxbound
        )));
    }

    if slot.is_none() {
        visitor.handle_empty_node(at)?;
    }
    force(slot);

    if maxbound - minbound <= range.chunk_size {
        visitor.handle_chunk(range, slot, minbound, maxbound, at)?;
        return Ok(slot.as_deref_mut());
    }

    if visitor.handle_path(range, slot, minbound, maxbound, at)? == Flow::Stop {
        return Ok(slot.as_deref_mut());
    }

    let node = force(slot);
    if visitor.invalidates_state() {
        node.force_children_and_derive_state();
    }

    let mid = middle(minbound, maxbound);
    if at < mid {
        walk(range, at, visitor, &mut node.left, minbound, mid)
    } else {
        walk(range, at, visitor, &mut node.right, mid, maxbound)
    }
}

/// Sparse byte-addressable memory over `[start, end)`
#[derive(Debug, Clone)]
pub struct SegmentTree {
    range: AddressRange,
    root: Option<Box<Node>>,
}

impl SegmentTree {
    pub fn new(start: Address, end: Address, chunk_size: Size) -> Result<Self, MemoryError> {
        Ok(SegmentTree::with_range(AddressRange::new(start, end, chunk_size)?))
    }

    pub fn with_range(range: AddressRange) -> Self {
        SegmentTree { range, root: None }
    }

    pub fn range(&self) -> &AddressRange {
        &self.range
    }

    pub fn root(&self) -> Option<&Node> {
        self.root.as_deref()
    }

    fn traverse(
        &mut self,
        at: Address,
        visitor: &mut Visitor<'_>,
    ) -> Result<Option<&mut Node>, MemoryError> {
        let range = self.range;
        walk(&range, at, visitor, &mut self.root, range.start, range.end)
    }

    /// Mark `size` bytes at `at` as allocated with the given fill and provenance
    #[instrument(level = "trace", skip(self))]
    pub fn allocate(
        &mut self,
        at: Address,
        size: Size,
        fill: FillState,
        status: AllocStatus,
    ) -> Result<(), MemoryError> {
        let width = self.range.width();
        if size > width {
            return signal(MemoryError::OutOfMemory {
                requested: size,
                available: width,
            });
        }
        if !self.range.covers(at, size) {
            let available = if self.range.contains(at) {
                self.range.end - at
            } else {
                0
            };
            return signal(MemoryError::OutOfMemory {
                requested: size,
                available,
            });
        }
        if !status.is_allocated() {
            return signal(MemoryError::unsupported(
                at,
                "allocation needs a provenance other than Unallocated",
            ));
        }
        debug!(at, size, %fill, %status, "allocate");
        self.traverse(at, &mut Visitor::Allocate { size, fill, status })?;
        Ok(())
    }

    /// Write `data` starting at `at`
    #[instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    pub fn store(&mut self, at: Address, data: &[u8]) -> Result<(), MemoryError> {
        if !self.range.covers(at, data.len() as Size) {
            return signal(MemoryError::IllegalStore { address: at });
        }
        if data.is_empty() {
            return Ok(());
        }

        trace!(at, len = data.len(), "store");
        self.traverse(
            at,
            &mut Visitor::Store {
                data,
                found_allocation: false,
            },
        )?;
        Ok(())
    }

    /// Contiguous run of memory starting at `at`
    ///
    /// The run ends at the first place where the tree's description of the
    /// contents changes, or at the end of the enclosing allocation. At the
    /// start of an allocation that claims no bytes the run is empty.
    pub fn get(&mut self, at: Address) -> Result<Segment<'_>, MemoryError> {
        if !self.range.contains(at) {
            return signal(MemoryError::IllegalLoad { address: at });
        }

        let mut probe = LoadProbe::default();
        let node = self.traverse(at, &mut Visitor::Load(&mut probe))?;

        match (probe.hit, node) {
            (Some(LoadHit::Empty), _) => Ok(Segment::Bytes(&[])),
            (Some(LoadHit::Fill { byte, len }), _) => Ok(Segment::Fill { byte, len }),
            (Some(LoadHit::Bytes { offset, len }), Some(node)) => {
                match node.buffer.as_deref().and_then(|buf| buf.get(offset..offset + len)) {
                    Some(bytes) => Ok(Segment::Bytes(bytes)),
                    None => signal(MemoryError::inconsistency(format!(
                        "leaf at 0x{:x} has no bytes for the requested run",
                        at
                    ))),
                }
            }
            _ => signal(MemoryError::inconsistency(format!(
                "load at 0x{:x} resolved no segment",
                at
            ))),
        }
    }

    /// Copy `len` bytes starting at `at`
    pub fn read(&mut self, at: Address, len: Size) -> Result<Vec<u8>, MemoryError> {
        let mut out = Vec::new();
        let mut cursor = at;
        let end = match at.checked_add(len) {
            Some(end) => end,
            None => return signal(MemoryError::IllegalLoad { address: at }),
        };

        while cursor < end {
            let wanted = end - cursor;
            let taken = match self.get(cursor)? {
                Segment::Bytes(bytes) => {
                    let n = (bytes.len() as Size).min(wanted) as usize;
                    out.extend_from_slice(&bytes[..n]);
                    n as Size
                }
                Segment::Fill { byte, len } => {
                    let n = len.min(wanted);
                    out.resize(out.len() + n as usize, byte);
                    n
                }
            };
            if taken == 0 {
                return signal(MemoryError::IllegalLoad { address: cursor });
            }
            cursor += taken;
        }
        Ok(out)
    }

    /// Address of the first `ch` at or after `at`
    ///
    /// Scans at most `limit` bytes (`None` scans until a load fails).
    pub fn memchr(
        &mut self,
        at: Address,
        ch: u8,
        limit: Option<Size>,
    ) -> Result<Option<Address>, MemoryError> {
        trace!(at, ch, ?limit, "memchr");
        let mut cursor = at;
        let mut remaining = limit;

        while remaining != Some(0) {
            let (scanned, found) = {
                let segment = self.get(cursor)?;
                if segment.is_empty() {
                    return signal(MemoryError::IllegalLoad { address: cursor });
                }
                let scanned = remaining.map_or(segment.len(), |left| left.min(segment.len()));
                let found = match segment {
                    Segment::Fill { byte, .. } => (byte == ch).then_some(0),
                    Segment::Bytes(bytes) => {
                        bytes[..scanned as usize].iter().position(|&b| b == ch)
                    }
                };
                (scanned, found)
            };

            if let Some(offset) = found {
                return Ok(Some(cursor + offset as Size));
            }
            cursor += scanned;
            remaining = remaining.map(|left| left - scanned);
        }
        Ok(None)
    }

    /// Release the allocation starting exactly at `at`
    #[instrument(level = "trace", skip(self))]
    pub fn free(&mut self, at: Address, desired: AllocStatus) -> Result<(), MemoryError> {
        if !self.range.contains(at) || !desired.is_allocated() {
            return signal(MemoryError::IllegalFree { address: at });
        }

        debug!(at, %desired, "free");
        self.traverse(at, &mut Visitor::Free { desired })?;
        Ok(())
    }

    /// Fill `size` bytes at `at` with `fill`
    #[instrument(level = "trace", skip(self))]
    pub fn memset(&mut self, at: Address, fill: u8, size: Size) -> Result<(), MemoryError> {
        if !self.range.covers(at, size) {
            return signal(MemoryError::IllegalStore { address: at });
        }
        if size == 0 {
            return Ok(());
        }

        trace!(at, fill, size, "memset");
        self.traverse(
            at,
            &mut Visitor::Memset {
                fill,
                size,
                found_allocation: false,
            },
        )?;
        Ok(())
    }

    /// Capture `[at, at + size)` as runs of uniform fill or raw bytes
    pub fn intervals(&mut self, at: Address, size: Size) -> Result<Vec<Interval>, MemoryError> {
        let mut runs = Vec::new();
        let mut cursor = at;
        let end = match at.checked_add(size) {
            Some(end) => end,
            None => return signal(MemoryError::IllegalLoad { address: at }),
        };

        while cursor < end {
            let wanted = end - cursor;
            let (taken, content) = match self.get(cursor)? {
                Segment::Fill { byte, len } => (len.min(wanted), IntervalContent::Fill(byte)),
                Segment::Bytes(bytes) => {
                    let n = (bytes.len() as Size).min(wanted);
                    (n, IntervalContent::Bytes(bytes[..n as usize].to_vec()))
                }
            };
            if taken == 0 {
                return signal(MemoryError::IllegalLoad { address: cursor });
            }
            runs.push(Interval {
                start: cursor,
                end: cursor + taken,
                content,
            });
            cursor += taken;
        }
        Ok(merge_adjacent(runs))
    }

    /// Copy `size` bytes from `src` to `dst`; the ranges may overlap
    #[instrument(level = "trace", skip(self))]
    pub fn memmove(&mut self, src: Address, dst: Address, size: Size) -> Result<(), MemoryError> {
        if size == 0 {
            return Ok(());
        }
        let source = self.intervals(src, size)?;
        debug!(src, dst, size, runs = source.len(), "memmove");

        for interval in source {
            let target = dst + (interval.start - src);
            match &interval.content {
                IntervalContent::Fill(byte) => self.memset(target, *byte, interval.size())?,
                IntervalContent::Bytes(bytes) => self.store(target, bytes)?,
            }
        }
        Ok(())
    }

    /// Byte a load at `at` would observe, without touching the tree
    ///
    /// `None` where a load would fail.
    pub fn peek(&self, at: Address) -> Option<u8> {
        if !self.range.contains(at) {
            return None;
        }
        let mut node = self.root.as_deref()?;
        let (mut minbound, mut maxbound) = (self.range.start, self.range.end);
        let mut allocation_end = None;

        loop {
            if node.status.is_allocated() {
                allocation_end = Some(minbound.saturating_add(node.claimed));
            }
            if allocation_end.map_or(false, |end| at >= end) {
                return None;
            }
            match node.fill {
                FillState::Uninit => return None,
                FillState::Memset(byte) => return Some(byte),
                FillState::Unknown => {}
            }

            if maxbound - minbound <= self.range.chunk_size {
                return match &node.buffer {
                    Some(buffer) => buffer.get((at - minbound) as usize).copied(),
                    None => allocation_end.map(|_| 0),
                };
            }

            let mid = middle(minbound, maxbound);
            let child = if at < mid {
                maxbound = mid;
                &node.left
            } else {
                minbound = mid;
                &node.right
            };
            match child.as_deref() {
                Some(next) => node = next,
                // materialized on load as a transparent node over zeroes
                None => return allocation_end.map(|_| 0),
            }
        }
    }

    /// [`peek`](Self::peek) over `len` consecutive bytes
    pub fn peek_range(&self, at: Address, len: usize) -> Vec<Option<u8>> {
        (0..len as Size)
            .map(|offset| at.checked_add(offset).and_then(|addr| self.peek(addr)))
            .collect()
    }

    pub fn stats(&self) -> TreeStats {
        fn visit(node: &Node, span: Size, chunk_size: Size, stats: &mut TreeStats) {
            stats.nodes += 1;
            stats.heap_bytes += std::mem::size_of::<Node>();
            if span <= chunk_size {
                stats.leaves += 1;
            }
            if let Some(buffer) = &node.buffer {
                stats.buffers += 1;
                stats.heap_bytes += buffer.len();
            }
            if node.status.is_allocated() {
                stats.allocations += 1;
            }
            for child in [&node.left, &node.right].into_iter().flatten() {
                visit(child, span / 2, chunk_size, stats);
            }
        }

        let mut stats = TreeStats::default();
        if let Some(root) = &self.root {
            visit(root, self.range.width(), self.range.chunk_size, &mut stats);
        }
        stats
    }

    /// Every allocated node, in address order
    pub fn allocations(&self) -> Vec<AllocationInfo> {
        self.allocations_in(self.range.start, self.range.end)
    }

    /// Allocated nodes whose span intersects `[lo, hi)`, in address order
    ///
    /// Node spans either nest or are disjoint, so a non-empty result means an
    /// allocation at `lo` spanning up to `hi` would nest with these.
    pub fn allocations_in(&self, lo: Address, hi: Address) -> Vec<AllocationInfo> {
        fn visit(
            node: &Node,
            minbound: Address,
            maxbound: Address,
            window: (Address, Address),
            out: &mut Vec<AllocationInfo>,
        ) {
            if maxbound <= window.0 || window.1 <= minbound {
                return;
            }
            if node.status.is_allocated() {
                out.push(AllocationInfo {
                    start: minbound,
                    node_end: maxbound,
                    claimed: node.claimed,
                    status: node.status,
                    fill: node.fill,
                });
            }
            let mid = middle(minbound, maxbound);
            if let Some(left) = &node.left {
                visit(left, minbound, mid, window, out);
            }
            if let Some(right) = &node.right {
                visit(right, mid, maxbound, window, out);
            }
        }

        let mut out = Vec::new();
        if let Some(root) = &self.root {
            visit(root, self.range.start, self.range.end, (lo, hi), &mut out);
        }
        out
    }

    /// The outermost allocation starting exactly at `at`
    pub fn allocation_at(&self, at: Address) -> Option<AllocationInfo> {
        if !self.range.contains(at) {
            return None;
        }
        self.allocations_in(at, at + 1)
            .into_iter()
            .find(|alloc| alloc.start == at)
    }

    /// One indented line per materialized node
    pub fn dump(&self) -> Vec<String> {
        fn visit(
            node: &Node,
            minbound: Address,
            maxbound: Address,
            depth: usize,
            out: &mut Vec<String>,
        ) {
            let mut line = format!(
                "{}[0x{:x}, 0x{:x}) {}",
                "  ".repeat(depth),
                minbound,
                maxbound,
                node.fill
            );
            if node.status.is_allocated() {
                let _ = write!(line, " {} claimed={}", node.status, node.claimed);
            }
            if node.buffer.is_some() {
                line.push_str(" buffer");
            }
            out.push(line);

            let mid = middle(minbound, maxbound);
            if let Some(left) = &node.left {
                visit(left, minbound, mid, depth + 1, out);
            }
            if let Some(right) = &node.right {
                visit(right, mid, maxbound, depth + 1, out);
            }
        }

        let mut out = Vec::new();
        if let Some(root) = &self.root {
            visit(root, self.range.start, self.range.end, 0, &mut out);
        }
        out
    }
}
