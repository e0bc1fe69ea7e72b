//! Per-node state of the segment tree
//!
//! A [`Node`] describes one sub-range `[minbound, maxbound)`. It does not store
//! its own bounds: they are implied by its position and recomputed on every
//! walk. Three independent optional parts are materialized lazily:
//! - `buffer`: raw bytes, only on leaves, only once a non-uniform write happens
//! - `left` / `right`: children, only once a walk needs to split below this node
//! - the uniform fill, carried by [`FillState::Memset`] without any buffer

use std::fmt;

/// What is known about the contents of a node's span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillState {
    /// Allocated but never defined; reading it is illegal
    Uninit,
    /// Every byte of the span equals this value
    Memset(u8),
    /// Ask the buffer (leaf) or the children (internal node)
    #[default]
    Unknown,
}

impl FillState {
    /// Whether this state describes the whole span without looking further down
    pub fn is_resolved(&self) -> bool {
        !matches!(self, FillState::Unknown)
    }
}

impl fmt::Display for FillState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillState::Uninit => write!(f, "Uninit"),
            FillState::Memset(byte) => write!(f, "Memset(0x{:02x})", byte),
            FillState::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Allocation provenance of a node
///
/// `free` only releases memory whose provenance matches the one requested,
/// so a stack slot can never be released through the heap API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AllocStatus {
    #[default]
    Unallocated,
    Malloc,
    Alloca,
    Global,
}

impl AllocStatus {
    pub fn is_allocated(&self) -> bool {
        !matches!(self, AllocStatus::Unallocated)
    }
}

impl fmt::Display for AllocStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocStatus::Unallocated => write!(f, "Unallocated"),
            AllocStatus::Malloc => write!(f, "Malloc"),
            AllocStatus::Alloca => write!(f, "Alloca"),
            AllocStatus::Global => write!(f, "Global"),
        }
    }
}

/// One node of the segment tree
///
/// Each node exclusively owns its children. Dropping a node drops its whole
/// subtree, which is exactly what `free` relies on.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub fill: FillState,
    pub status: AllocStatus,
    /// Bytes actually allocated from the start of this node's span
    pub claimed: u64,
    pub buffer: Option<Box<[u8]>>,
    pub left: Option<Box<Node>>,
    pub right: Option<Box<Node>>,
}

impl Node {
    /// Fresh node inheriting a fill state from its parent
    pub fn with_fill(fill: FillState) -> Self {
        Node {
            fill,
            ..Node::default()
        }
    }

    pub fn has_children(&self) -> bool {
        self.left.is_some() || self.right.is_some()
    }

    /// Materialize the leaf buffer, seeding it from the current fill
    ///
    /// A `Memset(b)` leaf gets a buffer full of `b`; anything else starts zeroed.
    pub fn buffer_mut(&mut self, chunk_size: usize) -> &mut [u8] {
        let seed = match self.fill {
            FillState::Memset(byte) => byte,
            FillState::Uninit | FillState::Unknown => 0,
        };
        self.buffer
            .get_or_insert_with(|| vec![seed; chunk_size].into_boxed_slice())
    }

    /// Push this node's fill state down into freshly created children
    ///
    /// Children that already exist keep their own state. Afterwards this node
    /// defers to its children (`Unknown`).
    pub fn force_children_and_derive_state(&mut self) {
        let fill = self.fill;
        if self.left.is_none() {
            self.left = Some(Box::new(Node::with_fill(fill)));
        }
        if self.right.is_none() {
            self.right = Some(Box::new(Node::with_fill(fill)));
        }
        self.fill = FillState::Unknown;
    }
}

/// Get the node in `slot`, creating a transparent one if it is absent
pub fn force(slot: &mut Option<Box<Node>>) -> &mut Node {
    slot.get_or_insert_with(Box::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_creates_transparent_node() {
        let mut slot = None;
        let node = force(&mut slot);
        assert_eq!(node.fill, FillState::Unknown);
        assert_eq!(node.status, AllocStatus::Unallocated);
        assert!(node.buffer.is_none());
        assert!(!node.has_children());
    }

    #[test]
    fn test_force_children_pushes_fill_down() {
        let mut node = Node::with_fill(FillState::Memset(0x41));
        node.force_children_and_derive_state();

        assert_eq!(node.fill, FillState::Unknown);
        assert_eq!(node.left.as_ref().map(|n| n.fill), Some(FillState::Memset(0x41)));
        assert_eq!(node.right.as_ref().map(|n| n.fill), Some(FillState::Memset(0x41)));
    }

    #[test]
    fn test_force_children_keeps_existing_child() {
        let mut node = Node::with_fill(FillState::Uninit);
        node.left = Some(Box::new(Node::with_fill(FillState::Memset(7))));
        node.force_children_and_derive_state();

        assert_eq!(node.left.as_ref().map(|n| n.fill), Some(FillState::Memset(7)));
        assert_eq!(node.right.as_ref().map(|n| n.fill), Some(FillState::Uninit));
    }

    #[test]
    fn test_buffer_seeded_from_memset() {
        let mut node = Node::with_fill(FillState::Memset(0xAA));
        assert!(node.buffer_mut(8).iter().all(|&b| b == 0xAA));

        let mut node = Node::with_fill(FillState::Uninit);
        assert!(node.buffer_mut(8).iter().all(|&b| b == 0));
    }
}
