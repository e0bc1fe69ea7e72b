//! Operation strategies for the traversal engine
//!
//! Each public operation of [`SegmentTree`](super::SegmentTree) is one
//! [`Visitor`] variant carrying its parameters. The engine asks the visitor two
//! questions at every step:
//! - [`Visitor::handle_path`]: at an internal node, stop here or keep descending?
//! - [`Visitor::handle_chunk`]: at a leaf, apply the operation to the raw chunk.
//!
//! Operations that straddle a node's midpoint split themselves into two
//! sub-visitors and walk both children from inside `handle_path`.

use super::errors::{signal, MemoryError};
use super::node::{AllocStatus, FillState, Node};
use super::tree::{walk, AddressRange};
use super::{middle, Address, Size};
use tracing::trace;

/// Decision taken by a visitor at an internal node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// The operation is fully resolved at this node
    Stop,
    /// Continue toward the child containing the target address
    Descend,
}

/// Where a load ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadHit {
    /// Start of an allocation that claims no bytes
    Empty,
    Fill { byte: u8, len: Size },
    Bytes { offset: usize, len: usize },
}

/// Output of a load walk
#[derive(Debug, Default)]
pub(crate) struct LoadProbe {
    /// End of the innermost allocation seen on the way down
    allocation_end: Option<Address>,
    pub(crate) hit: Option<LoadHit>,
}

impl LoadProbe {
    fn note_allocation(&mut self, node: &Node, minbound: Address) {
        if node.status.is_allocated() {
            self.allocation_end = Some(minbound.saturating_add(node.claimed));
        }
    }

    /// Right edge of the readable run starting at `at` inside `[.., maxbound)`
    fn readable_end(&self, at: Address, maxbound: Address) -> Result<Address, MemoryError> {
        let end = self
            .allocation_end
            .map_or(maxbound, |alloc_end| alloc_end.min(maxbound));
        if at >= end {
            return signal(MemoryError::IllegalLoad { address: at });
        }
        Ok(end)
    }
}

/// One operation, as seen by the traversal engine
pub(crate) enum Visitor<'a> {
    Allocate {
        size: Size,
        fill: FillState,
        status: AllocStatus,
    },
    Store {
        data: &'a [u8],
        found_allocation: bool,
    },
    Load(&'a mut LoadProbe),
    Free {
        desired: AllocStatus,
    },
    Memset {
        fill: u8,
        size: Size,
        found_allocation: bool,
    },
}

fn present(slot: &mut Option<Box<Node>>) -> Result<&mut Node, MemoryError> {
    match slot.as_deref_mut() {
        Some(node) => Ok(node),
        None => signal(MemoryError::inconsistency("visited node is not materialized")),
    }
}

impl Visitor<'_> {
    /// Whether descending through a node must push its fill state down first
    pub(crate) fn invalidates_state(&self) -> bool {
        matches!(
            self,
            Visitor::Allocate { .. } | Visitor::Store { .. } | Visitor::Memset { .. }
        )
    }

    /// Called before an absent node is materialized
    pub(crate) fn handle_empty_node(&mut self, at: Address) -> Result<(), MemoryError> {
        match self {
            Visitor::Load(probe) if probe.allocation_end.is_none() => {
                signal(MemoryError::IllegalLoad { address: at })
            }
            Visitor::Free { .. } => signal(MemoryError::IllegalFree { address: at }),
            _ => Ok(()),
        }
    }

    pub(crate) fn handle_path(
        &mut self,
        range: &AddressRange,
        slot: &mut Option<Box<Node>>,
        minbound: Address,
        maxbound: Address,
        at: Address,
    ) -> Result<Flow, MemoryError> {
        let available = maxbound - minbound;
        let mid = middle(minbound, maxbound);

        match self {
            Visitor::Allocate { size, fill, status } => {
                let node = present(slot)?;
                if at.saturating_add(*size) > maxbound {
                    return signal(MemoryError::unsupported(
                        at,
                        format!("allocation of {} bytes crosses 0x{:x}", size, maxbound),
                    ));
                }
                if minbound == at && available / 2 < *size && *size <= available {
                    claim(node, *size, *fill, *status);
                    trace!(minbound, maxbound, size = *size, "allocated segment");
                    return Ok(Flow::Stop);
                }
                Ok(Flow::Descend)
            }

            Visitor::Store {
                data,
                found_allocation,
            } => {
                let data: &[u8] = *data;
                let node = present(slot)?;
                check_allocation(node, minbound, at, data.len() as Size, found_allocation)?;

                let end = at + data.len() as Size;
                if at < mid && end > mid {
                    node.force_children_and_derive_state();
                    let (left_data, right_data) = data.split_at((mid - at) as usize);

                    let mut left = Visitor::Store {
                        data: left_data,
                        found_allocation: *found_allocation,
                    };
                    walk(range, at, &mut left, &mut node.left, minbound, mid)?;
                    let mut right = Visitor::Store {
                        data: right_data,
                        found_allocation: *found_allocation,
                    };
                    walk(range, mid, &mut right, &mut node.right, mid, maxbound)?;
                    return Ok(Flow::Stop);
                }
                Ok(Flow::Descend)
            }

            Visitor::Load(probe) => {
                let node = present(slot)?;
                probe.note_allocation(node, minbound);
                match node.fill {
                    FillState::Uninit => signal(MemoryError::IllegalLoad { address: at }),
                    FillState::Memset(byte) => {
                        let end = probe.readable_end(at, maxbound)?;
                        probe.hit = Some(LoadHit::Fill {
                            byte,
                            len: end - at,
                        });
                        Ok(Flow::Stop)
                    }
                    FillState::Unknown => Ok(Flow::Descend),
                }
            }

            Visitor::Free { desired } => {
                let node = present(slot)?;
                if !node.status.is_allocated() {
                    return Ok(Flow::Descend);
                }
                if minbound == at && node.status == *desired {
                    trace!(minbound, maxbound, status = %node.status, "freed segment");
                    *slot = None;
                    return Ok(Flow::Stop);
                }
                signal(MemoryError::IllegalFree { address: at })
            }

            Visitor::Memset {
                fill,
                size,
                found_allocation,
            } => {
                let (fill, size) = (*fill, *size);
                let node = present(slot)?;
                check_allocation(node, minbound, at, size, found_allocation)?;
                let end = at + size;

                if at <= minbound && maxbound <= end && !node.has_children() {
                    if !*found_allocation {
                        return signal(MemoryError::IllegalStore { address: at });
                    }
                    node.fill = FillState::Memset(fill);
                    node.buffer = None;
                    return Ok(Flow::Stop);
                }
                if at < mid && end > mid {
                    node.force_children_and_derive_state();

                    let mut left = Visitor::Memset {
                        fill,
                        size: mid - at,
                        found_allocation: *found_allocation,
                    };
                    walk(range, at, &mut left, &mut node.left, minbound, mid)?;
                    let mut right = Visitor::Memset {
                        fill,
                        size: end - mid,
                        found_allocation: *found_allocation,
                    };
                    walk(range, mid, &mut right, &mut node.right, mid, maxbound)?;
                    return Ok(Flow::Stop);
                }
                Ok(Flow::Descend)
            }
        }
    }

    pub(crate) fn handle_chunk(
        &mut self,
        range: &AddressRange,
        slot: &mut Option<Box<Node>>,
        minbound: Address,
        maxbound: Address,
        at: Address,
    ) -> Result<(), MemoryError> {
        let chunk_len = range.chunk_len();
        let offset = (at - minbound) as usize;

        match self {
            Visitor::Allocate { size, fill, status } => {
                let node = present(slot)?;
                if at != minbound {
                    return signal(MemoryError::unsupported(
                        at,
                        format!("allocation must start on a chunk boundary (0x{:x})", minbound),
                    ));
                }
                if *size > range.chunk_size || *size > maxbound - minbound {
                    return signal(MemoryError::unsupported(
                        at,
                        format!("allocation of {} bytes does not fit in a chunk", size),
                    ));
                }
                claim(node, *size, *fill, *status);
                trace!(minbound, size = *size, "allocated chunk segment");
                Ok(())
            }

            Visitor::Store {
                data,
                found_allocation,
            } => {
                let data: &[u8] = *data;
                let node = present(slot)?;
                check_allocation(node, minbound, at, data.len() as Size, found_allocation)?;
                if !*found_allocation {
                    return signal(MemoryError::IllegalStore { address: at });
                }
                if offset + data.len() > chunk_len {
                    return signal(MemoryError::inconsistency(format!(
                        "store of {} bytes at 0x{:x} overruns its chunk",
                        data.len(),
                        at
                    )));
                }

                node.buffer_mut(chunk_len)[offset..offset + data.len()].copy_from_slice(data);
                node.fill = FillState::Unknown;
                Ok(())
            }

            Visitor::Load(probe) => {
                let node = present(slot)?;
                probe.note_allocation(node, minbound);
                if node.status.is_allocated() && node.claimed == 0 && at == minbound {
                    probe.hit = Some(LoadHit::Empty);
                    return Ok(());
                }
                let end = match node.fill {
                    FillState::Uninit => return signal(MemoryError::IllegalLoad { address: at }),
                    FillState::Memset(byte) => {
                        let end = probe.readable_end(at, maxbound)?;
                        probe.hit = Some(LoadHit::Fill {
                            byte,
                            len: end - at,
                        });
                        return Ok(());
                    }
                    FillState::Unknown => probe.readable_end(at, maxbound)?,
                };

                if node.buffer.is_none() {
                    // Allocated but never written: contents are undefined, not illegal
                    if probe.allocation_end.is_none() {
                        return signal(MemoryError::IllegalLoad { address: at });
                    }
                    node.buffer_mut(chunk_len);
                }
                probe.hit = Some(LoadHit::Bytes {
                    offset,
                    len: (end - at) as usize,
                });
                Ok(())
            }

            Visitor::Free { desired } => {
                let node = present(slot)?;
                if minbound == at && node.status.is_allocated() && node.status == *desired {
                    trace!(minbound, status = %node.status, "freed chunk segment");
                    *slot = None;
                    return Ok(());
                }
                signal(MemoryError::IllegalFree { address: at })
            }

            Visitor::Memset {
                fill,
                size,
                found_allocation,
            } => {
                let (fill, size) = (*fill, *size);
                let node = present(slot)?;
                check_allocation(node, minbound, at, size, found_allocation)?;
                if !*found_allocation {
                    return signal(MemoryError::IllegalStore { address: at });
                }

                if size == range.chunk_size {
                    node.fill = FillState::Memset(fill);
                    node.buffer = None;
                    return Ok(());
                }
                let len = size as usize;
                if offset + len > chunk_len {
                    return signal(MemoryError::inconsistency(format!(
                        "memset of {} bytes at 0x{:x} overruns its chunk",
                        size, at
                    )));
                }

                node.buffer_mut(chunk_len)[offset..offset + len].fill(fill);
                node.fill = FillState::Unknown;
                Ok(())
            }
        }
    }
}

/// Mark `node` as the root of a fresh allocation
fn claim(node: &mut Node, size: Size, fill: FillState, status: AllocStatus) {
    node.claimed = size;
    node.fill = fill;
    node.status = status;
    node.buffer = None;
    node.left = None;
    node.right = None;
}

/// Check a write against the allocation (if any) held by `node`
fn check_allocation(
    node: &Node,
    minbound: Address,
    at: Address,
    size: Size,
    found_allocation: &mut bool,
) -> Result<(), MemoryError> {
    if !node.status.is_allocated() {
        return Ok(());
    }
    if *found_allocation {
        return signal(MemoryError::inconsistency(
            "allocated segment inside other allocated segment detected",
        ));
    }
    *found_allocation = true;
    trace!(
        minbound,
        claimed = node.claimed,
        at,
        size,
        "found allocated segment"
    );

    if at + size > minbound + node.claimed {
        return signal(MemoryError::IllegalStore { address: at });
    }
    Ok(())
}
