//! Fatal conditions raised by the memory model
//!
//! This module defines [`MemoryError`], the set of signals the segment tree
//! raises when an operation is illegal or the tree is driven into a state it
//! cannot describe.
//!
//! All of these are fatal to the reconstruction that raised them: a malformed
//! concrete snapshot is discarded, not repaired. The replay engine turns the
//! first one it sees into a [`Diagnostic`](crate::replay::Diagnostic) and stops.

use super::{Address, Size};

/// Errors raised by [`SegmentTree`](super::SegmentTree) and
/// [`MemorySimulator`](super::MemorySimulator) operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// Read of never-allocated or still-uninitialised memory
    #[error("Memory read violation at 0x{address:x}")]
    IllegalLoad { address: Address },

    /// Write outside of any allocation, or past the end of one
    #[error("Memory write violation at 0x{address:x}")]
    IllegalStore { address: Address },

    /// Free of something that is not the start of a matching allocation
    #[error("Illegal free() call at 0x{address:x}")]
    IllegalFree { address: Address },

    /// Allocation larger than the space left for it
    #[error("Out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: Size, available: Size },

    /// The tree reached a state the caller's model should never produce
    #[error("Inconsistent memory model: {message}")]
    Inconsistency { message: String },

    /// Operation the tree cannot express (e.g. an allocation straddling chunks)
    #[error("Unsupported operation on 0x{address:x}: {message}")]
    Unsupported { address: Address, message: String },

    /// Address range or chunk size that cannot be subdivided
    #[error("Invalid memory geometry: {message}")]
    InvalidGeometry { message: String },
}

impl MemoryError {
    /// Stable signal name, as reported to diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            MemoryError::IllegalLoad { .. } => "IllegalLoad",
            MemoryError::IllegalStore { .. } => "IllegalStore",
            MemoryError::IllegalFree { .. } => "IllegalFree",
            MemoryError::OutOfMemory { .. } => "OutOfMemory",
            MemoryError::Inconsistency { .. } => "Inconsistency",
            MemoryError::Unsupported { .. } => "Unsupported",
            MemoryError::InvalidGeometry { .. } => "InvalidGeometry",
        }
    }

    /// Faulting address, when the signal is tied to one
    pub fn address(&self) -> Option<Address> {
        match self {
            MemoryError::IllegalLoad { address }
            | MemoryError::IllegalStore { address }
            | MemoryError::IllegalFree { address }
            | MemoryError::Unsupported { address, .. } => Some(*address),
            MemoryError::OutOfMemory { .. }
            | MemoryError::Inconsistency { .. }
            | MemoryError::InvalidGeometry { .. } => None,
        }
    }

    pub(crate) fn inconsistency(message: impl Into<String>) -> Self {
        MemoryError::Inconsistency {
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(address: Address, message: impl Into<String>) -> Self {
        MemoryError::Unsupported {
            address,
            message: message.into(),
        }
    }
}

/// Raise a memory signal
///
/// Every fatal condition goes through here so it is logged once, at the point
/// of detection, before it propagates to the caller.
pub(crate) fn signal<T>(err: MemoryError) -> Result<T, MemoryError> {
    tracing::debug!(signal = err.name(), %err, "memory signal");
    Err(err)
}
