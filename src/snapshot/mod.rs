// Snapshot management for replay history

use crate::memory::{Address, MemorySimulator};
use crate::replay::{Diagnostic, DiagnosticSink};
use crate::trace::SourceLocation;
use rustc_hash::FxHashMap;

/// Replay output, one line per executed statement
#[derive(Debug, Clone, Default)]
pub struct OutputLog {
    pub lines: Vec<OutputLine>,
}

impl OutputLog {
    pub fn new() -> Self {
        OutputLog { lines: Vec::new() }
    }

    pub fn print(&mut self, text: String, location: SourceLocation) {
        self.lines.push(OutputLine {
            text,
            location,
            is_error: false,
        });
    }

    /// Get all lines as a vector of strings
    pub fn get_output(&self) -> Vec<String> {
        self.lines.iter().map(|line| line.text.clone()).collect()
    }
}

impl DiagnosticSink for OutputLog {
    fn signal(&mut self, diagnostic: &Diagnostic) {
        self.lines.push(OutputLine {
            text: format!("error: {}", diagnostic),
            location: diagnostic.location,
            is_error: true,
        });
    }
}

/// A line of replay output with source location tracking
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub text: String,
    pub location: SourceLocation,
    pub is_error: bool,
}

/// Replay state after one statement
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub memory: MemorySimulator,
    pub output: OutputLog,
    pub bindings: FxHashMap<String, Address>,
    /// Statements executed so far
    pub executed: usize,
    pub source_location: SourceLocation,
}

impl Snapshot {
    /// Estimate the memory usage of this snapshot in bytes
    pub fn estimated_size(&self) -> usize {
        // Tree nodes and buffers dominate; the rest is rough
        let tree_size = self.memory.tree().stats().heap_bytes;

        // Output: assume 50 bytes per line on average
        let output_size = self.output.lines.len() * 50;

        let binding_size = self.bindings.len() * 32;

        tree_size + output_size + binding_size
    }
}

/// Pushing a snapshot would exceed the history budget
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Snapshot memory limit exceeded: {current} + {requested} > {limit}")]
pub struct SnapshotLimitExceeded {
    pub current: usize,
    pub requested: usize,
    pub limit: usize,
}

/// Manages replay history for stepping backward and forward
#[derive(Debug)]
pub struct SnapshotManager {
    snapshots: Vec<Snapshot>,
    max_memory: usize,
    current_memory: usize,
}

impl SnapshotManager {
    pub fn new(max_memory: usize) -> Self {
        SnapshotManager {
            snapshots: Vec::new(),
            max_memory,
            current_memory: 0,
        }
    }

    /// Add a snapshot to history
    pub fn push(&mut self, snapshot: Snapshot) -> Result<(), SnapshotLimitExceeded> {
        let snapshot_size = snapshot.estimated_size();

        if self.current_memory + snapshot_size > self.max_memory {
            return Err(SnapshotLimitExceeded {
                current: self.current_memory,
                requested: snapshot_size,
                limit: self.max_memory,
            });
        }

        self.current_memory += snapshot_size;
        self.snapshots.push(snapshot);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        self.current_memory
    }

    pub fn memory_limit(&self) -> usize {
        self.max_memory
    }
}
