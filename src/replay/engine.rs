// Replay engine for memory traces

use super::diagnostics::{Diagnostic, DiagnosticSink, IgnoreDiagnostics};
use crate::config::SimulatorConfig;
use crate::memory::{Address, AddressRange, MemoryError, MemorySimulator};
use crate::snapshot::{OutputLog, Snapshot, SnapshotLimitExceeded, SnapshotManager};
use crate::trace::ast::{Binding, Operand, Program, SourceLocation, Statement, StatementKind};
use rustc_hash::FxHashMap;
use std::fmt::Write as _;
use tracing::{debug, info};

/// Errors that end or refuse a replay
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    /// A statement raised a fatal signal; history up to it is kept
    #[error("{0}")]
    Signal(Diagnostic),

    #[error(transparent)]
    SnapshotLimit(#[from] SnapshotLimitExceeded),

    /// The configured or declared address range is unusable
    #[error(transparent)]
    Geometry(#[from] MemoryError),

    /// History navigation past either end
    #[error("{message}")]
    History { message: String },
}

/// Why a single statement failed
enum Fault {
    Memory(MemoryError),
    Unbound(String),
}

impl From<MemoryError> for Fault {
    fn from(err: MemoryError) -> Self {
        Fault::Memory(err)
    }
}

impl Fault {
    fn into_diagnostic(self, location: SourceLocation) -> Diagnostic {
        match self {
            Fault::Memory(err) => Diagnostic::from_memory(&err, location),
            Fault::Unbound(name) => {
                Diagnostic::new("UnboundName", location, format!("'%{}' is not bound", name))
            }
        }
    }
}

/// Executes a trace and keeps a navigable history of memory states
pub struct ReplayEngine {
    program: Program,

    memory: MemorySimulator,

    /// Names bound by `%name = ...` statements
    bindings: FxHashMap<String, Address>,

    output: OutputLog,

    /// Location of the statement that produced the current state
    current_location: SourceLocation,

    /// Statements executed in the current state
    executed: usize,

    snapshot_manager: SnapshotManager,

    /// Index of the snapshot currently shown
    history_position: usize,

    /// First fatal signal, if the replay hit one
    diagnostic: Option<Diagnostic>,

    finished: bool,
}

impl ReplayEngine {
    /// Set up a replay; a `range` directive in the trace overrides `config`
    pub fn new(program: Program, config: &SimulatorConfig) -> Result<Self, ReplayError> {
        let range = match &program.range {
            Some(directive) => {
                AddressRange::new(directive.start, directive.end, directive.chunk_size)?
            }
            None => config.address_range()?,
        };
        let memory = MemorySimulator::new(range)?;
        info!(
            start = range.start,
            end = range.end,
            chunk_size = range.chunk_size,
            statements = program.statements.len(),
            "replay prepared"
        );

        Ok(ReplayEngine {
            program,
            memory,
            bindings: FxHashMap::default(),
            output: OutputLog::new(),
            current_location: SourceLocation::new(1, 1),
            executed: 0,
            snapshot_manager: SnapshotManager::new(config.snapshot_limit),
            history_position: 0,
            diagnostic: None,
            finished: false,
        })
    }

    /// Run the whole trace, building the history
    pub fn run(&mut self) -> Result<(), ReplayError> {
        self.run_with_sink(&mut IgnoreDiagnostics)
    }

    /// Run the whole trace, also reporting the fatal signal (if any) to `sink`
    pub fn run_with_sink(&mut self, sink: &mut dyn DiagnosticSink) -> Result<(), ReplayError> {
        // Initial state, before any statement
        self.take_snapshot()?;

        let statements = self.program.statements.clone();
        for stmt in &statements {
            self.current_location = stmt.location;
            self.executed += 1;

            match self.execute_statement(stmt) {
                Ok(line) => {
                    self.output.print(line, stmt.location);
                    self.take_snapshot()?;
                }
                Err(fault) => {
                    let diagnostic = fault.into_diagnostic(stmt.location);
                    info!(%diagnostic, "replay stopped");
                    self.output.signal(&diagnostic);
                    sink.signal(&diagnostic);
                    self.diagnostic = Some(diagnostic.clone());
                    self.take_snapshot()?;
                    self.finished = true;
                    return Err(ReplayError::Signal(diagnostic));
                }
            }
        }

        self.finished = true;
        info!(snapshots = self.snapshot_manager.len(), "replay finished");
        Ok(())
    }

    fn resolve(&self, operand: &Operand) -> Result<Address, Fault> {
        match operand {
            Operand::Literal(addr) => Ok(*addr),
            Operand::Named { name, offset } => self
                .bindings
                .get(name)
                .map(|base| base.wrapping_add(*offset))
                .ok_or_else(|| Fault::Unbound(name.clone())),
        }
    }

    /// Execute one statement, returning its output line
    fn execute_statement(&mut self, stmt: &Statement) -> Result<String, Fault> {
        debug!(line = stmt.location.line, kind = ?stmt.kind, "execute");

        let line = match &stmt.kind {
            StatementKind::Alloc {
                at,
                size,
                fill,
                provenance,
            } => {
                let at = self.resolve(at)?;
                let status = provenance.status();
                let fill = fill.fill_state();
                self.memory.tree_mut().allocate(at, *size, fill, status)?;
                format!("alloc 0x{:x}: {} bytes, {}, {}", at, size, status, fill)
            }
            StatementKind::Store { at, data } => {
                let at = self.resolve(at)?;
                self.memory.store_bytes(at, data)?;
                format!("store 0x{:x}: {} bytes", at, data.len())
            }
            StatementKind::Load { at, len } => {
                let at = self.resolve(at)?;
                let bytes = self.memory.load_bytes(at, *len)?;
                format!("load 0x{:x}: {}", at, hex_bytes(&bytes))
            }
            StatementKind::Memset { at, fill, size } => {
                let at = self.resolve(at)?;
                self.memory.memset(at, *fill, *size)?;
                format!("memset 0x{:x}: {} x 0x{:02x}", at, size, fill)
            }
            StatementKind::Memchr { at, ch, limit } => {
                let at = self.resolve(at)?;
                match self.memory.memchr(at, *ch, *limit)? {
                    Some(found) => {
                        format!("memchr 0x{:x} 0x{:02x}: found at 0x{:x}", at, ch, found)
                    }
                    None => format!("memchr 0x{:x} 0x{:02x}: not found", at, ch),
                }
            }
            StatementKind::Memmove { src, dst, size } => {
                let src = self.resolve(src)?;
                let dst = self.resolve(dst)?;
                self.memory.memmove(dst, src, *size)?;
                format!("memmove 0x{:x} -> 0x{:x}: {} bytes", src, dst, size)
            }
            StatementKind::Free { at, provenance } => {
                let at = self.resolve(at)?;
                let status = provenance.status();
                self.memory.tree_mut().free(at, status)?;
                format!("free 0x{:x} ({})", at, status)
            }
            StatementKind::Bind { name, binding } => {
                let addr = match binding {
                    Binding::Malloc { size, fill } => self.memory.malloc(*size, *fill)?,
                    Binding::Calloc { count, elem_size } => self.memory.calloc(*count, *elem_size)?,
                    Binding::Alloca { count, elem_size } => self.memory.alloca(*count, *elem_size)?,
                    Binding::Global { size } => self.memory.global(*size)?,
                };
                self.bindings.insert(name.clone(), addr);
                format!("%{} = 0x{:x}", name, addr)
            }
            StatementKind::StoreInt { at, value, width } => {
                let at = self.resolve(at)?;
                self.memory.store_int(at, *value, *width)?;
                format!("storeint 0x{:x}: 0x{:x} ({} bytes)", at, value, width)
            }
            StatementKind::LoadInt { at, width } => {
                let at = self.resolve(at)?;
                let value = self.memory.load_int(at, *width)?;
                format!("loadint 0x{:x}: 0x{:x} ({})", at, value, value)
            }
            StatementKind::Strlen { at } => {
                let at = self.resolve(at)?;
                let len = self.memory.strlen(at)?;
                format!("strlen 0x{:x}: {}", at, len)
            }
            StatementKind::FramePush => {
                self.memory.push_frame();
                format!("frame push: depth {}", self.memory.frame_depth())
            }
            StatementKind::FramePop => {
                self.memory.pop_frame()?;
                format!("frame pop: depth {}", self.memory.frame_depth())
            }
            StatementKind::Release { at } => {
                let at = self.resolve(at)?;
                self.memory.free(at)?;
                format!("release 0x{:x}", at)
            }
        };

        Ok(line)
    }

    /// Take a snapshot of the current replay state
    fn take_snapshot(&mut self) -> Result<(), ReplayError> {
        let snapshot = Snapshot {
            memory: self.memory.clone(),
            output: self.output.clone(),
            bindings: self.bindings.clone(),
            executed: self.executed,
            source_location: self.current_location,
        };

        self.snapshot_manager.push(snapshot)?;
        self.history_position = self.snapshot_manager.len() - 1;
        Ok(())
    }

    /// Restore replay state from a snapshot
    fn restore_snapshot(&mut self, index: usize) -> Result<(), ReplayError> {
        let Some(snapshot) = self.snapshot_manager.get(index) else {
            return Err(ReplayError::History {
                message: format!("Snapshot {} not found in history", index),
            });
        };

        self.memory = snapshot.memory.clone();
        self.output = snapshot.output.clone();
        self.bindings = snapshot.bindings.clone();
        self.executed = snapshot.executed;
        self.current_location = snapshot.source_location;
        self.history_position = index;
        Ok(())
    }

    /// Step backward in history
    pub fn step_backward(&mut self) -> Result<(), ReplayError> {
        if self.history_position == 0 {
            return Err(ReplayError::History {
                message: "Already at the beginning of the trace".to_string(),
            });
        }
        self.restore_snapshot(self.history_position - 1)
    }

    /// Step forward in history
    pub fn step_forward(&mut self) -> Result<(), ReplayError> {
        if self.history_position + 1 >= self.snapshot_manager.len() {
            return Err(ReplayError::History {
                message: "No more snapshots available (replay finished)".to_string(),
            });
        }
        self.restore_snapshot(self.history_position + 1)
    }

    /// Rewind to the state before the first statement
    pub fn rewind_to_start(&mut self) -> Result<(), ReplayError> {
        if self.snapshot_manager.is_empty() {
            return Err(ReplayError::History {
                message: "No snapshots available".to_string(),
            });
        }
        self.restore_snapshot(0)
    }

    /// Jump to the last recorded state
    pub fn jump_to_end(&mut self) -> Result<(), ReplayError> {
        match self.snapshot_manager.len() {
            0 => Err(ReplayError::History {
                message: "No snapshots available".to_string(),
            }),
            len => self.restore_snapshot(len - 1),
        }
    }

    // ========== Getter methods for UI ==========

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn memory(&self) -> &MemorySimulator {
        &self.memory
    }

    pub fn bindings(&self) -> &FxHashMap<String, Address> {
        &self.bindings
    }

    pub fn output(&self) -> &OutputLog {
        &self.output
    }

    pub fn current_location(&self) -> SourceLocation {
        self.current_location
    }

    /// Statements executed in the state currently shown
    pub fn executed(&self) -> usize {
        self.executed
    }

    pub fn history_position(&self) -> usize {
        self.history_position
    }

    pub fn total_snapshots(&self) -> usize {
        self.snapshot_manager.len()
    }

    pub fn snapshot_memory(&self) -> (usize, usize) {
        (
            self.snapshot_manager.memory_usage(),
            self.snapshot_manager.memory_limit(),
        )
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        self.diagnostic.as_ref()
    }

    /// Whether the state shown is the one where the fatal signal was raised
    pub fn at_diagnostic(&self) -> bool {
        self.diagnostic.is_some() && self.history_position + 1 == self.snapshot_manager.len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Space-separated hex bytes
pub fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
