// Statement tree for memory traces

use crate::memory::{AllocStatus, FillState, MallocFill, Size};
use std::fmt;

/// Source location for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// An address as written in a trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Absolute address
    Literal(u64),
    /// `%name` or `%name+offset`, resolved against earlier bindings
    Named { name: String, offset: u64 },
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(addr) => write!(f, "0x{:x}", addr),
            Operand::Named { name, offset: 0 } => write!(f, "%{}", name),
            Operand::Named { name, offset } => write!(f, "%{}+{}", name, offset),
        }
    }
}

/// Initial contents named in an `alloc` statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillSpec {
    Uninit,
    Unknown,
    Zero,
    Byte(u8),
}

impl FillSpec {
    pub fn fill_state(self) -> FillState {
        match self {
            FillSpec::Uninit => FillState::Uninit,
            FillSpec::Unknown => FillState::Unknown,
            FillSpec::Zero => FillState::Memset(0),
            FillSpec::Byte(byte) => FillState::Memset(byte),
        }
    }
}

/// Allocation provenance named in `alloc` and `free`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Malloc,
    Alloca,
    Global,
}

impl Provenance {
    pub fn status(self) -> AllocStatus {
        match self {
            Provenance::Malloc => AllocStatus::Malloc,
            Provenance::Alloca => AllocStatus::Alloca,
            Provenance::Global => AllocStatus::Global,
        }
    }
}

/// Right-hand side of a `%name = ...` binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Malloc { size: Size, fill: MallocFill },
    Calloc { count: Size, elem_size: Size },
    Alloca { count: Size, elem_size: Size },
    Global { size: Size },
}

/// One trace statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Alloc {
        at: Operand,
        size: Size,
        fill: FillSpec,
        provenance: Provenance,
    },
    Store {
        at: Operand,
        data: Vec<u8>,
    },
    Load {
        at: Operand,
        len: Size,
    },
    Memset {
        at: Operand,
        fill: u8,
        size: Size,
    },
    Memchr {
        at: Operand,
        ch: u8,
        limit: Option<Size>,
    },
    Memmove {
        src: Operand,
        dst: Operand,
        size: Size,
    },
    Free {
        at: Operand,
        provenance: Provenance,
    },
    Bind {
        name: String,
        binding: Binding,
    },
    StoreInt {
        at: Operand,
        value: u64,
        width: usize,
    },
    LoadInt {
        at: Operand,
        width: usize,
    },
    Strlen {
        at: Operand,
    },
    FramePush,
    FramePop,
    Release {
        at: Operand,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    pub location: SourceLocation,
}

/// Leading `range <start> <end> <chunk>` directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeDirective {
    pub start: u64,
    pub end: u64,
    pub chunk_size: u64,
    pub location: SourceLocation,
}

/// A parsed trace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub range: Option<RangeDirective>,
    pub statements: Vec<Statement>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }
}
