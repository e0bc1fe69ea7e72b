//! # Introduction
//!
//! memsim simulates a large, sparse, byte-addressable memory with a lazily
//! materialized segment tree. Only the parts of the address space that are
//! actually touched cost anything: a 4 GiB range with one allocation is a
//! handful of tree nodes.
//!
//! ## Pipeline
//!
//! ```text
//! Trace → Lexer → Parser → Program → ReplayEngine → Snapshots → TUI
//! ```
//!
//! 1. [`memory`]: the segment tree ([`memory::SegmentTree`]) and the
//!    program-level facade on top of it ([`memory::MemorySimulator`]), which
//!    places globals, stack frames and heap blocks.
//! 2. [`trace`]: a small line-oriented language of memory operations.
//! 3. [`replay`]: executes a trace, stops at the first fatal signal and reports
//!    it to a [`replay::DiagnosticSink`].
//! 4. [`snapshot`]: replay history under a memory budget, plus the output log.
//! 5. [`config`]: address-space defaults and limits.
//! 6. [`ui`]: ratatui-based inspector; not part of the stable library API.
//!
//! ## Fatal signals
//!
//! Every memory operation returns `Result<_, `[`memory::MemoryError`]`>`:
//! `IllegalLoad`, `IllegalStore`, `IllegalFree`, `OutOfMemory`,
//! `Inconsistency` and `Unsupported`. None of them is recoverable by the
//! simulated program.

pub mod config;
pub mod memory;
pub mod replay;
pub mod snapshot;
pub mod trace;
pub mod ui;
