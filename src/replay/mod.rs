//! Trace replay with time-travel history
//!
//! - [`engine`]: [`ReplayEngine`], which executes a parsed trace against a
//!   [`MemorySimulator`](crate::memory::MemorySimulator) and records a
//!   [`Snapshot`](crate::snapshot::Snapshot) after every statement
//! - [`diagnostics`]: [`Diagnostic`] and the [`DiagnosticSink`] that fatal
//!   signals are reported to
//!
//! Replay stops at the first fatal signal. The history recorded up to and
//! including the failing statement stays navigable.

pub mod diagnostics;
pub mod engine;

pub use diagnostics::{Diagnostic, DiagnosticSink, IgnoreDiagnostics};
pub use engine::{ReplayEngine, ReplayError};
