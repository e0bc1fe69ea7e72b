//! Fatal signals raised while replaying a trace
//!
//! The memory model only decides *when* something is fatal. How it is
//! surfaced is up to a [`DiagnosticSink`]: the replay output log, a test
//! collecting into a `Vec`, or anything else that wants to know.

use crate::memory::MemoryError;
use crate::trace::SourceLocation;
use std::fmt;

/// One fatal signal: what happened, where in the trace, and a readable message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub name: String,
    pub location: SourceLocation,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        name: impl Into<String>,
        location: SourceLocation,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            name: name.into(),
            location,
            message: message.into(),
        }
    }

    pub fn from_memory(err: &MemoryError, location: SourceLocation) -> Self {
        Diagnostic::new(err.name(), location, err.to_string())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at line {}, column {}: {}",
            self.name, self.location.line, self.location.column, self.message
        )
    }
}

/// Receiver of fatal signals
pub trait DiagnosticSink {
    fn signal(&mut self, diagnostic: &Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn signal(&mut self, diagnostic: &Diagnostic) {
        self.push(diagnostic.clone());
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreDiagnostics;

impl DiagnosticSink for IgnoreDiagnostics {
    fn signal(&mut self, _diagnostic: &Diagnostic) {}
}
