//! Memory trace language
//!
//! A trace is a line-oriented script of memory operations that can be replayed
//! against a [`MemorySimulator`](crate::memory::MemorySimulator):
//! - [`lexer`]: Tokenization (trace text → tokens)
//! - [`parse`]: Parsing (tokens → [`Program`])
//! - [`ast`]: Statement definitions
//!
//! Hand-written recursive descent, one statement per line.

pub mod ast;
pub mod lexer;
pub mod parse;

pub use ast::{Program, SourceLocation, Statement, StatementKind};
pub use lexer::LexError;
pub use parse::{parse_trace, ParseError, Parser};
