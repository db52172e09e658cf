//! Deterministic, pure logic for test synthesis.
//!
//! Core modules are free of I/O side effects. They operate on in-memory
//! values (source text, coverage artifacts, session state) and return
//! deterministic results suitable for tests.

pub mod analyzer;
pub mod ast;
pub mod coverage;
pub mod fences;
pub mod grammar;
pub mod lexer;
pub mod state;
pub mod types;
