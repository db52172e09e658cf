//! Coverage-driven unit test synthesis for a restricted Python subset.
//!
//! A pluggable oracle proposes pytest code; a sandboxed pytest run measures
//! the branch coverage it actually achieves; a small state machine decides
//! whether to accept, ask for more tests, or give up.
//!
//! - **[`core`]**: Pure, deterministic logic (grammar, branch model, coverage
//!   parsing, convergence decisions). No I/O.
//! - **[`io`]**: Side effects (oracle backends, subprocesses, sandbox,
//!   configuration files).
//!
//! [`converge`] wires the two together for `testsynth generate`.

pub mod converge;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
