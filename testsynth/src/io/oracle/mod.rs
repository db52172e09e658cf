//! Test synthesis oracle abstraction.
//!
//! The [`Oracle`] trait decouples the convergence loop from the text
//! generator behind it. Backends return raw response text; fence stripping
//! and test counting happen in [`crate::core::fences`]. Tests use scripted
//! oracles that return predetermined responses without spawning processes or
//! touching the network.

mod codex;
mod fixture;
mod http;

pub use codex::{CodexOracle, CodexOracleConfig};
pub use fixture::{FixtureOracle, FixtureScript, ScriptedResponse};
pub use http::{HttpOracle, HttpOracleConfig};

use serde::Serialize;
use thiserror::Error;

use crate::core::types::{BranchModel, CoverageReport};

/// Failure taxonomy for oracle calls.
///
/// Only [`OracleError::Transient`] is retried by [`crate::io::retry::RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// Rate limiting, timeouts, connection resets, server-side 5xx.
    #[error("transient oracle failure: {0}")]
    Transient(String),
    /// Malformed responses, authentication and configuration problems.
    #[error("oracle failure: {0}")]
    Fatal(String),
}

impl OracleError {
    pub fn is_transient(&self) -> bool {
        matches!(self, OracleError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            OracleError::Transient(msg) | OracleError::Fatal(msg) => msg,
        }
    }
}

/// Input for the first synthesis round.
#[derive(Debug, Clone, Serialize)]
pub struct InitialRequest<'a> {
    pub code: &'a str,
    pub branch_model: &'a BranchModel,
    pub module_name: &'a str,
}

/// Input for an OPTIMIZE round targeting the still-uncovered branches.
#[derive(Debug, Clone, Serialize)]
pub struct IncrementalRequest<'a> {
    pub code: &'a str,
    pub existing_tests: &'a str,
    pub coverage_report: &'a CoverageReport,
    pub branch_model: &'a BranchModel,
    pub module_name: &'a str,
}

/// A source of candidate pytest code.
pub trait Oracle {
    /// Produce an initial test suite for `request.code`.
    fn synthesize_initial(&self, request: &InitialRequest<'_>) -> Result<String, OracleError>;

    /// Produce additional tests for the branches the latest report left uncovered.
    fn synthesize_incremental(
        &self,
        request: &IncrementalRequest<'_>,
    ) -> Result<String, OracleError>;
}

impl<O: Oracle + ?Sized> Oracle for Box<O> {
    fn synthesize_initial(&self, request: &InitialRequest<'_>) -> Result<String, OracleError> {
        (**self).synthesize_initial(request)
    }

    fn synthesize_incremental(
        &self,
        request: &IncrementalRequest<'_>,
    ) -> Result<String, OracleError> {
        (**self).synthesize_incremental(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_transient() {
        assert!(OracleError::Transient("429".into()).is_transient());
        assert!(!OracleError::Fatal("bad".into()).is_transient());
        assert_eq!(OracleError::Fatal("bad".into()).message(), "bad");
    }
}
