//! Test-only sources, reports and scripted doubles for the oracle and sandbox.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::core::types::CoverageReport;
use crate::io::oracle::{IncrementalRequest, InitialRequest, Oracle, OracleError};
use crate::io::sandbox::{MeasureRequest, Sandbox};

/// One function, one `if`, a whitespace-only line inside the body.
pub const SIMPLE_ADD_SOURCE: &str = "def add(x, y):
    # Add a check to demonstrate Branch Coverage
    if x < 0:
        return 0

    result = x + y
    return result
";

/// Five functions with nested `else: if` chains.
pub const CALCULATOR_SOURCE: &str = include_str!("../demos/calculator.py");

/// A successful report where statement and branch coverage both equal `pct`.
pub fn report_with(pct: f64) -> CoverageReport {
    CoverageReport {
        execution_succeeded: true,
        statement_coverage_pct: pct,
        branch_coverage_pct: pct,
        uncovered_branches: Vec::new(),
        tests_run: 2,
        tests_passed: 2,
        transcript: String::new(),
        error: None,
    }
}

/// Wrap raw test code in a python fence, the way oracles usually answer.
pub fn fenced(code: &str) -> String {
    format!("```python\n{code}\n```")
}

/// What a [`ScriptedOracle`] was asked.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleCall {
    Initial,
    Incremental {
        existing_tests: String,
        branch_coverage_pct: f64,
    },
}

/// Oracle double replaying queued results. An empty queue yields a fatal error.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    initial: RefCell<VecDeque<Result<String, OracleError>>>,
    incremental: RefCell<VecDeque<Result<String, OracleError>>>,
    calls: RefCell<Vec<OracleCall>>,
}

impl ScriptedOracle {
    pub fn new(
        initial: Vec<Result<String, OracleError>>,
        incremental: Vec<Result<String, OracleError>>,
    ) -> Self {
        Self {
            initial: RefCell::new(initial.into()),
            incremental: RefCell::new(incremental.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Always answers `initial`, then each of `incremental` in order.
    pub fn with_responses(initial: &str, incremental: &[&str]) -> Self {
        Self::new(
            vec![Ok(initial.to_string())],
            incremental.iter().map(|r| Ok(r.to_string())).collect(),
        )
    }

    pub fn calls(&self) -> Vec<OracleCall> {
        self.calls.borrow().clone()
    }

    pub fn incremental_calls(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, OracleCall::Incremental { .. }))
            .count()
    }
}

fn next_result(queue: &RefCell<VecDeque<Result<String, OracleError>>>) -> Result<String, OracleError> {
    queue
        .borrow_mut()
        .pop_front()
        .unwrap_or_else(|| Err(OracleError::Fatal("script exhausted".to_string())))
}

impl Oracle for ScriptedOracle {
    fn synthesize_initial(&self, _request: &InitialRequest<'_>) -> Result<String, OracleError> {
        self.calls.borrow_mut().push(OracleCall::Initial);
        next_result(&self.initial)
    }

    fn synthesize_incremental(
        &self,
        request: &IncrementalRequest<'_>,
    ) -> Result<String, OracleError> {
        self.calls.borrow_mut().push(OracleCall::Incremental {
            existing_tests: request.existing_tests.to_string(),
            branch_coverage_pct: request.coverage_report.branch_coverage_pct,
        });
        next_result(&self.incremental)
    }
}

/// Sandbox double replaying queued reports. Once the queue is drained the
/// last report repeats.
#[derive(Debug, Default)]
pub struct ScriptedSandbox {
    reports: RefCell<VecDeque<CoverageReport>>,
    last: RefCell<Option<CoverageReport>>,
    measured: RefCell<Vec<String>>,
}

impl ScriptedSandbox {
    pub fn new(reports: Vec<CoverageReport>) -> Self {
        Self {
            reports: RefCell::new(reports.into()),
            last: RefCell::new(None),
            measured: RefCell::new(Vec::new()),
        }
    }

    /// Reports with the given branch coverage percentages, in order.
    pub fn with_coverage(percentages: &[f64]) -> Self {
        Self::new(percentages.iter().copied().map(report_with).collect())
    }

    /// Test sources passed to `measure`, in call order.
    pub fn measured(&self) -> Vec<String> {
        self.measured.borrow().clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn measure(&self, request: &MeasureRequest<'_>) -> CoverageReport {
        self.measured
            .borrow_mut()
            .push(request.test_source.to_string());
        let next = self.reports.borrow_mut().pop_front();
        let report = match next {
            Some(report) => report,
            None => self
                .last
                .borrow()
                .clone()
                .unwrap_or_else(|| CoverageReport::failed("no scripted report", String::new())),
        };
        *self.last.borrow_mut() = Some(report.clone());
        report
    }
}
