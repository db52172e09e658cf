//! Shared deterministic types for the synthesis pipeline.
//!
//! Everything here is produced once and read thereafter. The only mutable
//! session object lives in [`crate::core::state`].

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Returns true when `name` is usable as a Python module name.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid module name {0:?}: must match [A-Za-z_][A-Za-z0-9_]*")]
pub struct ModuleNameError(pub String);

/// Caller input for one run: the code under test and the module it is imported as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceUnit {
    code: String,
    module_name: String,
}

impl SourceUnit {
    pub fn new(
        code: impl Into<String>,
        module_name: impl Into<String>,
    ) -> Result<Self, ModuleNameError> {
        let module_name = module_name.into();
        if !is_valid_identifier(&module_name) {
            return Err(ModuleNameError(module_name));
        }
        Ok(Self {
            code: code.into(),
            module_name,
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchKind {
    If,
    Else,
}

/// A single decision point found by the analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub line: u32,
    pub kind: BranchKind,
    /// Rendered condition for `if`; always `None` for `else`.
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    /// Declared annotation, or `"Any"` when the parameter is unannotated.
    pub annotation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: String,
    pub branches: Vec<BranchRecord>,
    pub cyclomatic_complexity: u32,
    pub total_branches: u32,
    pub start_line: u32,
}

/// Structural model of every function in a source unit.
///
/// `total_branches_in_unit` always equals the sum of each function's
/// `total_branches`; [`BranchModel::new`] is the only constructor that
/// computes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchModel {
    pub functions: Vec<FunctionRecord>,
    pub total_branches_in_unit: u32,
}

impl BranchModel {
    pub fn new(functions: Vec<FunctionRecord>) -> Self {
        let total_branches_in_unit = functions.iter().map(|f| f.total_branches).sum();
        Self {
            functions,
            total_branches_in_unit,
        }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionRecord> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// A branch arc that no test exercised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncoveredBranch {
    pub file: String,
    /// Line the arc starts from.
    pub line: i64,
    /// Destination line as reported by coverage.py; negative for function exits.
    pub target: Option<i64>,
}

/// Result of one sandbox measurement. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub execution_succeeded: bool,
    pub statement_coverage_pct: f64,
    pub branch_coverage_pct: f64,
    pub uncovered_branches: Vec<UncoveredBranch>,
    pub tests_run: u32,
    pub tests_passed: u32,
    pub transcript: String,
    pub error: Option<String>,
}

impl CoverageReport {
    /// Zero-coverage report for a measurement that could not run.
    pub fn failed(error: impl Into<String>, transcript: impl Into<String>) -> Self {
        Self {
            execution_succeeded: false,
            statement_coverage_pct: 0.0,
            branch_coverage_pct: 0.0,
            uncovered_branches: Vec::new(),
            tests_run: 0,
            tests_passed: 0,
            transcript: transcript.into(),
            error: Some(error.into()),
        }
    }

    /// Zero-coverage report for a test run that exceeded its wall-clock budget.
    pub fn timed_out(timeout_secs: u64, transcript: impl Into<String>) -> Self {
        Self::failed(
            format!("test execution timed out after {timeout_secs}s"),
            transcript,
        )
    }
}

/// Branch coverage as a percentage; defined as 0 when there is nothing to cover.
pub fn branch_percentage(covered: u64, possible: u64) -> f64 {
    if possible == 0 {
        return 0.0;
    }
    covered as f64 / possible as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_name_must_be_identifier() {
        assert!(SourceUnit::new("", "code_to_test").is_ok());
        assert!(SourceUnit::new("", "_private1").is_ok());
        for bad in ["../evil", "rm -rf", "1abc", "", "a.b", "mod;ls"] {
            let err = SourceUnit::new("", bad).unwrap_err();
            assert_eq!(err.0, bad);
        }
    }

    #[test]
    fn branch_model_total_is_sum_of_functions() {
        let f = |name: &str, total: u32| FunctionRecord {
            name: name.to_string(),
            params: Vec::new(),
            return_type: "Any".to_string(),
            branches: Vec::new(),
            cyclomatic_complexity: 1,
            total_branches: total,
            start_line: 1,
        };
        let model = BranchModel::new(vec![f("a", 2), f("b", 0), f("c", 3)]);
        assert_eq!(model.total_branches_in_unit, 5);
        assert_eq!(model.function("c").map(|f| f.total_branches), Some(3));
    }

    #[test]
    fn branch_percentage_is_zero_without_branches() {
        assert_eq!(branch_percentage(0, 0), 0.0);
        assert_eq!(branch_percentage(1, 2), 50.0);
        assert_eq!(branch_percentage(4, 4), 100.0);
    }

    #[test]
    fn timed_out_report_has_zero_coverage() {
        let report = CoverageReport::timed_out(60, "");
        assert!(!report.execution_succeeded);
        assert_eq!(report.branch_coverage_pct, 0.0);
        assert_eq!(
            report.error.as_deref(),
            Some("test execution timed out after 60s")
        );
    }
}
