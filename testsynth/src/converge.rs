//! Coverage convergence loop for `testsynth generate`.
//!
//! ANALYZE → GENERATE → MEASURE → (decide) → OPTIMIZE → MEASURE … → DONE.
//! The loop is sequential; only the oracle call and the sandbox run block.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::analyzer::{AnalysisError, analyze};
use crate::core::fences::{count_tests, extract_code};
use crate::core::grammar::GrammarViolation;
use crate::core::state::{
    ConvergenceState, DEFAULT_MAX_ITERATIONS, DEFAULT_TARGET_COVERAGE, Decision, StopReason,
    SynthesisOutcome,
};
use crate::core::types::{CoverageReport, SourceUnit};
use crate::io::oracle::{IncrementalRequest, InitialRequest, Oracle, OracleError};
use crate::io::retry::RetryPolicy;
use crate::io::sandbox::{MeasureRequest, Sandbox, SourceInput};

/// Errors that abort a run before any test is generated.
#[derive(Debug, Error)]
pub enum ConvergeError {
    #[error("grammar violation: {0}")]
    Grammar(GrammarViolation),
    /// The analyzer rejected a tree the parser accepted.
    #[error("analysis defect: {0}")]
    AnalysisDefect(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ConvergeConfig<'a> {
    pub target_coverage_pct: f64,
    pub max_iterations: u32,
    /// Measure against this file in place instead of writing the source inline.
    pub existing_file: Option<&'a Path>,
}

impl Default for ConvergeConfig<'_> {
    fn default() -> Self {
        Self {
            target_coverage_pct: DEFAULT_TARGET_COVERAGE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            existing_file: None,
        }
    }
}

/// Progress notifications emitted while the loop runs.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    Measured {
        iteration: u32,
        branch_coverage_pct: f64,
        statement_coverage_pct: f64,
        tests_passed: u32,
        tests_run: u32,
        error: Option<String>,
    },
    Optimized {
        iteration: u32,
        added_tests: usize,
        error: Option<String>,
    },
}

/// Drive one source unit to DONE.
///
/// Grammar violations and analyzer defects are errors. Everything after
/// ANALYZE degrades into the returned [`SynthesisOutcome`]: a failed initial
/// generation ends the run with [`StopReason::GenerationFailed`], failed
/// optimization rounds keep the existing tests, and failed measurements count
/// as zero coverage.
#[instrument(skip_all, fields(module = unit.module_name(), target = config.target_coverage_pct))]
pub fn run_convergence<O, S, F>(
    unit: &SourceUnit,
    oracle: &O,
    sandbox: &S,
    retry: &RetryPolicy,
    config: &ConvergeConfig<'_>,
    mut on_event: F,
) -> Result<SynthesisOutcome, ConvergeError>
where
    O: Oracle + ?Sized,
    S: Sandbox + ?Sized,
    F: FnMut(&StageEvent),
{
    let model = match analyze(unit.code()) {
        Ok(model) => model,
        Err(AnalysisError::GrammarViolation(violation)) => {
            warn!(%violation, "source rejected by grammar");
            return Err(ConvergeError::Grammar(violation));
        }
        Err(AnalysisError::Internal(msg)) => return Err(ConvergeError::AnalysisDefect(msg)),
    };
    info!(
        functions = model.functions.len(),
        branches = model.total_branches_in_unit,
        "analyzed source unit"
    );

    let mut state = ConvergenceState::new(
        unit.clone(),
        model,
        config.target_coverage_pct,
        config.max_iterations,
    );

    let initial = retry.run("initial", || {
        oracle
            .synthesize_initial(&InitialRequest {
                code: unit.code(),
                branch_model: &state.branch_model,
                module_name: unit.module_name(),
            })
            .and_then(required_code)
    });
    match initial {
        Ok(tests) => {
            info!(tests = count_tests(&tests), "generated initial tests");
            state.set_initial_tests(tests);
        }
        Err(err) => {
            warn!(err = %err, "initial generation failed");
            state.last_error = Some(err.message().to_string());
            return Ok(state.into_outcome(StopReason::GenerationFailed));
        }
    }

    let source = match config.existing_file {
        Some(path) => SourceInput::ExistingFile(path),
        None => SourceInput::Inline(unit.code()),
    };

    loop {
        let report = sandbox.measure(&MeasureRequest {
            source,
            test_source: &state.test_source,
            module_name: unit.module_name(),
        });
        log_measurement(state.iteration, &report);
        on_event(&StageEvent::Measured {
            iteration: state.iteration,
            branch_coverage_pct: report.branch_coverage_pct,
            statement_coverage_pct: report.statement_coverage_pct,
            tests_passed: report.tests_passed,
            tests_run: report.tests_run,
            error: report.error.clone(),
        });
        if let Some(err) = &report.error {
            state.last_error = Some(err.clone());
        }
        state.record_measurement(report.clone());

        if let Decision::Stop(reason) = state.decide() {
            info!(
                ?reason,
                iterations = state.iteration,
                branch_coverage = state.branch_coverage_pct(),
                "convergence finished"
            );
            return Ok(state.into_outcome(reason));
        }

        let iteration = state.begin_optimization();
        let additional = retry.run("incremental", || {
            oracle
                .synthesize_incremental(&IncrementalRequest {
                    code: unit.code(),
                    existing_tests: &state.test_source,
                    coverage_report: &report,
                    branch_model: &state.branch_model,
                    module_name: unit.module_name(),
                })
                .and_then(required_code)
        });
        match additional {
            Ok(tests) => {
                let added_tests = count_tests(&tests);
                info!(iteration, added_tests, "optimization round added tests");
                state.append_tests(&tests);
                on_event(&StageEvent::Optimized {
                    iteration,
                    added_tests,
                    error: None,
                });
            }
            Err(err) => {
                warn!(iteration, err = %err, "optimization round failed, keeping existing tests");
                state.last_error = Some(err.message().to_string());
                on_event(&StageEvent::Optimized {
                    iteration,
                    added_tests: 0,
                    error: Some(err.message().to_string()),
                });
            }
        }
    }
}

fn required_code(response: String) -> Result<String, OracleError> {
    let code = extract_code(&response);
    if code.trim().is_empty() {
        return Err(OracleError::Fatal(
            "oracle response contains no test code".to_string(),
        ));
    }
    Ok(code)
}

fn log_measurement(iteration: u32, report: &CoverageReport) {
    match &report.error {
        Some(err) => warn!(iteration, err = %err, "measurement failed"),
        None => debug!(
            iteration,
            branch_coverage = report.branch_coverage_pct,
            statement_coverage = report.statement_coverage_pct,
            passed = report.tests_passed,
            run = report.tests_run,
            "measured coverage"
        ),
    }
}
