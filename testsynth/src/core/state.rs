//! Convergence session state and the pure stop/continue decision.
//!
//! The orchestrator owns the only [`ConvergenceState`] of a run. All
//! transitions go through the methods here so the decision rules can be tested
//! without an oracle or a sandbox.

use serde::Serialize;

use crate::core::fences::count_tests;
use crate::core::types::{BranchModel, CoverageReport, SourceUnit};

pub const DEFAULT_TARGET_COVERAGE: f64 = 80.0;
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;
pub const MAX_ITERATIONS_LIMIT: u32 = 20;

/// Number of trailing samples inspected for stagnation.
pub const STAGNATION_WINDOW: usize = 3;
/// Spread (percentage points) below which the window counts as flat.
pub const STAGNATION_THRESHOLD: f64 = 1.0;

/// Why a run reached DONE.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    IterationLimit,
    Stagnated { spread: f64 },
    GenerationFailed,
}

/// Outcome of the decision step after a measurement.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Stop(StopReason),
    Optimize,
}

#[derive(Debug, Clone)]
pub struct ConvergenceState {
    pub unit: SourceUnit,
    pub target_coverage_pct: f64,
    pub branch_model: BranchModel,
    /// Accumulated tests. Only ever appended to.
    pub test_source: String,
    pub latest_report: Option<CoverageReport>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub coverage_history: Vec<f64>,
    pub succeeded: bool,
    pub last_error: Option<String>,
}

impl ConvergenceState {
    pub fn new(
        unit: SourceUnit,
        branch_model: BranchModel,
        target_coverage_pct: f64,
        max_iterations: u32,
    ) -> Self {
        Self {
            unit,
            target_coverage_pct,
            branch_model,
            test_source: String::new(),
            latest_report: None,
            iteration: 0,
            max_iterations,
            coverage_history: Vec::new(),
            succeeded: false,
            last_error: None,
        }
    }

    pub fn branch_coverage_pct(&self) -> f64 {
        self.latest_report
            .as_ref()
            .map_or(0.0, |r| r.branch_coverage_pct)
    }

    pub fn statement_coverage_pct(&self) -> f64 {
        self.latest_report
            .as_ref()
            .map_or(0.0, |r| r.statement_coverage_pct)
    }

    /// Store a fresh measurement and re-evaluate the target.
    pub fn record_measurement(&mut self, report: CoverageReport) {
        self.succeeded = report.branch_coverage_pct >= self.target_coverage_pct;
        self.latest_report = Some(report);
    }

    /// Decide what follows the latest measurement.
    ///
    /// Checks, in order: target reached, iteration cap, stagnation. The current
    /// sample enters `coverage_history` only once the first two checks pass.
    pub fn decide(&mut self) -> Decision {
        if self.succeeded {
            return Decision::Stop(StopReason::TargetReached);
        }
        if self.iteration >= self.max_iterations {
            return Decision::Stop(StopReason::IterationLimit);
        }
        self.coverage_history.push(self.branch_coverage_pct());
        match stagnation_spread(&self.coverage_history) {
            Some(spread) if spread < STAGNATION_THRESHOLD => {
                Decision::Stop(StopReason::Stagnated { spread })
            }
            _ => Decision::Optimize,
        }
    }

    /// Enter an OPTIMIZE round.
    pub fn begin_optimization(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }

    pub fn set_initial_tests(&mut self, tests: String) {
        self.test_source = tests;
    }

    /// Append tests from an OPTIMIZE round, separated by a blank line.
    pub fn append_tests(&mut self, tests: &str) {
        if self.test_source.is_empty() {
            self.test_source.push_str(tests);
        } else {
            self.test_source.push_str("\n\n");
            self.test_source.push_str(tests);
        }
    }

    pub fn into_outcome(self, stop_reason: StopReason) -> SynthesisOutcome {
        let branch_coverage_pct = self.branch_coverage_pct();
        let statement_coverage_pct = self.statement_coverage_pct();
        let transcript = self
            .latest_report
            .map(|r| r.transcript)
            .unwrap_or_default();
        SynthesisOutcome {
            success: self.succeeded,
            test_count: count_tests(&self.test_source),
            tests: self.test_source,
            branch_coverage_pct,
            statement_coverage_pct,
            iterations: self.iteration,
            branch_model: self.branch_model,
            stop_reason,
            last_error: self.last_error,
            coverage_history: self.coverage_history,
            transcript,
        }
    }
}

/// `max - min` over the last [`STAGNATION_WINDOW`] samples, once that many exist.
pub fn stagnation_spread(history: &[f64]) -> Option<f64> {
    if history.len() < STAGNATION_WINDOW {
        return None;
    }
    let window = &history[history.len() - STAGNATION_WINDOW..];
    let max = window.iter().copied().fold(f64::MIN, f64::max);
    let min = window.iter().copied().fold(f64::MAX, f64::min);
    Some(max - min)
}

/// Final result of a convergence run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisOutcome {
    pub success: bool,
    pub tests: String,
    pub branch_coverage_pct: f64,
    pub statement_coverage_pct: f64,
    pub test_count: usize,
    pub iterations: u32,
    pub branch_model: BranchModel,
    pub stop_reason: StopReason,
    pub last_error: Option<String>,
    pub coverage_history: Vec<f64>,
    #[serde(skip)]
    pub transcript: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn state(target: f64, max_iterations: u32) -> ConvergenceState {
        let unit = SourceUnit::new("def f():\n    return 1\n", "unit").expect("unit");
        ConvergenceState::new(unit, BranchModel::new(Vec::new()), target, max_iterations)
    }

    fn report(branch: f64) -> CoverageReport {
        CoverageReport {
            execution_succeeded: true,
            statement_coverage_pct: branch,
            branch_coverage_pct: branch,
            uncovered_branches: Vec::new(),
            tests_run: 1,
            tests_passed: 1,
            transcript: String::new(),
            error: None,
        }
    }

    #[test]
    fn target_reached_stops_before_history_grows() {
        let mut s = state(80.0, 5);
        s.record_measurement(report(80.0));
        assert!(s.succeeded);
        assert_eq!(s.decide(), Decision::Stop(StopReason::TargetReached));
        assert!(s.coverage_history.is_empty());
    }

    #[test]
    fn iteration_cap_wins_over_stagnation() {
        let mut s = state(100.0, 0);
        s.record_measurement(report(10.0));
        assert_eq!(s.decide(), Decision::Stop(StopReason::IterationLimit));
        assert!(s.coverage_history.is_empty());
    }

    #[test]
    fn third_flat_sample_stagnates() {
        let mut s = state(100.0, 10);
        for (round, pct) in [40.0, 40.5, 40.9].into_iter().enumerate() {
            s.record_measurement(report(pct));
            let decision = s.decide();
            if round < 2 {
                assert_eq!(decision, Decision::Optimize);
                s.begin_optimization();
            } else {
                match decision {
                    Decision::Stop(StopReason::Stagnated { spread }) => {
                        assert!((spread - 0.9).abs() < 1e-9);
                    }
                    other => panic!("expected stagnation, got {other:?}"),
                }
            }
        }
        assert_eq!(s.iteration, 2);
    }

    #[test]
    fn spread_of_exactly_one_keeps_going() {
        let mut s = state(100.0, 10);
        s.coverage_history = vec![40.0, 41.0];
        s.record_measurement(report(40.5));
        assert_eq!(s.decide(), Decision::Optimize);
    }

    #[test]
    fn appended_tests_are_separated_by_blank_line() {
        let mut s = state(80.0, 5);
        s.set_initial_tests("def test_a():\n    pass".to_string());
        s.append_tests("def test_b():\n    pass");
        assert_eq!(
            s.test_source,
            "def test_a():\n    pass\n\ndef test_b():\n    pass"
        );
        let outcome = s.into_outcome(StopReason::IterationLimit);
        assert_eq!(outcome.test_count, 2);
        assert!(!outcome.success);
    }

    #[test]
    fn stop_reason_serializes_with_kind_tag() {
        let json = serde_json::to_value(StopReason::Stagnated { spread: 0.5 }).expect("json");
        assert_eq!(json, serde_json::json!({"kind": "stagnated", "spread": 0.5}));
    }

    proptest! {
        #[test]
        fn decide_never_optimizes_past_the_cap(
            samples in proptest::collection::vec(0.0f64..100.0, 1..30),
            max_iterations in 1u32..20,
            target in 0.0f64..=100.0,
        ) {
            let mut s = state(target, max_iterations);
            let mut stopped = false;
            for pct in samples {
                s.record_measurement(report(pct));
                match s.decide() {
                    Decision::Optimize => {
                        prop_assert!(pct < target);
                        s.begin_optimization();
                    }
                    Decision::Stop(reason) => {
                        if reason == StopReason::TargetReached {
                            prop_assert!(pct >= target);
                        }
                        stopped = true;
                        break;
                    }
                }
                prop_assert!(s.iteration <= s.max_iterations);
            }
            prop_assert!(s.coverage_history.len() as u32 <= s.iteration + 1);
            if !stopped {
                prop_assert!(s.iteration <= max_iterations);
            }
        }

        #[test]
        fn flat_history_always_stagnates(level in 0.0f64..99.0, jitter in 0.0f64..0.99) {
            let mut s = state(100.0, 20);
            s.coverage_history = vec![level, level + jitter];
            s.record_measurement(report(level));
            let stagnated = matches!(s.decide(), Decision::Stop(StopReason::Stagnated { .. }));
            prop_assert!(stagnated);
        }
    }
}
