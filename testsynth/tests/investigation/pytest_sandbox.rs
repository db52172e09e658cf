//! Investigation tests for the pytest coverage sandbox.
//!
//! # Prerequisites
//!
//! - `python3` in PATH
//! - `pip install pytest pytest-cov`
//!
//! # Running
//!
//! ```bash
//! cargo test --test investigation -- --ignored
//! ```

use std::process::Command;
use std::time::Duration;

use testsynth::core::types::UncoveredBranch;
use testsynth::io::sandbox::{
    MeasureRequest, PytestSandbox, PytestSandboxConfig, Sandbox, SourceInput,
};
use testsynth::test_support::SIMPLE_ADD_SOURCE;

fn sandbox(root: &std::path::Path, timeout: Duration) -> PytestSandbox {
    let mut config = PytestSandboxConfig::new(root);
    config.timeout = timeout;
    PytestSandbox::new(config)
}

/// Verifies that pytest and pytest-cov are importable.
#[test]
#[ignore]
fn pytest_cov_available() {
    let output = Command::new("python3")
        .args(["-m", "pytest", "--version"])
        .output()
        .expect("python3 not in PATH");
    assert!(
        output.status.success(),
        "pytest missing: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let plugin = Command::new("python3")
        .args(["-c", "import pytest_cov"])
        .status()
        .expect("python3");
    assert!(plugin.success(), "pytest-cov missing: pip install pytest-cov");
}

/// Only the negative path is exercised: one of two arcs out of the `if`.
#[test]
#[ignore]
fn negative_path_only_is_half_branch_coverage() {
    let temp = tempfile::tempdir().expect("tempdir");
    let report = sandbox(temp.path(), Duration::from_secs(120)).measure(&MeasureRequest {
        source: SourceInput::Inline(SIMPLE_ADD_SOURCE),
        test_source: "from simple_math import add\n\n\ndef test_negative():\n    assert add(-1, 5) == 0\n",
        module_name: "simple_math",
    });

    assert!(report.execution_succeeded, "{}", report.transcript);
    assert_eq!(report.tests_run, 1);
    assert_eq!(report.tests_passed, 1);
    assert_eq!(report.branch_coverage_pct, 50.0);
    // The positive path jumps from the `if` on line 3 to `result = x + y`.
    assert_eq!(
        report.uncovered_branches,
        vec![UncoveredBranch {
            file: "simple_math.py".to_string(),
            line: 3,
            target: Some(6),
        }]
    );
    assert_eq!(std::fs::read_dir(temp.path()).expect("root").count(), 0);
}

#[test]
#[ignore]
fn both_paths_are_full_coverage() {
    let temp = tempfile::tempdir().expect("tempdir");
    let report = sandbox(temp.path(), Duration::from_secs(120)).measure(&MeasureRequest {
        source: SourceInput::Inline(SIMPLE_ADD_SOURCE),
        test_source: "from simple_math import add\n\n\ndef test_negative():\n    assert add(-1, 5) == 0\n\n\ndef test_positive():\n    assert add(1, 2) == 3\n",
        module_name: "simple_math",
    });

    assert!(report.execution_succeeded, "{}", report.transcript);
    assert_eq!(report.tests_passed, 2);
    assert_eq!(report.branch_coverage_pct, 100.0);
    assert_eq!(report.statement_coverage_pct, 100.0);
    assert!(report.uncovered_branches.is_empty());
}

#[test]
#[ignore]
fn failing_tests_still_report_coverage() {
    let temp = tempfile::tempdir().expect("tempdir");
    let report = sandbox(temp.path(), Duration::from_secs(120)).measure(&MeasureRequest {
        source: SourceInput::Inline(SIMPLE_ADD_SOURCE),
        test_source: "from simple_math import add\n\n\ndef test_wrong():\n    assert add(1, 2) == 4\n",
        module_name: "simple_math",
    });

    assert!(!report.execution_succeeded);
    assert_eq!(report.tests_run, 1);
    assert_eq!(report.tests_passed, 0);
    assert_eq!(report.branch_coverage_pct, 50.0);
}

#[test]
#[ignore]
fn runaway_tests_time_out() {
    let temp = tempfile::tempdir().expect("tempdir");
    let report = sandbox(temp.path(), Duration::from_secs(10)).measure(&MeasureRequest {
        source: SourceInput::Inline(SIMPLE_ADD_SOURCE),
        test_source: "import time\n\n\ndef test_sleep():\n    time.sleep(60)\n",
        module_name: "simple_math",
    });

    assert!(!report.execution_succeeded);
    assert_eq!(report.branch_coverage_pct, 0.0);
    assert_eq!(
        report.error.as_deref(),
        Some("test execution timed out after 10s")
    );
}
