//! CLI tests for the `testsynth` binary.
//!
//! Spawns the binary and checks exit codes and written artifacts. `generate`
//! runs against the fixture oracle and a shell script standing in for
//! `python -m pytest`, so no interpreter or network is needed.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use testsynth::exit_codes;
use testsynth::test_support::{CALCULATOR_SOURCE, SIMPLE_ADD_SOURCE};

fn testsynth(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_testsynth"))
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("TESTSYNTH_TARGET_COVERAGE")
        .env_remove("TESTSYNTH_MAX_ITERATIONS")
        .env_remove("TESTSYNTH_SANDBOX_TIMEOUT_SECS")
        .args(args)
        .output()
        .expect("run testsynth")
}

#[test]
fn analyze_prints_json_model() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("calculator.py"), CALCULATOR_SOURCE).expect("write");

    let output = testsynth(temp.path(), &["analyze", "calculator.py", "--json"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let model: Value = serde_json::from_slice(&output.stdout).expect("json");
    let functions = model["functions"].as_array().expect("functions");
    assert_eq!(functions.len(), 5);
    assert_eq!(functions[3]["name"], "divide");
    assert_eq!(model["total_branches_in_unit"], 9);
}

#[test]
fn analyze_rejects_loops_with_grammar_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("loops.py"),
        "def total(xs):\n    s = 0\n    while s < 3:\n        s = s + 1\n    return s\n",
    )
    .expect("write");

    let output = testsynth(temp.path(), &["analyze", "loops.py"]);

    assert_eq!(output.status.code(), Some(exit_codes::GRAMMAR_VIOLATION));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("line 3"), "{stderr}");
    assert!(output.stdout.is_empty());
}

#[test]
fn init_config_refuses_to_overwrite_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");

    let first = testsynth(temp.path(), &["init-config"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    let written = fs::read_to_string(temp.path().join("testsynth.toml")).expect("config");
    assert!(written.contains("max_iterations = 5"));

    let second = testsynth(temp.path(), &["init-config"]);
    assert_eq!(second.status.code(), Some(exit_codes::INVALID));

    let forced = testsynth(temp.path(), &["init-config", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn invalid_config_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("testsynth.toml"), "max_iterations = 99\n").expect("write");
    fs::write(temp.path().join("simple_math.py"), SIMPLE_ADD_SOURCE).expect("write");

    let output = testsynth(
        temp.path(),
        &["generate", "simple_math.py", "--oracle", "fixture"],
    );

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

/// Reports 50% branch coverage for one test and 100% once two exist.
#[cfg(unix)]
const FAKE_PYTEST: &str = r#"count=$(grep -c '^def test_' test_generated.py)
if [ "$count" -ge 2 ]; then covered=2; missing='[]'; else covered=1; missing='[[3, 6]]'; fi
cat > coverage.json <<JSON
{"files": {"simple_math.py": {"missing_branches": $missing}},
 "totals": {"covered_lines": 4, "num_statements": 5, "percent_covered": 80.0,
            "num_branches": 2, "covered_branches": $covered}}
JSON
echo "======== $count passed in 0.01s ========"
"#;

#[cfg(unix)]
fn write_generate_fixture(dir: &Path, incremental: &str) {
    fs::write(dir.join("simple_math.py"), SIMPLE_ADD_SOURCE).expect("source");
    fs::write(dir.join("fake_pytest.sh"), FAKE_PYTEST).expect("script");
    fs::write(
        dir.join("testsynth.toml"),
        format!(
            r#"max_iterations = 3

[sandbox]
root = "sandbox"
python = "sh"
python_args = ["{}"]
timeout_secs = 30

[retry]
attempts = 1
min_wait_secs = 0.0
max_wait_secs = 0.0
"#,
            dir.join("fake_pytest.sh").display()
        ),
    )
    .expect("config");
    fs::write(
        dir.join("oracle.toml"),
        format!(
            r#"initial = """
```python
from simple_math import add

def test_positive():
    assert add(1, 2) == 3
```
"""
{incremental}
"#
        ),
    )
    .expect("fixture");
}

#[cfg(unix)]
#[test]
fn generate_reaches_target_with_fixture_oracle() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_generate_fixture(
        temp.path(),
        r#"
[[incremental]]
response = "def test_negative():\n    assert add(-1, 2) == 0\n"
"#,
    );

    let output = testsynth(
        temp.path(),
        &[
            "generate",
            "simple_math.py",
            "--oracle",
            "fixture",
            "--fixture",
            "oracle.toml",
            "--out",
            "out/test_simple_math.py",
            "--summary",
            "out/summary.json",
        ],
    );

    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let tests = fs::read_to_string(temp.path().join("out/test_simple_math.py")).expect("tests");
    assert!(tests.contains("def test_positive"));
    assert!(tests.contains("def test_negative"));

    let summary: Value = serde_json::from_str(
        &fs::read_to_string(temp.path().join("out/summary.json")).expect("summary"),
    )
    .expect("json");
    assert_eq!(summary["success"], true);
    assert_eq!(summary["iterations"], 1);
    assert_eq!(summary["test_count"], 2);
    assert_eq!(summary["branch_coverage_pct"], 100.0);
    assert_eq!(summary["stop_reason"]["kind"], "target_reached");

    // Scratch directories are gone after every measurement.
    let leftovers = fs::read_dir(temp.path().join("sandbox")).expect("sandbox").count();
    assert_eq!(leftovers, 0);
}

#[cfg(unix)]
#[test]
fn generate_reports_target_not_reached() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_generate_fixture(
        temp.path(),
        r#"
[[incremental]]
error = "model overloaded"
"#,
    );

    let output = testsynth(
        temp.path(),
        &[
            "generate",
            "simple_math.py",
            "--oracle",
            "fixture",
            "--fixture",
            "oracle.toml",
            "--max-iterations",
            "1",
        ],
    );

    assert_eq!(output.status.code(), Some(exit_codes::TARGET_NOT_REACHED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("def test_positive"));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("optimize failed: model overloaded"), "{stderr}");
    assert!(stderr.contains("target not reached"), "{stderr}");
}
