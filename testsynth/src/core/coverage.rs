//! Pure parsers that turn coverage artifacts into [`CoverageReport`]s.
//!
//! The machine-readable `coverage.json` is the primary source. When it is
//! missing or unparsable, [`parse_transcript`] recovers aggregate percentages
//! from the terminal report; that path cannot list individual branch arcs.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::core::types::{CoverageReport, UncoveredBranch, branch_percentage};

static SUMMARY_COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) (passed|failed|errors?)\b").unwrap());

#[derive(Debug, Deserialize)]
struct CoverageJson {
    #[serde(default)]
    files: BTreeMap<String, FileEntry>,
    totals: Totals,
}

#[derive(Debug, Default, Deserialize)]
struct FileEntry {
    #[serde(default)]
    missing_branches: Vec<(i64, i64)>,
}

#[derive(Debug, Deserialize)]
struct Totals {
    #[serde(default)]
    percent_covered: f64,
    #[serde(default)]
    covered_lines: Option<u64>,
    #[serde(default)]
    num_statements: Option<u64>,
    #[serde(default)]
    num_branches: u64,
    #[serde(default)]
    covered_branches: u64,
}

/// Aggregates read from a `coverage.json` report.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageSummary {
    pub statement_coverage_pct: f64,
    pub branch_coverage_pct: f64,
    pub uncovered_branches: Vec<UncoveredBranch>,
}

/// Parse the JSON written by `--cov-report=json`.
pub fn parse_coverage_json(raw: &str) -> Result<CoverageSummary> {
    let report: CoverageJson = serde_json::from_str(raw).context("parse coverage json")?;
    let totals = &report.totals;

    let statement_coverage_pct = match (totals.covered_lines, totals.num_statements) {
        (Some(covered), Some(total)) if total > 0 => covered as f64 / total as f64 * 100.0,
        (Some(_), Some(_)) => 0.0,
        _ => totals.percent_covered,
    };

    let uncovered_branches = report
        .files
        .iter()
        .flat_map(|(file, entry)| {
            entry
                .missing_branches
                .iter()
                .map(move |(from, to)| UncoveredBranch {
                    file: file.clone(),
                    line: *from,
                    target: Some(*to),
                })
        })
        .collect();

    Ok(CoverageSummary {
        statement_coverage_pct,
        branch_coverage_pct: branch_percentage(totals.covered_branches, totals.num_branches),
        uncovered_branches,
    })
}

/// `(tests_run, tests_passed)` from the pytest summary line.
pub fn parse_test_counts(transcript: &str) -> (u32, u32) {
    let Some(summary) = transcript
        .lines()
        .rev()
        .find(|line| SUMMARY_COUNT_RE.is_match(line))
    else {
        return (0, 0);
    };

    let mut run = 0u32;
    let mut passed = 0u32;
    for caps in SUMMARY_COUNT_RE.captures_iter(summary) {
        let count: u32 = caps[1].parse().unwrap_or(0);
        run += count;
        if &caps[2] == "passed" {
            passed += count;
        }
    }
    (run, passed)
}

/// Build a report from a `coverage.json` summary plus the run transcript.
pub fn report_from_summary(
    summary: CoverageSummary,
    transcript: String,
    execution_succeeded: bool,
) -> CoverageReport {
    let (tests_run, tests_passed) = parse_test_counts(&transcript);
    CoverageReport {
        execution_succeeded,
        statement_coverage_pct: summary.statement_coverage_pct,
        branch_coverage_pct: summary.branch_coverage_pct,
        uncovered_branches: summary.uncovered_branches,
        tests_run,
        tests_passed,
        transcript,
        error: None,
    }
}

/// Row of the terminal coverage table: statements, missed, branches, partial branches, cover %.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct TableRow {
    statements: u64,
    missed: u64,
    branches: Option<u64>,
    cover_pct: f64,
}

/// Best-effort fallback over the human-readable transcript.
///
/// Uses the `TOTAL` row of the coverage table, or the sum of per-file rows
/// when only one file was measured. Branch coverage is derived from the
/// combined cover percentage, so it is approximate and never lists arcs.
pub fn parse_transcript(transcript: &str, execution_succeeded: bool) -> CoverageReport {
    let (tests_run, tests_passed) = parse_test_counts(transcript);
    let (statement_coverage_pct, branch_coverage_pct) = match coverage_table_total(transcript) {
        Some(row) => percentages_from_row(row),
        None => (0.0, 0.0),
    };

    CoverageReport {
        execution_succeeded,
        statement_coverage_pct,
        branch_coverage_pct,
        uncovered_branches: Vec::new(),
        tests_run,
        tests_passed,
        transcript: transcript.to_string(),
        error: None,
    }
}

fn coverage_table_total(transcript: &str) -> Option<TableRow> {
    let mut files = Vec::new();
    for line in transcript.lines() {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            continue;
        };
        let rest: Vec<&str> = parts.collect();
        let Some(row) = parse_row(&rest) else {
            continue;
        };
        if name == "TOTAL" {
            return Some(row);
        }
        if name.ends_with(".py") {
            files.push(row);
        }
    }

    match files.as_slice() {
        [] => None,
        [single] => Some(*single),
        many => {
            let statements: u64 = many.iter().map(|r| r.statements).sum();
            let missed: u64 = many.iter().map(|r| r.missed).sum();
            let branches = many
                .iter()
                .map(|r| r.branches)
                .sum::<Option<u64>>();
            let weight = |r: &TableRow| (r.statements + r.branches.unwrap_or(0)) as f64;
            let total_weight: f64 = many.iter().map(weight).sum();
            let cover_pct = if total_weight > 0.0 {
                many.iter().map(|r| r.cover_pct * weight(r)).sum::<f64>() / total_weight
            } else {
                0.0
            };
            Some(TableRow {
                statements,
                missed,
                branches,
                cover_pct,
            })
        }
    }
}

/// Accepts `Stmts Miss [Branch BrPart] Cover%` with an optional trailing `Missing` column.
fn parse_row(cells: &[&str]) -> Option<TableRow> {
    let pct_idx = cells.iter().position(|c| c.ends_with('%'))?;
    let cover_pct: f64 = cells[pct_idx].trim_end_matches('%').parse().ok()?;
    let numbers: Vec<u64> = cells[..pct_idx]
        .iter()
        .map(|c| c.parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match numbers.as_slice() {
        [statements, missed] => Some(TableRow {
            statements: *statements,
            missed: *missed,
            branches: None,
            cover_pct,
        }),
        [statements, missed, branches, _partial] => Some(TableRow {
            statements: *statements,
            missed: *missed,
            branches: Some(*branches),
            cover_pct,
        }),
        _ => None,
    }
}

fn percentages_from_row(row: TableRow) -> (f64, f64) {
    let covered_lines = row.statements.saturating_sub(row.missed);
    let statement_pct = if row.statements > 0 {
        covered_lines as f64 / row.statements as f64 * 100.0
    } else {
        0.0
    };

    let branch_pct = match row.branches {
        Some(branches) if branches > 0 => {
            // cover% = (covered lines + covered branches) / (statements + branches)
            let combined = row.cover_pct / 100.0 * (row.statements + branches) as f64;
            let covered_branches = (combined - covered_lines as f64)
                .round()
                .clamp(0.0, branches as f64);
            covered_branches / branches as f64 * 100.0
        }
        _ => 0.0,
    };
    (statement_pct, branch_pct)
}
