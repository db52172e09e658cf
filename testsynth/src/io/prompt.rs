//! Prompt pack builder for oracle requests.
//!
//! Templates are rendered with minijinja, split into marked sections, and fit
//! to a byte budget by dropping the least useful sections first.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::types::{BranchModel, CoverageReport};
use crate::io::oracle::{IncrementalRequest, InitialRequest};

const INITIAL_TEMPLATE: &str = include_str!("prompts/initial.md");
const INCREMENTAL_TEMPLATE: &str = include_str!("prompts/incremental.md");
const GENERATOR_SYSTEM: &str = include_str!("prompts/generator_system.md");
const OPTIMIZER_SYSTEM: &str = include_str!("prompts/optimizer_system.md");

pub const DEFAULT_PROMPT_BUDGET_BYTES: usize = 60_000;

/// Lines of the last transcript kept for the failure section.
const FAILURE_TAIL_LINES: usize = 40;

/// Drop order when over budget: bulky context first, then the previous suite.
const DROP_ORDER: [&str; 4] = ["model", "functions", "failure", "existing"];

static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap());

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("initial", INITIAL_TEMPLATE)
            .expect("initial template should be valid");
        env.add_template("incremental", INCREMENTAL_TEMPLATE)
            .expect("incremental template should be valid");
        Self { env }
    }

    fn render_initial(&self, request: &InitialRequest<'_>) -> Result<String> {
        let template = self.env.get_template("initial")?;
        let rendered = template.render(context! {
            module_name => request.module_name,
            code => request.code.trim_end(),
            total_branches => request.branch_model.total_branches_in_unit,
            function_count => request.branch_model.functions.len(),
            functions => &request.branch_model.functions,
            branch_model_json => model_json(request.branch_model)?,
        })?;
        Ok(rendered)
    }

    fn render_incremental(&self, request: &IncrementalRequest<'_>) -> Result<String> {
        let report = request.coverage_report;
        let uncovered: Vec<String> = report
            .uncovered_branches
            .iter()
            .map(|b| match b.target {
                Some(target) if target < 0 => format!("{} line {} -> function exit", b.file, b.line),
                Some(target) => format!("{} line {} -> line {target}", b.file, b.line),
                None => format!("{} line {}", b.file, b.line),
            })
            .collect();
        let template = self.env.get_template("incremental")?;
        let rendered = template.render(context! {
            module_name => request.module_name,
            code => request.code.trim_end(),
            existing_tests => request.existing_tests.trim_end(),
            branch_coverage => format!("{:.1}", report.branch_coverage_pct),
            tests_run => report.tests_run,
            tests_passed => report.tests_passed,
            uncovered => uncovered,
            error => report.error.as_deref(),
            failing => failure_excerpt(report),
            branch_model_json => model_json(request.branch_model)?,
        })?;
        Ok(rendered)
    }
}

fn model_json(model: &BranchModel) -> Result<String> {
    Ok(serde_json::to_string_pretty(model)?)
}

/// Tail of the transcript when the last run did not pass cleanly.
fn failure_excerpt(report: &CoverageReport) -> Option<String> {
    if report.execution_succeeded && report.tests_passed == report.tests_run {
        return None;
    }
    let lines: Vec<&str> = report.transcript.lines().collect();
    let start = lines.len().saturating_sub(FAILURE_TAIL_LINES);
    let tail = lines[start..].join("\n");
    let tail = tail.trim();
    (!tail.is_empty()).then(|| tail.to_string())
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    /// Required sections are never dropped.
    required: bool,
    content: String,
}

/// Parse sections from rendered template output using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let mut sections = Vec::new();
    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str().to_string();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    for (i, (_, end, key, required)) in markers.iter().enumerate() {
        let next = markers
            .get(i + 1)
            .map(|(start, ..)| *start)
            .unwrap_or(rendered.len());
        let content = rendered[*end..next].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }

    sections
}

/// Drop droppable sections in [`DROP_ORDER`] until the pack fits `budget`,
/// then truncate the last section if it still does not.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let other_len: usize = sections
        .iter()
        .take(sections.len().saturating_sub(1))
        .map(|s| s.content.len())
        .sum();
    let allowed = budget.saturating_sub(other_len);
    if let Some(last) = sections.last_mut() {
        let before_len = last.content.len();
        let keep = floor_char_boundary(&last.content, allowed.saturating_sub(12));
        last.content.truncate(keep);
        last.content.push_str("\n[truncated]");
        debug!(
            section = last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds prompt packs within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_BUDGET_BYTES)
    }
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_initial(&self, request: &InitialRequest<'_>) -> Result<PromptPack> {
        let rendered = PromptEngine::new().render_initial(request)?;
        Ok(self.pack(GENERATOR_SYSTEM, &rendered))
    }

    pub fn build_incremental(&self, request: &IncrementalRequest<'_>) -> Result<PromptPack> {
        let rendered = PromptEngine::new().render_incremental(request)?;
        Ok(self.pack(OPTIMIZER_SYSTEM, &rendered))
    }

    fn pack(&self, system: &str, rendered: &str) -> PromptPack {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        PromptPack {
            system: system.trim().to_string(),
            content: render_sections(&sections),
        }
    }
}

/// A rendered prompt: system instructions plus the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPack {
    pub system: String,
    pub content: String,
}

impl PromptPack {
    /// System and body joined, for backends that take a single prompt.
    pub fn combined(&self) -> String {
        format!("{}\n\n{}", self.system, self.content)
    }
}
