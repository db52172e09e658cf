//! Branch model extraction.
//!
//! Analysis runs in two steps: grammar conformance ([`parse_module`]) and a
//! structural walk over the validated tree. Only two-way conditionals are
//! recognized. An `else` whose first statement is itself an `if` is not a
//! branch of its own; the nested `if` contributes its records instead.

use thiserror::Error;
use tracing::debug;

use crate::core::ast::{FunctionDef, Module, Stmt};
use crate::core::grammar::{GrammarViolation, parse_module};
use crate::core::types::{BranchKind, BranchModel, BranchRecord, FunctionRecord, Param};

const UNTYPED: &str = "Any";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// Input uses a construct outside the supported subset. Not retryable.
    #[error("grammar violation: {0}")]
    GrammarViolation(GrammarViolation),
    /// Extraction failed on grammar-valid input. Always a defect.
    #[error("internal analysis error: {0}")]
    Internal(String),
}

impl From<GrammarViolation> for AnalysisError {
    fn from(value: GrammarViolation) -> Self {
        AnalysisError::GrammarViolation(value)
    }
}

/// Validate `code` against the supported grammar and extract its branch model.
pub fn analyze(code: &str) -> Result<BranchModel, AnalysisError> {
    let module = parse_module(code)?;
    let model = extract(&module)?;
    debug!(
        functions = model.functions.len(),
        branches = model.total_branches_in_unit,
        "extracted branch model"
    );
    Ok(model)
}

fn extract(module: &Module) -> Result<BranchModel, AnalysisError> {
    let functions = module
        .functions
        .iter()
        .map(function_record)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BranchModel::new(functions))
}

fn function_record(def: &FunctionDef) -> Result<FunctionRecord, AnalysisError> {
    if def.line == 0 {
        return Err(AnalysisError::Internal(format!(
            "function '{}' has no source line",
            def.name
        )));
    }
    if def.body.is_empty() {
        return Err(AnalysisError::Internal(format!(
            "function '{}' has an empty body",
            def.name
        )));
    }

    let mut branches = Vec::new();
    collect_branches(&def.body, &mut branches)?;

    let ifs = branches
        .iter()
        .filter(|b| b.kind == BranchKind::If)
        .count() as u32;
    let total_branches = branches.len() as u32;

    Ok(FunctionRecord {
        name: def.name.clone(),
        params: def
            .params
            .iter()
            .map(|p| Param {
                name: p.name.clone(),
                annotation: p.annotation.clone().unwrap_or_else(|| UNTYPED.to_string()),
            })
            .collect(),
        return_type: def.returns.clone().unwrap_or_else(|| UNTYPED.to_string()),
        branches,
        cyclomatic_complexity: 1 + ifs,
        total_branches,
        start_line: def.line,
    })
}

/// Pre-order walk: an `if`, its body, its `else`, then the else body. This
/// visits branch points in source order.
fn collect_branches(body: &[Stmt], out: &mut Vec<BranchRecord>) -> Result<(), AnalysisError> {
    for stmt in body {
        let Stmt::If {
            test,
            body,
            orelse,
            line,
        } = stmt
        else {
            continue;
        };
        if *line == 0 || body.is_empty() {
            return Err(AnalysisError::Internal(format!(
                "malformed conditional near line {line}"
            )));
        }

        out.push(BranchRecord {
            line: *line,
            kind: BranchKind::If,
            condition: Some(test.to_string()),
        });
        collect_branches(body, out)?;

        match orelse.first() {
            None | Some(Stmt::If { .. }) => {}
            Some(first) => out.push(BranchRecord {
                line: first.line(),
                kind: BranchKind::Else,
                condition: None,
            }),
        }
        collect_branches(orelse, out)?;
    }
    Ok(())
}
