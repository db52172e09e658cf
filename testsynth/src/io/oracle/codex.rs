//! Oracle backend that spawns `codex exec`.
//!
//! The prompt goes in on stdin. Codex writes its final message, constrained by
//! `--output-schema`, to the `--output-last-message` file; that JSON is
//! validated against the same schema before the `tests` field is used.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use jsonschema::Draft;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::{IncrementalRequest, InitialRequest, Oracle, OracleError};
use crate::io::process::run_command_with_timeout;
use crate::io::prompt::{DEFAULT_PROMPT_BUDGET_BYTES, PromptBuilder};

const ORACLE_OUTPUT_SCHEMA: &str = include_str!("../../../schemas/oracle_output.schema.json");

#[derive(Debug, Clone)]
pub struct CodexOracleConfig {
    pub program: PathBuf,
    /// Arguments placed before `exec`.
    pub program_args: Vec<String>,
    pub model: Option<String>,
    pub reasoning_effort: String,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub prompt_budget_bytes: usize,
}

impl Default for CodexOracleConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("codex"),
            program_args: Vec::new(),
            model: None,
            reasoning_effort: "medium".to_string(),
            timeout: Duration::from_secs(600),
            output_limit_bytes: 200_000,
            prompt_budget_bytes: DEFAULT_PROMPT_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OracleOutput {
    tests: String,
}

pub struct CodexOracle {
    config: CodexOracleConfig,
}

impl CodexOracle {
    pub fn new(config: CodexOracleConfig) -> Self {
        Self { config }
    }

    #[instrument(skip_all, fields(stage = stage, timeout_secs = self.config.timeout.as_secs()))]
    fn exec(&self, stage: &str, prompt: &str) -> Result<String, OracleError> {
        let scratch = tempfile::Builder::new()
            .prefix("testsynth-codex-")
            .tempdir()
            .map_err(|e| OracleError::Fatal(format!("create codex scratch dir: {e}")))?;
        let schema_path = scratch.path().join("oracle_output.schema.json");
        let output_path = scratch.path().join("output.json");
        fs::write(&schema_path, ORACLE_OUTPUT_SCHEMA)
            .map_err(|e| OracleError::Fatal(format!("write output schema: {e}")))?;

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.program_args)
            .arg("exec")
            .arg("-c")
            .arg(format!(
                "model_reasoning_effort={}",
                self.config.reasoning_effort
            ))
            .arg("--sandbox")
            .arg("read-only")
            .arg("--skip-git-repo-check");
        if let Some(model) = &self.config.model {
            cmd.arg("--model").arg(model);
        }
        cmd.arg("--output-schema")
            .arg(&schema_path)
            .arg("--output-last-message")
            .arg(&output_path)
            .arg("-")
            .current_dir(scratch.path());

        info!(stage, "starting codex exec");
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.config.timeout,
            self.config.output_limit_bytes,
        )
        .map_err(|e| OracleError::Fatal(format!("run codex exec: {e:#}")))?;

        if output.timed_out {
            warn!(stage, "codex exec timed out");
            return Err(OracleError::Transient(format!(
                "codex exec timed out after {}s",
                self.config.timeout.as_secs()
            )));
        }
        if !output.status.success() {
            warn!(stage, exit_code = ?output.status.code(), "codex exec failed");
            return Err(OracleError::Transient(format!(
                "codex exec failed with status {:?}: {}",
                output.status.code(),
                last_line(&output.transcript("codex"))
            )));
        }

        let tests = read_output(&output_path)?;
        debug!(stage, bytes = tests.len(), "codex exec completed");
        Ok(tests)
    }
}

impl Oracle for CodexOracle {
    fn synthesize_initial(&self, request: &InitialRequest<'_>) -> Result<String, OracleError> {
        let pack = PromptBuilder::new(self.config.prompt_budget_bytes)
            .build_initial(request)
            .map_err(|e| OracleError::Fatal(format!("render prompt: {e:#}")))?;
        self.exec("initial", &pack.combined())
    }

    fn synthesize_incremental(
        &self,
        request: &IncrementalRequest<'_>,
    ) -> Result<String, OracleError> {
        let pack = PromptBuilder::new(self.config.prompt_budget_bytes)
            .build_incremental(request)
            .map_err(|e| OracleError::Fatal(format!("render prompt: {e:#}")))?;
        self.exec("incremental", &pack.combined())
    }
}

fn read_output(path: &Path) -> Result<String, OracleError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        OracleError::Fatal(format!("missing codex output {}: {e}", path.display()))
    })?;
    parse_output(&raw)
}

/// Validate `raw` against the output schema and return its `tests` field.
fn parse_output(raw: &str) -> Result<String, OracleError> {
    let instance: Value = serde_json::from_str(raw)
        .map_err(|e| OracleError::Fatal(format!("parse codex output: {e}")))?;
    validate_schema(&instance)?;
    let output: OracleOutput = serde_json::from_value(instance)
        .map_err(|e| OracleError::Fatal(format!("deserialize codex output: {e}")))?;
    Ok(output.tests)
}

fn validate_schema(instance: &Value) -> Result<(), OracleError> {
    let schema: Value = serde_json::from_str(ORACLE_OUTPUT_SCHEMA)
        .map_err(|e| OracleError::Fatal(format!("parse output schema: {e}")))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|e| OracleError::Fatal(format!("compile output schema: {e}")))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(OracleError::Fatal(format!(
            "codex output failed schema validation: {}",
            messages.join("; ")
        )));
    }
    Ok(())
}

fn last_line(transcript: &str) -> &str {
    transcript
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
}
