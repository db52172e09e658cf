//! Coverage measurement sandbox.
//!
//! Every [`PytestSandbox::measure`] call gets its own scratch directory under
//! the sandbox root. The unit under test and the generated tests are written
//! there, pytest runs with branch coverage as a non-shell subprocess bounded by
//! a wall-clock timeout, and the scratch directory is removed on every exit
//! path. Measurement never fails: problems become zero-coverage reports.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::coverage::{parse_coverage_json, parse_transcript, report_from_summary};
use crate::core::types::{CoverageReport, is_valid_identifier};
use crate::io::process::run_command_with_timeout;

pub const TEST_FILE_NAME: &str = "test_generated.py";
pub const COVERAGE_JSON_NAME: &str = "coverage.json";

/// Where the code under test comes from. Exactly one source per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceInput<'a> {
    /// Source text written into the scratch directory as `<module>.py`.
    Inline(&'a str),
    /// An existing file inside the sandbox root, imported in place.
    ExistingFile(&'a Path),
}

#[derive(Debug, Clone, Copy)]
pub struct MeasureRequest<'a> {
    pub source: SourceInput<'a>,
    pub test_source: &'a str,
    pub module_name: &'a str,
}

/// Executes generated tests and reports ground-truth coverage.
pub trait Sandbox {
    fn measure(&self, request: &MeasureRequest<'_>) -> CoverageReport;
}

impl<S: Sandbox + ?Sized> Sandbox for Box<S> {
    fn measure(&self, request: &MeasureRequest<'_>) -> CoverageReport {
        (**self).measure(request)
    }
}

#[derive(Debug, Clone)]
pub struct PytestSandboxConfig {
    /// Directory that owns every scratch directory and bounds existing-file inputs.
    pub root: PathBuf,
    pub python: PathBuf,
    /// Interpreter arguments placed before `-m pytest`.
    pub python_args: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl PytestSandboxConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            python: PathBuf::from("python3"),
            python_args: Vec::new(),
            timeout: Duration::from_secs(60),
            output_limit_bytes: 1_000_000,
        }
    }
}

pub struct PytestSandbox {
    config: PytestSandboxConfig,
}

impl PytestSandbox {
    pub fn new(config: PytestSandboxConfig) -> Self {
        Self { config }
    }

    #[instrument(skip_all, fields(module = request.module_name, timeout_secs = self.config.timeout.as_secs()))]
    fn run(&self, request: &MeasureRequest<'_>) -> Result<CoverageReport> {
        if !is_valid_identifier(request.module_name) {
            bail!(
                "invalid module name {:?}: must be a valid Python identifier",
                request.module_name
            );
        }
        if Path::new(TEST_FILE_NAME).file_stem() == Some(OsStr::new(request.module_name)) {
            bail!(
                "invalid module name {:?}: collides with the generated test file",
                request.module_name
            );
        }
        fs::create_dir_all(&self.config.root)
            .with_context(|| format!("create sandbox root {}", self.config.root.display()))?;
        let root = fs::canonicalize(&self.config.root)
            .with_context(|| format!("resolve sandbox root {}", self.config.root.display()))?;

        let existing_dir = match request.source {
            SourceInput::ExistingFile(path) => Some(confine_existing_file(&root, path)?),
            SourceInput::Inline(_) => None,
        };

        let scratch = tempfile::Builder::new()
            .prefix("measure-")
            .tempdir_in(&root)
            .context("create scratch dir")?;
        debug!(scratch = %scratch.path().display(), "created scratch dir");

        if let SourceInput::Inline(code) = request.source {
            let module_file = safe_join(scratch.path(), &format!("{}.py", request.module_name))?;
            fs::write(&module_file, code)
                .with_context(|| format!("write {}", module_file.display()))?;
        }
        let test_file = safe_join(scratch.path(), TEST_FILE_NAME)?;
        fs::write(&test_file, request.test_source)
            .with_context(|| format!("write {}", test_file.display()))?;

        let mut cmd = Command::new(&self.config.python);
        cmd.args(&self.config.python_args)
            .args(pytest_args(request.module_name))
            .current_dir(scratch.path())
            .env("PYTHONDONTWRITEBYTECODE", "1");
        if let Some(dir) = &existing_dir {
            cmd.env("PYTHONPATH", prepend_path(dir, env::var_os("PYTHONPATH"))?);
        }

        info!("running pytest with branch coverage");
        let output = run_command_with_timeout(
            cmd,
            None,
            self.config.timeout,
            self.config.output_limit_bytes,
        )
        .context("run pytest")?;
        let transcript = output.transcript("pytest");

        if output.timed_out {
            warn!("pytest timed out");
            return Ok(CoverageReport::timed_out(
                self.config.timeout.as_secs(),
                transcript,
            ));
        }

        let succeeded = output.status.success();
        let json_path = scratch.path().join(COVERAGE_JSON_NAME);
        let report = match fs::read_to_string(&json_path) {
            Ok(raw) => {
                if let Err(err) = fs::remove_file(&json_path) {
                    debug!(err = %err, "failed to remove coverage json");
                }
                match parse_coverage_json(&raw) {
                    Ok(summary) => report_from_summary(summary, transcript, succeeded),
                    Err(err) => {
                        warn!(err = %err, "unparsable coverage json, using transcript");
                        parse_transcript(&transcript, succeeded)
                    }
                }
            }
            Err(_) => {
                warn!("no coverage json, using transcript");
                parse_transcript(&transcript, succeeded)
            }
        };

        debug!(
            succeeded,
            branch = report.branch_coverage_pct,
            statement = report.statement_coverage_pct,
            tests_run = report.tests_run,
            tests_passed = report.tests_passed,
            "measured coverage"
        );
        // `scratch` drops here and removes sources, tests, .coverage and reports.
        Ok(report)
    }
}

impl Sandbox for PytestSandbox {
    fn measure(&self, request: &MeasureRequest<'_>) -> CoverageReport {
        match self.run(request) {
            Ok(report) => report,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "sandbox measurement failed");
                CoverageReport::failed(format!("{err:#}"), "")
            }
        }
    }
}

/// Arguments after the interpreter: `-m pytest <tests> --cov=<module> ...`.
pub fn pytest_args(module_name: &str) -> Vec<String> {
    vec![
        "-m".to_string(),
        "pytest".to_string(),
        TEST_FILE_NAME.to_string(),
        format!("--cov={module_name}"),
        "--cov-branch".to_string(),
        format!("--cov-report=json:{COVERAGE_JSON_NAME}"),
        "--cov-report=term".to_string(),
        "-v".to_string(),
        "-p".to_string(),
        "no:cacheprovider".to_string(),
    ]
}

/// Join a relative path onto `base`, rejecting absolute paths and `..`.
pub fn safe_join(base: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    if relative.is_empty() {
        bail!("empty path");
    }
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => bail!("path escapes sandbox: {relative}"),
        }
    }
    Ok(base.join(rel))
}

/// Resolve `path` and require it to be a file inside `root`. Returns its directory.
fn confine_existing_file(root: &Path, path: &Path) -> Result<PathBuf> {
    let resolved = fs::canonicalize(path)
        .with_context(|| format!("resolve existing source {}", path.display()))?;
    if !resolved.starts_with(root) {
        bail!(
            "existing source {} is outside the sandbox root {}",
            resolved.display(),
            root.display()
        );
    }
    if !resolved.is_file() {
        bail!("existing source {} is not a file", resolved.display());
    }
    resolved
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("existing source {} has no parent", resolved.display()))
}

fn prepend_path(dir: &Path, current: Option<OsString>) -> Result<OsString> {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(current) = current {
        paths.extend(env::split_paths(&current));
    }
    env::join_paths(paths).context("build PYTHONPATH")
}
