//! Synthesis configuration stored in `testsynth.toml`.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, `TESTSYNTH_*`
//! environment variables, CLI flags.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::state::{DEFAULT_MAX_ITERATIONS, DEFAULT_TARGET_COVERAGE, MAX_ITERATIONS_LIMIT};
use crate::io::oracle::{CodexOracleConfig, HttpOracleConfig};
use crate::io::prompt::DEFAULT_PROMPT_BUDGET_BYTES;
use crate::io::retry::RetryPolicy;
use crate::io::sandbox::PytestSandboxConfig;

pub const DEFAULT_CONFIG_FILE: &str = "testsynth.toml";

pub const ENV_TARGET_COVERAGE: &str = "TESTSYNTH_TARGET_COVERAGE";
pub const ENV_MAX_ITERATIONS: &str = "TESTSYNTH_MAX_ITERATIONS";
pub const ENV_SANDBOX_TIMEOUT: &str = "TESTSYNTH_SANDBOX_TIMEOUT_SECS";

pub const MIN_SANDBOX_TIMEOUT_SECS: u64 = 10;
pub const MAX_SANDBOX_TIMEOUT_SECS: u64 = 300;
pub const MAX_RETRY_WAIT_SECS: f64 = 600.0;

/// Synthesis configuration (TOML). Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthConfig {
    /// Branch coverage percentage at which the loop stops successfully.
    pub target_coverage: f64,
    /// Cap on OPTIMIZE rounds (1-20).
    pub max_iterations: u32,
    pub sandbox: SandboxSection,
    pub retry: RetrySection,
    pub oracle: OracleSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxSection {
    /// Scratch directories are created here; relative paths resolve against the config file.
    pub root: PathBuf,
    pub python: String,
    pub python_args: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySection {
    pub attempts: u32,
    pub min_wait_secs: f64,
    pub max_wait_secs: f64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OracleBackend {
    Fixture,
    Codex,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleSection {
    pub backend: OracleBackend,
    pub prompt_budget_bytes: usize,
    /// Script for the fixture backend.
    pub fixture: Option<PathBuf>,
    pub codex: CodexSection,
    pub http: HttpSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CodexSection {
    pub program: String,
    pub model: Option<String>,
    pub reasoning_effort: String,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpSection {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            target_coverage: DEFAULT_TARGET_COVERAGE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            sandbox: SandboxSection::default(),
            retry: RetrySection::default(),
            oracle: OracleSection::default(),
        }
    }
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".testsynth/sandbox"),
            python: "python3".to_string(),
            python_args: Vec::new(),
            timeout_secs: 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempts: 3,
            min_wait_secs: 2.0,
            max_wait_secs: 10.0,
            multiplier: 1.0,
        }
    }
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            backend: OracleBackend::Codex,
            prompt_budget_bytes: DEFAULT_PROMPT_BUDGET_BYTES,
            fixture: None,
            codex: CodexSection::default(),
            http: HttpSection::default(),
        }
    }
}

impl Default for CodexSection {
    fn default() -> Self {
        let defaults = CodexOracleConfig::default();
        Self {
            program: defaults.program.display().to_string(),
            model: defaults.model,
            reasoning_effort: defaults.reasoning_effort,
            timeout_secs: defaults.timeout.as_secs(),
            output_limit_bytes: defaults.output_limit_bytes,
        }
    }
}

impl Default for HttpSection {
    fn default() -> Self {
        let defaults = HttpOracleConfig::default();
        Self {
            base_url: defaults.base_url,
            model: defaults.model,
            api_key_env: defaults.api_key_env,
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            timeout_secs: defaults.timeout.as_secs(),
        }
    }
}

impl SynthConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.target_coverage) {
            return Err(anyhow!("target_coverage must be within 0-100"));
        }
        if !(1..=MAX_ITERATIONS_LIMIT).contains(&self.max_iterations) {
            return Err(anyhow!(
                "max_iterations must be within 1-{MAX_ITERATIONS_LIMIT}"
            ));
        }
        if !(MIN_SANDBOX_TIMEOUT_SECS..=MAX_SANDBOX_TIMEOUT_SECS).contains(&self.sandbox.timeout_secs)
        {
            return Err(anyhow!(
                "sandbox.timeout_secs must be within {MIN_SANDBOX_TIMEOUT_SECS}-{MAX_SANDBOX_TIMEOUT_SECS}"
            ));
        }
        if self.sandbox.python.trim().is_empty() {
            return Err(anyhow!("sandbox.python must be non-empty"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.retry.attempts == 0 {
            return Err(anyhow!("retry.attempts must be >= 1"));
        }
        if !(0.0..=MAX_RETRY_WAIT_SECS).contains(&self.retry.max_wait_secs) {
            return Err(anyhow!(
                "retry.max_wait_secs must be within 0-{MAX_RETRY_WAIT_SECS}"
            ));
        }
        if !(0.0..=self.retry.max_wait_secs).contains(&self.retry.min_wait_secs) {
            return Err(anyhow!("retry.min_wait_secs must be within 0-max_wait_secs"));
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier > 0.0) {
            return Err(anyhow!("retry.multiplier must be finite and > 0"));
        }
        if self.oracle.prompt_budget_bytes == 0 {
            return Err(anyhow!("oracle.prompt_budget_bytes must be > 0"));
        }
        if self.oracle.codex.timeout_secs == 0 || self.oracle.http.timeout_secs == 0 {
            return Err(anyhow!("oracle timeouts must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.oracle.http.temperature) {
            return Err(anyhow!("oracle.http.temperature must be within 0-2"));
        }
        Ok(())
    }

    /// Apply `TESTSYNTH_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Unparsable or out-of-range values are
    /// reported and leave the current value in place.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = parse_override(&lookup, ENV_TARGET_COVERAGE, |v: &f64| {
            (0.0..=100.0).contains(v)
        }) {
            self.target_coverage = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_MAX_ITERATIONS, |v: &u32| {
            (1..=MAX_ITERATIONS_LIMIT).contains(v)
        }) {
            self.max_iterations = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_SANDBOX_TIMEOUT, |v: &u64| {
            (MIN_SANDBOX_TIMEOUT_SECS..=MAX_SANDBOX_TIMEOUT_SECS).contains(v)
        }) {
            self.sandbox.timeout_secs = v;
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry.attempts,
            min_wait: Duration::from_secs_f64(self.retry.min_wait_secs),
            max_wait: Duration::from_secs_f64(self.retry.max_wait_secs),
            multiplier: self.retry.multiplier,
        }
    }

    /// Sandbox settings with a relative root resolved against `base_dir`.
    pub fn sandbox_config(&self, base_dir: &Path) -> PytestSandboxConfig {
        let root = if self.sandbox.root.is_absolute() {
            self.sandbox.root.clone()
        } else {
            base_dir.join(&self.sandbox.root)
        };
        PytestSandboxConfig {
            root,
            python: PathBuf::from(&self.sandbox.python),
            python_args: self.sandbox.python_args.clone(),
            timeout: Duration::from_secs(self.sandbox.timeout_secs),
            output_limit_bytes: self.sandbox.output_limit_bytes,
        }
    }

    pub fn codex_config(&self) -> CodexOracleConfig {
        let codex = &self.oracle.codex;
        CodexOracleConfig {
            program: PathBuf::from(&codex.program),
            program_args: Vec::new(),
            model: codex.model.clone(),
            reasoning_effort: codex.reasoning_effort.clone(),
            timeout: Duration::from_secs(codex.timeout_secs),
            output_limit_bytes: codex.output_limit_bytes,
            prompt_budget_bytes: self.oracle.prompt_budget_bytes,
        }
    }

    pub fn http_config(&self) -> HttpOracleConfig {
        let http = &self.oracle.http;
        HttpOracleConfig {
            base_url: http.base_url.clone(),
            model: http.model.clone(),
            api_key_env: http.api_key_env.clone(),
            temperature: http.temperature,
            max_tokens: http.max_tokens,
            timeout: Duration::from_secs(http.timeout_secs),
            prompt_budget_bytes: self.oracle.prompt_budget_bytes,
        }
    }
}

fn parse_override<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    in_range: impl Fn(&T) -> bool,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if in_range(&value) => {
            debug!(key, value = %raw.trim(), "applied environment override");
            Some(value)
        }
        Ok(_) => {
            warn!(key, value = %raw, "environment override out of range, keeping current value");
            None
        }
        Err(_) => {
            warn!(key, value = %raw, "invalid environment override, keeping current value");
            None
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SynthConfig::default()`.
pub fn load_config(path: &Path) -> Result<SynthConfig> {
    if !path.exists() {
        let cfg = SynthConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SynthConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SynthConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SynthConfig::default();
        assert_eq!(cfg.target_coverage, 80.0);
        assert_eq!(cfg.max_iterations, 5);
        assert_eq!(cfg.sandbox.timeout_secs, 60);
        assert_eq!(cfg.retry.attempts, 3);
        assert_eq!(cfg.oracle.http.temperature, 0.2);
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, SynthConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("testsynth.toml");
        let mut cfg = SynthConfig::default();
        cfg.oracle.backend = OracleBackend::Fixture;
        cfg.oracle.fixture = Some(PathBuf::from("fixtures/simple.toml"));
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert!(!temp.path().join("testsynth.toml.tmp").exists());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("testsynth.toml");
        fs::write(&path, "max_iterations = 3\n[sandbox]\ntimeout_secs = 30\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.sandbox.timeout_secs, 30);
        assert_eq!(cfg.sandbox.python, "python3");
        assert_eq!(cfg.target_coverage, 80.0);
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let cases: Vec<Box<dyn Fn(&mut SynthConfig)>> = vec![
            Box::new(|c| c.target_coverage = 101.0),
            Box::new(|c| c.max_iterations = 0),
            Box::new(|c| c.max_iterations = 21),
            Box::new(|c| c.sandbox.timeout_secs = 9),
            Box::new(|c| c.sandbox.timeout_secs = 301),
            Box::new(|c| c.retry.attempts = 0),
            Box::new(|c| c.retry.min_wait_secs = 20.0),
            Box::new(|c| c.retry.multiplier = 0.0),
            Box::new(|c| c.retry.multiplier = f64::INFINITY),
            Box::new(|c| c.retry.max_wait_secs = f64::INFINITY),
            Box::new(|c| c.retry.max_wait_secs = 1e30),
            Box::new(|c| c.retry.min_wait_secs = f64::NAN),
        ];
        for mutate in cases {
            let mut cfg = SynthConfig::default();
            mutate(&mut cfg);
            assert!(cfg.validate().is_err(), "{cfg:?}");
        }
    }

    #[test]
    fn infinite_retry_wait_in_file_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("testsynth.toml");
        fs::write(&path, "[retry]\nmax_wait_secs = inf\n").expect("write");
        let err = load_config(&path).expect_err("inf wait");
        assert!(format!("{err:#}").contains("retry.max_wait_secs"), "{err:#}");
    }

    #[test]
    fn env_overrides_replace_valid_values() {
        let mut cfg = SynthConfig::default();
        cfg.apply_overrides(lookup(&[
            (ENV_TARGET_COVERAGE, "95.5"),
            (ENV_MAX_ITERATIONS, " 7 "),
            (ENV_SANDBOX_TIMEOUT, "120"),
        ]));
        assert_eq!(cfg.target_coverage, 95.5);
        assert_eq!(cfg.max_iterations, 7);
        assert_eq!(cfg.sandbox.timeout_secs, 120);
    }

    #[test]
    fn invalid_env_overrides_keep_current_values() {
        let mut cfg = SynthConfig::default();
        cfg.apply_overrides(lookup(&[
            (ENV_TARGET_COVERAGE, "lots"),
            (ENV_MAX_ITERATIONS, "25"),
            (ENV_SANDBOX_TIMEOUT, "5"),
        ]));
        assert_eq!(cfg, SynthConfig::default());
    }

    #[test]
    fn relative_sandbox_root_resolves_against_base() {
        let cfg = SynthConfig::default();
        let sandbox = cfg.sandbox_config(Path::new("/work"));
        assert_eq!(sandbox.root, PathBuf::from("/work/.testsynth/sandbox"));
        assert_eq!(sandbox.timeout, Duration::from_secs(60));
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
    }
}
