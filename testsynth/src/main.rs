//! Coverage-driven unit test synthesis for a restricted Python subset.
//!
//! `testsynth analyze` prints the branch model of a source file,
//! `testsynth measure` runs an existing test file through the pytest sandbox,
//! and `testsynth generate` drives the oracle until the branch coverage
//! target is reached or the loop gives up.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use testsynth::converge::{ConvergeConfig, ConvergeError, StageEvent, run_convergence};
use testsynth::core::analyzer::{AnalysisError, analyze};
use testsynth::core::state::SynthesisOutcome;
use testsynth::core::types::{BranchKind, BranchModel, SourceUnit};
use testsynth::exit_codes;
use testsynth::io::config::{
    DEFAULT_CONFIG_FILE, OracleBackend, SynthConfig, load_config, write_config,
};
use testsynth::io::oracle::{CodexOracle, FixtureOracle, HttpOracle, Oracle};
use testsynth::io::sandbox::{MeasureRequest, PytestSandbox, Sandbox, SourceInput};
use testsynth::logging;

#[derive(Parser)]
#[command(
    name = "testsynth",
    version,
    about = "Coverage-driven unit test synthesis for a restricted Python subset"
)]
struct Cli {
    /// Config file. A missing file means built-in defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Debug-level logs for testsynth on stderr (unless RUST_LOG is set).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the branch model of a source file.
    Analyze {
        file: PathBuf,
        /// Emit the model as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run a test file against a source file and print the coverage report as JSON.
    Measure {
        source: PathBuf,
        tests: PathBuf,
        /// Module name the tests import (defaults to the source file stem).
        #[arg(long)]
        module_name: Option<String>,
    },
    /// Generate tests until the branch coverage target is reached.
    Generate {
        file: PathBuf,
        /// Module name the tests import (defaults to the file stem).
        #[arg(long)]
        module_name: Option<String>,
        /// Target branch coverage percentage.
        #[arg(long)]
        target: Option<f64>,
        /// Maximum number of optimization rounds.
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long, value_enum)]
        oracle: Option<OracleBackend>,
        /// Scripted responses for the fixture oracle.
        #[arg(long)]
        fixture: Option<PathBuf>,
        /// Write the generated tests here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write the JSON outcome here.
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// Write a default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

struct GenerateArgs {
    file: PathBuf,
    module_name: Option<String>,
    target: Option<f64>,
    max_iterations: Option<u32>,
    oracle: Option<OracleBackend>,
    fixture: Option<PathBuf>,
    out: Option<PathBuf>,
    summary: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Analyze { file, json } => cmd_analyze(&file, json),
        Command::Measure {
            source,
            tests,
            module_name,
        } => cmd_measure(&cli.config, &source, &tests, module_name),
        Command::Generate {
            file,
            module_name,
            target,
            max_iterations,
            oracle,
            fixture,
            out,
            summary,
        } => cmd_generate(
            &cli.config,
            GenerateArgs {
                file,
                module_name,
                target,
                max_iterations,
                oracle,
                fixture,
                out,
                summary,
            },
        ),
        Command::InitConfig { force } => cmd_init_config(&cli.config, force),
    }
}

fn cmd_analyze(file: &Path, json: bool) -> Result<i32> {
    let code = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let model = match analyze(&code) {
        Ok(model) => model,
        Err(AnalysisError::GrammarViolation(violation)) => {
            eprintln!("{}: {violation}", file.display());
            return Ok(exit_codes::GRAMMAR_VIOLATION);
        }
        Err(err) => return Err(err.into()),
    };
    if json {
        println!("{}", to_json(&model)?);
    } else {
        print!("{}", render_model(&model));
    }
    Ok(exit_codes::OK)
}

fn cmd_measure(
    config_path: &Path,
    source: &Path,
    tests: &Path,
    module_name: Option<String>,
) -> Result<i32> {
    let cfg = resolve_config(config_path)?;
    let code = fs::read_to_string(source).with_context(|| format!("read {}", source.display()))?;
    let test_source =
        fs::read_to_string(tests).with_context(|| format!("read {}", tests.display()))?;
    let module_name = module_name_for(source, module_name)?;

    let sandbox = PytestSandbox::new(cfg.sandbox_config(&config_dir(config_path)));
    let report = sandbox.measure(&MeasureRequest {
        source: SourceInput::Inline(&code),
        test_source: &test_source,
        module_name: &module_name,
    });
    println!("{}", to_json(&report)?);
    match &report.error {
        Some(err) => {
            eprintln!("measurement failed: {err}");
            Ok(exit_codes::INVALID)
        }
        None => Ok(exit_codes::OK),
    }
}

fn cmd_generate(config_path: &Path, args: GenerateArgs) -> Result<i32> {
    let mut cfg = resolve_config(config_path)?;
    if let Some(target) = args.target {
        cfg.target_coverage = target;
    }
    if let Some(max_iterations) = args.max_iterations {
        cfg.max_iterations = max_iterations;
    }
    if let Some(backend) = args.oracle {
        cfg.oracle.backend = backend;
    }
    if args.fixture.is_some() {
        cfg.oracle.fixture = args.fixture;
    }
    cfg.validate().context("invalid command-line overrides")?;

    let code = fs::read_to_string(&args.file)
        .with_context(|| format!("read {}", args.file.display()))?;
    let module_name = module_name_for(&args.file, args.module_name)?;
    let unit = SourceUnit::new(code, module_name)?;

    let oracle = build_oracle(&cfg)?;
    let sandbox = PytestSandbox::new(cfg.sandbox_config(&config_dir(config_path)));
    let converge = ConvergeConfig {
        target_coverage_pct: cfg.target_coverage,
        max_iterations: cfg.max_iterations,
        existing_file: None,
    };

    let outcome = match run_convergence(
        &unit,
        oracle.as_ref(),
        &sandbox,
        &cfg.retry_policy(),
        &converge,
        print_progress,
    ) {
        Ok(outcome) => outcome,
        Err(ConvergeError::Grammar(violation)) => {
            eprintln!("{}: {violation}", args.file.display());
            return Ok(exit_codes::GRAMMAR_VIOLATION);
        }
        Err(err) => return Err(err.into()),
    };

    match &args.out {
        Some(path) => write_text(path, &outcome.tests)?,
        None => println!("{}", outcome.tests),
    }
    if let Some(path) = &args.summary {
        let mut payload = to_json(&outcome)?;
        payload.push('\n');
        write_text(path, &payload)?;
    }
    eprintln!("{}", summary_line(&outcome));

    Ok(if outcome.success {
        exit_codes::OK
    } else {
        exit_codes::TARGET_NOT_REACHED
    })
}

fn cmd_init_config(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &SynthConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

/// File config, then environment overrides.
fn resolve_config(path: &Path) -> Result<SynthConfig> {
    let mut cfg = load_config(path)?;
    cfg.apply_env();
    cfg.validate()?;
    Ok(cfg)
}

fn config_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn module_name_for(file: &Path, explicit: Option<String>) -> Result<String> {
    if let Some(name) = explicit {
        return Ok(name);
    }
    file.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("cannot derive a module name from {}", file.display()))
}

fn build_oracle(cfg: &SynthConfig) -> Result<Box<dyn Oracle>> {
    Ok(match cfg.oracle.backend {
        OracleBackend::Fixture => {
            let path = cfg
                .oracle
                .fixture
                .as_deref()
                .context("the fixture oracle needs --fixture or oracle.fixture")?;
            Box::new(FixtureOracle::load(path)?)
        }
        OracleBackend::Codex => Box::new(CodexOracle::new(cfg.codex_config())),
        OracleBackend::Http => Box::new(HttpOracle::new(cfg.http_config())?),
    })
}

fn print_progress(event: &StageEvent) {
    match event {
        StageEvent::Measured {
            iteration,
            branch_coverage_pct,
            statement_coverage_pct,
            tests_passed,
            tests_run,
            error,
        } => {
            eprintln!(
                "[{iteration}] branch {branch_coverage_pct:.1}%  statement {statement_coverage_pct:.1}%  ({tests_passed}/{tests_run} passed)"
            );
            if let Some(err) = error {
                eprintln!("[{iteration}] measurement error: {err}");
            }
        }
        StageEvent::Optimized {
            iteration,
            added_tests,
            error: None,
        } => eprintln!("[{iteration}] optimize: +{added_tests} tests"),
        StageEvent::Optimized {
            iteration,
            error: Some(err),
            ..
        } => eprintln!("[{iteration}] optimize failed: {err}"),
    }
}

fn summary_line(outcome: &SynthesisOutcome) -> String {
    format!(
        "{}: {} tests, branch {:.1}%, statement {:.1}%, {} optimization rounds",
        if outcome.success {
            "target reached"
        } else {
            "target not reached"
        },
        outcome.test_count,
        outcome.branch_coverage_pct,
        outcome.statement_coverage_pct,
        outcome.iterations
    )
}

fn render_model(model: &BranchModel) -> String {
    let mut out = String::new();
    for f in &model.functions {
        let params: Vec<String> = f
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.annotation))
            .collect();
        out.push_str(&format!(
            "{}({}) -> {}  line {}, complexity {}, {} branches\n",
            f.name,
            params.join(", "),
            f.return_type,
            f.start_line,
            f.cyclomatic_complexity,
            f.total_branches
        ));
        for b in &f.branches {
            match (b.kind, &b.condition) {
                (BranchKind::If, Some(cond)) => {
                    out.push_str(&format!("  line {}: if {cond}\n", b.line));
                }
                _ => out.push_str(&format!("  line {}: else\n", b.line)),
            }
        }
    }
    out.push_str(&format!("total branches: {}\n", model.total_branches_in_unit));
    out
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("serialize json")
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use testsynth::test_support::SIMPLE_ADD_SOURCE;

    #[test]
    fn module_name_defaults_to_file_stem() {
        assert_eq!(
            module_name_for(Path::new("demos/simple_math.py"), None).expect("stem"),
            "simple_math"
        );
        assert_eq!(
            module_name_for(Path::new("x.py"), Some("calc".to_string())).expect("explicit"),
            "calc"
        );
    }

    #[test]
    fn rendered_model_lists_branches() {
        let model = analyze(SIMPLE_ADD_SOURCE).expect("analyze");
        let text = render_model(&model);
        assert!(text.starts_with("add(x: Any, y: Any) -> Any  line 1, complexity 2, 1 branches\n"));
        assert!(text.contains("  line 3: if x < 0\n"));
        assert!(text.ends_with("total branches: 1\n"));
    }

    #[test]
    fn config_dir_falls_back_to_cwd() {
        assert_eq!(config_dir(Path::new("testsynth.toml")), PathBuf::from("."));
        assert_eq!(config_dir(Path::new("/a/b.toml")), PathBuf::from("/a"));
    }
}
