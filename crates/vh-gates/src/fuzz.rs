#![forbid(unsafe_code)]

//! Malformed-input fuzz/stress safety gate.
//!
//! Every corpus case is compiled twice in isolated run directories. A case is
//! safe when both runs reject it with a diagnostic, finish within the timeout,
//! are not killed by a signal, and agree with each other.

use crate::report::GateSummary;
use crate::{GateError, GateStatus, Violation, display_path, resolve_path, timeout_from_secs};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use vh_corpus::{CorpusCase, CorpusConfig, CorpusStrategy};
use vh_digest::normalize_newlines;
use vh_replay::{RunRecord, RunSpec, execute};

pub const FUZZ_MODE: &str = "objc3c-fuzz-safety-v1";
pub const FUZZ_SCHEMA_VERSION: &str = "objc3c-fuzz-safety-report.v1";
pub const ITERATION_COUNT: usize = 2;
pub const DEFAULT_TIMEOUT_SEC: f64 = 5.0;
pub const DEFAULT_OUT_ROOT: &str = "tmp/artifacts/objc3c-native/fuzz-safety";
pub const SOURCE_EXTENSION: &str = "objc3";

pub const SAFE_NONZERO_EXIT: &str = "SAFE-001";
pub const SAFE_DIAGNOSTIC_SIGNAL: &str = "SAFE-002";
pub const SAFE_TIMEOUT: &str = "SAFE-003";
pub const SAFE_CRASH_SIGNAL: &str = "SAFE-004";
pub const DET_EXIT_DRIFT: &str = "DET-001";
pub const DET_OUTPUT_DRIFT: &str = "DET-002";

const DIAGNOSTIC_SIGNAL_PATTERN: &str = r"(?i)(error|O3[A-Z]\d{3})";

#[must_use]
pub fn default_compiler_path() -> PathBuf {
    PathBuf::from(format!(
        "artifacts/bin/objc3c-native{}",
        std::env::consts::EXE_SUFFIX
    ))
}

#[derive(Debug, Clone)]
pub struct FuzzConfig {
    pub repo_root: PathBuf,
    pub compiler: PathBuf,
    pub launcher: Option<PathBuf>,
    pub out_root: PathBuf,
    pub timeout_sec: f64,
    pub max_cases: Option<usize>,
    pub generated_at_utc: String,
    pub corpus: CorpusConfig,
}

impl FuzzConfig {
    pub fn validate(&self) -> Result<(), GateError> {
        self.timeout()?;
        if self.max_cases == Some(0) {
            return Err(GateError::invalid("--max-cases must be > 0"));
        }
        let compiler = self.compiler_path();
        if !compiler.is_file() {
            return Err(GateError::invalid(format!(
                "compiler not found: {}",
                display_path(&compiler, &self.repo_root)
            )));
        }
        if let Some(launcher) = self.launcher_path() {
            if !launcher.is_file() {
                return Err(GateError::invalid(format!(
                    "launcher not found: {}",
                    display_path(&launcher, &self.repo_root)
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn compiler_path(&self) -> PathBuf {
        resolve_path(&self.repo_root, &self.compiler)
    }

    #[must_use]
    pub fn launcher_path(&self) -> Option<PathBuf> {
        self.launcher
            .as_deref()
            .map(|launcher| resolve_path(&self.repo_root, launcher))
    }

    #[must_use]
    pub fn out_root_path(&self) -> PathBuf {
        resolve_path(&self.repo_root, &self.out_root)
    }

    /// `[launcher] compiler`, ahead of the per-run arguments.
    #[must_use]
    pub fn compiler_command(&self) -> Vec<String> {
        let mut command = Vec::new();
        if let Some(launcher) = self.launcher_path() {
            command.push(launcher.display().to_string());
        }
        command.push(self.compiler_path().display().to_string());
        command
    }

    fn timeout(&self) -> Result<Duration, GateError> {
        timeout_from_secs(self.timeout_sec)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzConfigBlock {
    pub timeout_sec: f64,
    pub iteration_count: usize,
    pub case_count: usize,
    pub out_root: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseChecks {
    pub nonzero_exit: bool,
    pub diagnostic_signal_present: bool,
    pub timeout_free: bool,
    pub no_crash_signal: bool,
    pub deterministic_exit: bool,
    pub deterministic_output: bool,
}

impl CaseChecks {
    fn from_errors(errors: &[CaseError]) -> Self {
        let clear = |check_id: &str| !errors.iter().any(|error| error.check_id == check_id);
        Self {
            nonzero_exit: clear(SAFE_NONZERO_EXIT),
            diagnostic_signal_present: clear(SAFE_DIAGNOSTIC_SIGNAL),
            timeout_free: clear(SAFE_TIMEOUT),
            no_crash_signal: clear(SAFE_CRASH_SIGNAL),
            deterministic_exit: clear(DET_EXIT_DRIFT),
            deterministic_output: clear(DET_OUTPUT_DRIFT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseError {
    pub check_id: String,
    pub detail: String,
}

impl CaseError {
    fn new(check_id: &str, detail: impl Into<String>) -> Self {
        Self {
            check_id: check_id.to_string(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub subsystem: String,
    pub source_path: String,
    pub run1_exit_code: Option<i32>,
    pub run2_exit_code: Option<i32>,
    pub run1_output_sha256: Option<String>,
    pub run2_output_sha256: Option<String>,
    pub checks: CaseChecks,
    pub errors: Vec<CaseError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzSummary {
    pub mode: String,
    pub schema_version: String,
    pub generated_at_utc: String,
    pub config: FuzzConfigBlock,
    pub corpus_strategy: CorpusStrategy,
    pub status: GateStatus,
    pub violation_count: usize,
    pub violations: Vec<Violation>,
    pub results: Vec<CaseResult>,
}

impl GateSummary for FuzzSummary {
    fn mode(&self) -> &str {
        &self.mode
    }

    fn status(&self) -> GateStatus {
        self.status
    }

    fn violations(&self) -> &[Violation] {
        &self.violations
    }

    fn human_detail_lines(&self) -> Vec<String> {
        vec![format!("case_count: {}", self.config.case_count)]
    }
}

/// What the classifier needs from one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunObservation {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub output_sha256: Option<String>,
    pub combined_output: String,
}

impl From<&RunRecord> for RunObservation {
    fn from(record: &RunRecord) -> Self {
        Self {
            exit_code: record.exit_code,
            timed_out: record.timed_out,
            output_sha256: record.output_sha256.clone(),
            combined_output: normalize_newlines(&record.combined_output()),
        }
    }
}

static DIAGNOSTIC_SIGNAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DIAGNOSTIC_SIGNAL_PATTERN).expect("valid regex"));

#[must_use]
pub fn has_diagnostic_signal(output: &str) -> bool {
    DIAGNOSTIC_SIGNAL.is_match(output)
}

/// Classifies one case from its two runs. Errors come back sorted by
/// `(check_id, detail)`.
#[must_use]
pub fn classify_case(
    run1: &RunObservation,
    run2: &RunObservation,
    timeout_sec: f64,
) -> Vec<CaseError> {
    let runs = [("run1", run1), ("run2", run2)];
    let mut errors = Vec::new();

    for (label, run) in runs {
        if run.timed_out {
            errors.push(CaseError::new(
                SAFE_TIMEOUT,
                format!("timeout at {label} (> {timeout_sec:.3}s)"),
            ));
        }
        match run.exit_code {
            Some(0) => errors.push(CaseError::new(
                SAFE_NONZERO_EXIT,
                format!("{label} returned exit code 0 for malformed corpus case"),
            )),
            Some(code) if code < 0 => errors.push(CaseError::new(
                SAFE_CRASH_SIGNAL,
                format!("{label} terminated by signal ({code})"),
            )),
            _ => {}
        }
        if !run.timed_out && !has_diagnostic_signal(&run.combined_output) {
            errors.push(CaseError::new(
                SAFE_DIAGNOSTIC_SIGNAL,
                format!("{label} missing diagnostic signal token (error/O3*)"),
            ));
        }
    }

    if let (Some(first), Some(second)) = (run1.exit_code, run2.exit_code) {
        if first != second {
            errors.push(CaseError::new(
                DET_EXIT_DRIFT,
                format!("exit code drift run1={first} run2={second}"),
            ));
        }
    }
    if let (Some(first), Some(second)) = (&run1.output_sha256, &run2.output_sha256) {
        if first != second {
            errors.push(CaseError::new(
                DET_OUTPUT_DRIFT,
                "diagnostic output hash drift between run1 and run2",
            ));
        }
    }

    errors.sort();
    errors
}

/// Runs the whole corpus and builds the summary. Evidence lands under the
/// configured out root.
pub fn evaluate_fuzz(config: &FuzzConfig) -> Result<FuzzSummary, GateError> {
    config.validate()?;
    let out_root = config.out_root_path();
    let corpus_config = config.corpus.clone().with_max_cases(config.max_cases);
    let corpus = corpus_config.build();
    let compiler_command = config.compiler_command();

    tracing::info!(
        mode = FUZZ_MODE,
        case_count = corpus.len(),
        out_root = %out_root.display(),
        "starting fuzz-safety gate"
    );
    fs::create_dir_all(&out_root)
        .map_err(|err| GateError::io("failed creating directory", &out_root, err))?;

    let mut results = Vec::with_capacity(corpus.len());
    for case in &corpus {
        results.push(run_case(config, case, &compiler_command, &out_root)?);
    }

    let mut violations = results
        .iter()
        .flat_map(|result| {
            result
                .errors
                .iter()
                .map(|error| Violation::for_case(&error.check_id, &result.case_id, &error.detail))
        })
        .collect::<Vec<_>>();
    violations.sort();
    let status = GateStatus::from_violation_count(violations.len());
    tracing::info!(%status, violation_count = violations.len(), "fuzz-safety gate finished");

    Ok(FuzzSummary {
        mode: FUZZ_MODE.to_string(),
        schema_version: FUZZ_SCHEMA_VERSION.to_string(),
        generated_at_utc: config.generated_at_utc.clone(),
        config: FuzzConfigBlock {
            timeout_sec: config.timeout_sec,
            iteration_count: ITERATION_COUNT,
            case_count: corpus.len(),
            out_root: display_path(&out_root, &config.repo_root),
        },
        corpus_strategy: corpus_config.strategy(),
        status,
        violation_count: violations.len(),
        violations,
        results,
    })
}

fn run_case(
    config: &FuzzConfig,
    case: &CorpusCase,
    compiler_command: &[String],
    out_root: &Path,
) -> Result<CaseResult, GateError> {
    let corpus_dir = out_root.join("corpus");
    let logs_dir = out_root.join("logs");
    let case_root = out_root.join("cases").join(&case.case_id);
    for dir in [&corpus_dir, &logs_dir, &case_root] {
        fs::create_dir_all(dir)
            .map_err(|err| GateError::io("failed creating directory", dir.as_path(), err))?;
    }

    let source_path = corpus_dir.join(format!("{}.{SOURCE_EXTENSION}", case.case_id));
    fs::write(&source_path, case.source.as_bytes())
        .map_err(|err| GateError::io("failed writing corpus case", &source_path, err))?;

    let mut observations = Vec::with_capacity(ITERATION_COUNT);
    for iteration in 1..=ITERATION_COUNT {
        let run_dir = case_root.join(format!("run{iteration}"));
        let mut argv = compiler_command.to_vec();
        argv.extend([
            source_path.display().to_string(),
            "--out-dir".to_string(),
            run_dir.display().to_string(),
            "--emit-prefix".to_string(),
            format!("{}_r{iteration}", case.case_id),
        ]);
        let record = execute(&RunSpec {
            run_id: format!("{}.run{iteration}", case.case_id),
            run_dir,
            workdir: config.repo_root.clone(),
            argv,
            env_overrides: Default::default(),
            timeout: config.timeout()?,
        })?;

        let log_path = logs_dir.join(format!("{}.run{iteration}.log", case.case_id));
        fs::write(&log_path, run_log_text(&record, config.timeout_sec))
            .map_err(|err| GateError::io("failed writing run log", &log_path, err))?;
        observations.push(RunObservation::from(&record));
    }

    let [run1, run2] = observations.as_slice() else {
        return Err(GateError::invalid(format!(
            "expected {ITERATION_COUNT} runs for case {}",
            case.case_id
        )));
    };
    let errors = classify_case(run1, run2, config.timeout_sec);
    if errors.is_empty() {
        tracing::debug!(case_id = %case.case_id, "case safe");
    } else {
        tracing::info!(case_id = %case.case_id, error_count = errors.len(), "case flagged");
    }

    Ok(CaseResult {
        case_id: case.case_id.clone(),
        subsystem: case.subsystem.clone(),
        source_path: display_path(&source_path, &config.repo_root),
        run1_exit_code: run1.exit_code,
        run2_exit_code: run2.exit_code,
        run1_output_sha256: run1.output_sha256.clone(),
        run2_output_sha256: run2.output_sha256.clone(),
        checks: CaseChecks::from_errors(&errors),
        errors,
    })
}

fn run_log_text(record: &RunRecord, timeout_sec: f64) -> String {
    let command = record.command.join(" ");
    match record.exit_code {
        Some(code) if !record.timed_out => format!(
            "command: {command}\nexit_code: {code}\n---stdout---\n{}\n---stderr---\n{}\n",
            normalize_newlines(&record.stdout_text()),
            normalize_newlines(&record.stderr_text()),
        ),
        _ => format!("command: {command}\ntimeout_sec: {timeout_sec}\nstatus: TIMEOUT\n"),
    }
}
