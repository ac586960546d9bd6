#![forbid(unsafe_code)]

//! End-to-end artifact determinism gate.
//!
//! The same command is replayed N times, each run writing into its own
//! directory. Run 1 is the baseline; every later run's artifact digests are
//! diffed against it, never against each other.

use crate::report::GateSummary;
use crate::{
    GateError, GateStatus, Violation, display_path, resolve_path, timeout_from_secs,
    write_summary_json,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vh_digest::ManifestEntry;
use vh_replay::{
    CommandTemplate, DEFAULT_ARTIFACT_GLOB, EnvPlan, RunRecord, RunSpec, TemplateVars,
    collect_artifacts, execute,
};

pub const DETERMINISM_MODE: &str = "objc3c-end-to-end-determinism-v1";
pub const DEFAULT_REPLAY_ROOT: &str = "tmp/artifacts/objc3c-end-to-end-determinism";
pub const DEFAULT_RUN_LABEL: &str = "latest";
pub const DEFAULT_REPLAYS: usize = 2;
pub const DEFAULT_TIMEOUT_SEC: f64 = 300.0;
pub const SUMMARY_FILE_NAME: &str = "summary.json";
pub const MAX_STDIO_PREVIEW_CHARS: usize = 2000;
pub const HUMAN_MISMATCH_LIMIT: usize = 40;
const GATE_BINARY: &str = "check_end_to_end_determinism";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MismatchKind {
    CommandExitNonzero,
    CommandTimeout,
    BaselineMissingArtifacts,
    ReplayMissingArtifacts,
    ArtifactMissing,
    ArtifactUnexpected,
    ArtifactDigestMismatch,
}

impl MismatchKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CommandExitNonzero => "command-exit-nonzero",
            Self::CommandTimeout => "command-timeout",
            Self::BaselineMissingArtifacts => "baseline-missing-artifacts",
            Self::ReplayMissingArtifacts => "replay-missing-artifacts",
            Self::ArtifactMissing => "artifact-missing",
            Self::ArtifactUnexpected => "artifact-unexpected",
            Self::ArtifactDigestMismatch => "artifact-digest-mismatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub kind: MismatchKind,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub replay_command: String,
}

impl Mismatch {
    fn new(kind: MismatchKind, run_id: &str, replay_command: &str) -> Self {
        Self {
            kind,
            run_id: run_id.to_string(),
            path: None,
            baseline_sha256: None,
            replay_sha256: None,
            exit_code: None,
            message: None,
            replay_command: replay_command.to_string(),
        }
    }

    fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn detail(&self) -> String {
        match self.kind {
            MismatchKind::CommandExitNonzero => match self.exit_code {
                Some(code) => format!("command exited with code {code}"),
                None => "command exited with a nonzero code".to_string(),
            },
            MismatchKind::ArtifactMissing => format!(
                "baseline artifact missing from replay: {}",
                self.path.as_deref().unwrap_or("")
            ),
            MismatchKind::ArtifactUnexpected => format!(
                "replay produced artifact absent from baseline: {}",
                self.path.as_deref().unwrap_or("")
            ),
            MismatchKind::ArtifactDigestMismatch => format!(
                "{} baseline={} replay={}",
                self.path.as_deref().unwrap_or(""),
                self.baseline_sha256.as_deref().unwrap_or(""),
                self.replay_sha256.as_deref().unwrap_or("")
            ),
            MismatchKind::CommandTimeout
            | MismatchKind::BaselineMissingArtifacts
            | MismatchKind::ReplayMissingArtifacts => {
                self.message.clone().unwrap_or_else(|| self.kind.as_str().to_string())
            }
        }
    }

    #[must_use]
    pub fn to_violation(&self) -> Violation {
        Violation::scoped(self.kind.as_str(), &self.run_id, self.detail())
    }
}

/// Digest evidence of one run, as consumed by [`compare_runs`]. `digests` is
/// `None` when the run produced no evidence (nonzero exit or timeout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDigests {
    pub run_id: String,
    pub digests: Option<BTreeMap<String, String>>,
}

/// Diffs every run after the first against the first.
#[must_use]
pub fn compare_runs(runs: &[RunDigests], replay_command: &str) -> Vec<Mismatch> {
    let Some((baseline, replays)) = runs.split_first() else {
        return Vec::new();
    };
    let Some(baseline_digests) = &baseline.digests else {
        return vec![
            Mismatch::new(
                MismatchKind::BaselineMissingArtifacts,
                &baseline.run_id,
                replay_command,
            )
            .with_message("baseline run did not produce artifact digest evidence"),
        ];
    };
    let baseline_paths = baseline_digests.keys().collect::<BTreeSet<_>>();

    let mut mismatches = Vec::new();
    for replay in replays {
        let Some(replay_digests) = &replay.digests else {
            mismatches.push(
                Mismatch::new(
                    MismatchKind::ReplayMissingArtifacts,
                    &replay.run_id,
                    replay_command,
                )
                .with_message("replay run did not produce artifact digest evidence"),
            );
            continue;
        };
        let replay_paths = replay_digests.keys().collect::<BTreeSet<_>>();

        for path in baseline_paths.difference(&replay_paths) {
            mismatches.push(
                Mismatch::new(MismatchKind::ArtifactMissing, &replay.run_id, replay_command)
                    .with_path(path),
            );
        }
        for path in replay_paths.difference(&baseline_paths) {
            mismatches.push(
                Mismatch::new(MismatchKind::ArtifactUnexpected, &replay.run_id, replay_command)
                    .with_path(path),
            );
        }
        for path in baseline_paths.intersection(&replay_paths) {
            let base_sha = &baseline_digests[*path];
            let replay_sha = &replay_digests[*path];
            if base_sha != replay_sha {
                let mut mismatch = Mismatch::new(
                    MismatchKind::ArtifactDigestMismatch,
                    &replay.run_id,
                    replay_command,
                )
                .with_path(path);
                mismatch.baseline_sha256 = Some(base_sha.clone());
                mismatch.replay_sha256 = Some(replay_sha.clone());
                mismatches.push(mismatch);
            }
        }
    }
    mismatches
}

#[derive(Debug, Clone)]
pub struct DeterminismConfig {
    pub repo_root: PathBuf,
    pub workdir: PathBuf,
    pub replay_root: PathBuf,
    pub run_label: String,
    pub replays: usize,
    pub artifact_globs: Vec<String>,
    pub summary_json: Option<PathBuf>,
    pub timeout_sec: f64,
    pub env_args: Vec<String>,
    pub variant_env_args: Vec<String>,
    pub env: EnvPlan,
    pub command: CommandTemplate,
}

impl DeterminismConfig {
    pub fn validate(&self) -> Result<(), GateError> {
        if self.replays < 2 {
            return Err(GateError::invalid("--replays must be >= 2"));
        }
        if self.run_label.is_empty() {
            return Err(GateError::invalid("--run-label must be non-empty"));
        }
        if self.run_label.contains(['/', '\\'])
            || matches!(self.run_label.as_str(), "." | "..")
        {
            return Err(GateError::invalid(format!(
                "--run-label must be a single path segment, got {:?}",
                self.run_label
            )));
        }
        self.timeout()?;
        if let Some(empty) = self.artifact_globs.iter().find(|glob| glob.trim().is_empty()) {
            return Err(GateError::invalid(format!(
                "--artifact-glob must be non-empty, got {empty:?}"
            )));
        }
        let workdir = self.workdir_path();
        if !workdir.is_dir() {
            return Err(GateError::invalid(format!(
                "workdir not found: {}",
                display_path(&workdir, &self.repo_root)
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn effective_globs(&self) -> Vec<String> {
        if self.artifact_globs.is_empty() {
            vec![DEFAULT_ARTIFACT_GLOB.to_string()]
        } else {
            self.artifact_globs.clone()
        }
    }

    #[must_use]
    pub fn workdir_path(&self) -> PathBuf {
        resolve_path(&self.repo_root, &self.workdir)
    }

    #[must_use]
    pub fn replay_root_path(&self) -> PathBuf {
        resolve_path(&self.repo_root, &self.replay_root)
    }

    #[must_use]
    pub fn session_dir(&self) -> PathBuf {
        self.replay_root_path().join(&self.run_label)
    }

    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        match &self.summary_json {
            Some(path) => resolve_path(&self.repo_root, path),
            None => self.session_dir().join(SUMMARY_FILE_NAME),
        }
    }

    /// Shell-quoted command line that reruns this gate with the same layout.
    #[must_use]
    pub fn replay_command(&self) -> String {
        let mut tokens = vec![
            GATE_BINARY.to_string(),
            "--repo-root".to_string(),
            self.repo_root.display().to_string(),
            "--replays".to_string(),
            self.replays.to_string(),
            "--replay-root".to_string(),
            display_path(&self.replay_root_path(), &self.repo_root),
            "--run-label".to_string(),
            self.run_label.clone(),
        ];
        let workdir = self.workdir_path();
        if workdir != self.repo_root {
            tokens.extend([
                "--workdir".to_string(),
                display_path(&workdir, &self.repo_root),
            ]);
        }
        if self.timeout_sec != DEFAULT_TIMEOUT_SEC {
            tokens.extend(["--timeout-sec".to_string(), self.timeout_sec.to_string()]);
        }
        if self.summary_json.is_some() {
            tokens.extend([
                "--summary-json".to_string(),
                display_path(&self.summary_path(), &self.repo_root),
            ]);
        }
        for glob in &self.artifact_globs {
            tokens.extend(["--artifact-glob".to_string(), glob.clone()]);
        }
        for entry in &self.env_args {
            tokens.extend(["--env".to_string(), entry.clone()]);
        }
        for entry in &self.variant_env_args {
            tokens.extend(["--variant-env".to_string(), entry.clone()]);
        }
        tokens.push("--".to_string());
        tokens.extend(self.command.tokens().iter().cloned());
        shell_join(&tokens)
    }

    fn timeout(&self) -> Result<Duration, GateError> {
        timeout_from_secs(self.timeout_sec)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePreview {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRun {
    pub run_id: String,
    pub run_dir: String,
    pub command: Vec<String>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub env_overrides: BTreeMap<String, String>,
    pub stdout_sha256: String,
    pub stderr_sha256: String,
    pub stdout_bytes: usize,
    pub stderr_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_preview: Option<FailurePreview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<ManifestEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_sha256: Option<String>,
}

impl ReplayRun {
    fn from_record(record: &RunRecord, repo_root: &Path) -> Self {
        let failure_preview = (!record.succeeded()).then(|| FailurePreview {
            stdout: preview(&record.stdout_text()),
            stderr: preview(&record.stderr_text()),
        });
        let artifacts = record.artifacts.as_ref();
        Self {
            run_id: record.run_id.clone(),
            run_dir: display_path(&record.run_dir, repo_root),
            command: record.command.clone(),
            exit_code: record.exit_code,
            timed_out: record.timed_out,
            env_overrides: record.env_overrides.clone(),
            stdout_sha256: record.stdout_sha256(),
            stderr_sha256: record.stderr_sha256(),
            stdout_bytes: record.stdout.len(),
            stderr_bytes: record.stderr.len(),
            failure_preview,
            artifacts: artifacts.map(|set| set.entries.clone()),
            artifact_count: artifacts.map(|set| set.len()),
            corpus_sha256: artifacts.map(|set| set.corpus_sha256.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBlock {
    pub workdir: String,
    pub replay_root: String,
    pub run_label: String,
    pub session_dir: String,
    pub summary_json: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeterminismConfigBlock {
    pub replays: usize,
    pub artifact_globs: Vec<String>,
    pub command_template: Vec<String>,
    pub timeout_sec: f64,
    pub session: SessionBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeterminismSummary {
    pub mode: String,
    pub config: DeterminismConfigBlock,
    pub status: GateStatus,
    pub violation_count: usize,
    pub violations: Vec<Violation>,
    pub runs: Vec<ReplayRun>,
    pub mismatches: Vec<Mismatch>,
    pub replay_command: String,
}

impl GateSummary for DeterminismSummary {
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
        let artifact_count = self
            .runs
            .first()
            .and_then(|run| run.artifact_count)
            .unwrap_or(0);
        vec![
            format!("replays: {}", self.config.replays),
            format!("artifact_count: {artifact_count}"),
            format!("summary_json: {}", self.config.session.summary_json),
        ]
    }

    fn human_footer_lines(&self) -> Vec<String> {
        vec![
            format!("replay_command: {}", self.replay_command),
            format!("digest_evidence: {}", self.config.session.summary_json),
        ]
    }

    fn human_violation_limit(&self) -> usize {
        HUMAN_MISMATCH_LIMIT
    }
}

/// Replays the command, compares artifacts, and always writes `summary.json`.
///
/// A completed baseline that matched no artifacts is a configuration error:
/// nothing would be compared.
pub fn evaluate_determinism(config: &DeterminismConfig) -> Result<DeterminismSummary, GateError> {
    config.validate()?;
    let globs = config.effective_globs();
    let workdir = config.workdir_path();
    let session_dir = config.session_dir();
    let summary_path = config.summary_path();
    let replay_command = config.replay_command();

    tracing::info!(
        mode = DETERMINISM_MODE,
        replays = config.replays,
        session_dir = %session_dir.display(),
        "starting end-to-end determinism gate"
    );
    fs::create_dir_all(&session_dir)
        .map_err(|err| GateError::io("failed creating directory", &session_dir, err))?;

    let mut records = Vec::with_capacity(config.replays);
    let mut failures = Vec::new();
    for index in 0..config.replays {
        let run_id = format!("run{:02}", index + 1);
        let run_dir = session_dir.join(&run_id);
        if run_dir.exists() {
            fs::remove_dir_all(&run_dir)
                .map_err(|err| GateError::io("failed clearing run directory", &run_dir, err))?;
        }
        let argv = config.command.expand(&TemplateVars {
            repo_root: &config.repo_root,
            run_dir: &run_dir,
            run_id: &run_id,
            source: None,
        });
        let mut record = execute(&RunSpec {
            run_id: run_id.clone(),
            run_dir: run_dir.clone(),
            workdir: workdir.clone(),
            argv,
            env_overrides: config.env.overrides_for(index),
            timeout: config.timeout()?,
        })?;

        if record.timed_out {
            failures.push(
                Mismatch::new(MismatchKind::CommandTimeout, &run_id, &replay_command)
                    .with_message(format!(
                        "command did not finish within {:.3}s",
                        config.timeout_sec
                    )),
            );
        } else if !record.succeeded() {
            let mut mismatch =
                Mismatch::new(MismatchKind::CommandExitNonzero, &run_id, &replay_command);
            mismatch.exit_code = record.exit_code;
            failures.push(mismatch);
        } else {
            let artifacts = collect_artifacts(&run_dir, &globs)?;
            if index == 0 {
                artifacts.ensure_non_empty(&run_dir, &globs)?;
            }
            record = record.with_artifacts(artifacts);
        }
        tracing::debug!(
            run_id = %run_id,
            exit_code = ?record.exit_code,
            artifact_count = record.artifacts.as_ref().map_or(0, |set| set.len()),
            "replay run recorded"
        );
        records.push(record);
    }

    let digests = records
        .iter()
        .map(|record| RunDigests {
            run_id: record.run_id.clone(),
            digests: record.digest_by_path(),
        })
        .collect::<Vec<_>>();
    failures.extend(compare_runs(&digests, &replay_command));

    let mut violations = failures.iter().map(Mismatch::to_violation).collect::<Vec<_>>();
    violations.sort();
    let status = GateStatus::from_violation_count(violations.len());
    tracing::info!(%status, mismatch_count = failures.len(), "end-to-end determinism gate finished");

    let repo_root = &config.repo_root;
    let summary = DeterminismSummary {
        mode: DETERMINISM_MODE.to_string(),
        config: DeterminismConfigBlock {
            replays: config.replays,
            artifact_globs: globs,
            command_template: config.command.tokens().to_vec(),
            timeout_sec: config.timeout_sec,
            session: SessionBlock {
                workdir: display_path(&workdir, repo_root),
                replay_root: display_path(&config.replay_root_path(), repo_root),
                run_label: config.run_label.clone(),
                session_dir: display_path(&session_dir, repo_root),
                summary_json: display_path(&summary_path, repo_root),
            },
        },
        status,
        violation_count: violations.len(),
        violations,
        runs: records
            .iter()
            .map(|record| ReplayRun::from_record(record, repo_root))
            .collect(),
        mismatches: failures,
        replay_command,
    };
    write_summary_json(&summary, &summary_path)?;
    Ok(summary)
}

fn preview(text: &str) -> String {
    text.chars().take(MAX_STDIO_PREVIEW_CHARS).collect()
}

/// POSIX shell quoting: safe tokens pass through, everything else is wrapped
/// in single quotes.
#[must_use]
pub fn shell_join(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|token| shell_quote(token))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(token: &str) -> String {
    let safe = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c));
    if safe {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r#"'"'"'"#))
    }
}
