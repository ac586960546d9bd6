#![forbid(unsafe_code)]

//! Performance and determinism telemetry guard.
//!
//! Telemetry JSON is decoded into a [`TelemetryRecord`]; every field that fails
//! to decode becomes a `TEL-*` violation, and the surviving values are checked
//! against the profile limits for `PERF-*` and `DET-*` findings. Only I/O and
//! top-level JSON problems are errors.

use crate::report::{GateSummary, fixed6, round6};
use crate::{GateError, GateStatus, Violation, display_path, resolve_path, write_summary_json};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use vh_digest::is_sha256_hex;

pub const PERF_MODE: &str = "objc3c-refactor-perf-guard-v1";
pub const TELEMETRY_SCHEMA_VERSION: &str = "objc3c-refactor-perf-telemetry.v1";
pub const TELEMETRY_ENV: &str = "VH_PERF_TELEMETRY";
pub const DEFAULT_STRICT_TELEMETRY: &str = "tmp/refactor_perf_guard_validation.json";
pub const DEFAULT_STRICT_EVIDENCE: &str = "tmp/artifacts/refactor_perf_guard/strict_summary.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerfProfile {
    Default,
    Strict,
}

impl PerfProfile {
    #[must_use]
    pub const fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }

    #[must_use]
    pub const fn base_limits(self) -> PerfLimits {
        match self {
            Self::Default => PerfLimits {
                max_regression_pct: 10.0,
                max_jitter_ms: 8.0,
                max_memory_regression_pct: 10.0,
            },
            Self::Strict => PerfLimits {
                max_regression_pct: 5.0,
                max_jitter_ms: 4.0,
                max_memory_regression_pct: 5.0,
            },
        }
    }
}

impl fmt::Display for PerfProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::Strict => "strict",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerfLimits {
    pub max_regression_pct: f64,
    pub max_jitter_ms: f64,
    pub max_memory_regression_pct: f64,
}

impl PerfLimits {
    /// Applies explicit overrides on top of the profile's limits. Strict mode
    /// only accepts overrides that tighten.
    pub fn resolve(
        profile: PerfProfile,
        max_regression_pct: Option<f64>,
        max_jitter_ms: Option<f64>,
        max_memory_regression_pct: Option<f64>,
    ) -> Result<Self, GateError> {
        let base = profile.base_limits();
        Ok(Self {
            max_regression_pct: resolve_limit(
                profile,
                max_regression_pct,
                base.max_regression_pct,
                "--max-regression-pct",
            )?,
            max_jitter_ms: resolve_limit(profile, max_jitter_ms, base.max_jitter_ms, "--max-jitter-ms")?,
            max_memory_regression_pct: resolve_limit(
                profile,
                max_memory_regression_pct,
                base.max_memory_regression_pct,
                "--max-memory-regression-pct",
            )?,
        })
    }
}

fn resolve_limit(
    profile: PerfProfile,
    explicit: Option<f64>,
    profile_value: f64,
    option_name: &str,
) -> Result<f64, GateError> {
    let resolved = explicit.unwrap_or(profile_value);
    if !resolved.is_finite() || resolved <= 0.0 {
        return Err(GateError::invalid(format!("{option_name} must be > 0")));
    }
    if profile.is_strict() && resolved > profile_value {
        return Err(GateError::invalid(format!(
            "{option_name} must be <= {} in --strict mode",
            fixed6(profile_value)
        )));
    }
    Ok(resolved)
}

/// Raw command-line choices before profile defaults are applied.
#[derive(Debug, Clone, Default)]
pub struct PerfGuardArgs {
    pub telemetry: Option<PathBuf>,
    pub strict: bool,
    pub max_regression_pct: Option<f64>,
    pub max_jitter_ms: Option<f64>,
    pub max_memory_regression_pct: Option<f64>,
    pub contract_mode: bool,
    pub evidence_output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PerfGuardConfig {
    pub repo_root: PathBuf,
    pub profile: PerfProfile,
    pub limits: PerfLimits,
    pub telemetry: PathBuf,
    pub contract_mode: bool,
    pub evidence_output: Option<PathBuf>,
}

impl PerfGuardConfig {
    /// `telemetry_env` is the value of `VH_PERF_TELEMETRY`, consulted only in
    /// strict mode when no explicit path was given.
    pub fn resolve(
        repo_root: PathBuf,
        args: PerfGuardArgs,
        telemetry_env: Option<String>,
    ) -> Result<Self, GateError> {
        let profile = if args.strict {
            PerfProfile::Strict
        } else {
            PerfProfile::Default
        };
        let limits = PerfLimits::resolve(
            profile,
            args.max_regression_pct,
            args.max_jitter_ms,
            args.max_memory_regression_pct,
        )?;

        let telemetry = match args.telemetry {
            Some(path) => path,
            None if profile.is_strict() => telemetry_env
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map_or_else(|| PathBuf::from(DEFAULT_STRICT_TELEMETRY), PathBuf::from),
            None => {
                return Err(GateError::invalid(
                    "--telemetry is required unless --strict is set",
                ));
            }
        };
        let evidence_output = args
            .evidence_output
            .or_else(|| profile.is_strict().then(|| PathBuf::from(DEFAULT_STRICT_EVIDENCE)));

        Ok(Self {
            repo_root,
            profile,
            limits,
            telemetry,
            contract_mode: args.contract_mode || profile.is_strict(),
            evidence_output,
        })
    }

    #[must_use]
    pub fn telemetry_path(&self) -> PathBuf {
        resolve_path(&self.repo_root, &self.telemetry)
    }

    #[must_use]
    pub fn evidence_output_path(&self) -> Option<PathBuf> {
        self.evidence_output
            .as_deref()
            .map(|path| resolve_path(&self.repo_root, path))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunTelemetry {
    pub elapsed_ms: Option<f64>,
    pub peak_rss_mb: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeterminismTelemetry {
    pub run_a_elapsed_ms: Option<f64>,
    pub run_b_elapsed_ms: Option<f64>,
    pub run_a_artifact_sha256: Option<String>,
    pub run_b_artifact_sha256: Option<String>,
    pub run_b_cache_hit: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub fixture: String,
    pub baseline_elapsed_ms: f64,
    pub candidate_elapsed_ms: f64,
}

/// The validated view of a telemetry document. Absent or invalid values are
/// `None`, and only well-formed sample rows are kept.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetryRecord {
    pub baseline: Option<RunTelemetry>,
    pub candidate: Option<RunTelemetry>,
    pub determinism: Option<DeterminismTelemetry>,
    pub samples: Vec<TelemetrySample>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Observed {
    pub sample_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_elapsed_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_elapsed_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_allowed_elapsed_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_regression_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worst_fixture_regression_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub determinism_jitter_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_peak_rss_mb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_peak_rss_mb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_allowed_peak_rss_mb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_regression_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfConfigBlock {
    pub profile: PerfProfile,
    pub strict_mode: bool,
    pub contract_mode: bool,
    pub telemetry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_output: Option<String>,
    pub limits: PerfLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfSummary {
    pub mode: String,
    pub config: PerfConfigBlock,
    pub status: GateStatus,
    pub violation_count: usize,
    pub violations: Vec<Violation>,
    pub observed: Observed,
}

impl GateSummary for PerfSummary {
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
        let mut lines = vec![format!("profile: {}", self.config.profile)];
        if self.status == GateStatus::Pass {
            let metric = |value: Option<f64>| value.map_or_else(|| "n/a".to_string(), |v| format!("{v:?}"));
            lines.extend([
                format!("telemetry: {}", self.config.telemetry),
                format!(
                    "overall_regression_pct: {}",
                    metric(self.observed.overall_regression_pct)
                ),
                format!(
                    "worst_fixture_regression_pct: {}",
                    metric(self.observed.worst_fixture_regression_pct)
                ),
                format!(
                    "memory_regression_pct: {}",
                    metric(self.observed.memory_regression_pct)
                ),
                format!(
                    "determinism_jitter_ms: {}",
                    metric(self.observed.determinism_jitter_ms)
                ),
                format!(
                    "evidence_output: {}",
                    self.config.evidence_output.as_deref().unwrap_or("n/a")
                ),
            ]);
        }
        lines
    }

    fn human_footer_lines(&self) -> Vec<String> {
        self.config
            .evidence_output
            .iter()
            .map(|path| format!("evidence_output: {path}"))
            .collect()
    }
}

/// Reads the telemetry file and checks that its root is a JSON object.
pub fn load_telemetry(path: &Path, repo_root: &Path) -> Result<Map<String, Value>, GateError> {
    let shown = display_path(path, repo_root);
    if !path.exists() {
        return Err(GateError::invalid(format!("telemetry file not found: {shown}")));
    }
    if !path.is_file() {
        return Err(GateError::invalid(format!(
            "telemetry path is not a file: {shown}"
        )));
    }
    let bytes = fs::read(path).map_err(|err| GateError::io("failed reading telemetry", path, err))?;
    let raw = String::from_utf8(bytes)
        .map_err(|_| GateError::invalid(format!("telemetry file is not valid UTF-8: {shown}")))?;
    let payload: Value = serde_json::from_str(&raw).map_err(|err| {
        GateError::invalid(format!("telemetry file is not valid JSON: {shown} ({err})"))
    })?;
    match payload {
        Value::Object(map) => Ok(map),
        _ => Err(GateError::invalid(format!(
            "telemetry root must be an object: {shown}"
        ))),
    }
}

fn positive_number(value: Option<&Value>) -> Option<f64> {
    let parsed = value?.as_f64()?;
    (parsed.is_finite() && parsed > 0.0).then_some(parsed)
}

fn sha256_field(value: Option<&Value>) -> Option<String> {
    value?
        .as_str()
        .filter(|text| is_sha256_hex(text))
        .map(str::to_string)
}

fn canonical_fixture(value: Option<&Value>) -> Option<String> {
    let text = value?.as_str()?;
    let canonical = !text.is_empty() && text.trim() == text && !text.contains('\\');
    canonical.then(|| text.to_string())
}

fn object_field<'a>(
    parent: &'a Map<String, Value>,
    key: &str,
    label: &str,
    check_id: &str,
    violations: &mut Vec<Violation>,
) -> Option<&'a Map<String, Value>> {
    let found = parent.get(key).and_then(Value::as_object);
    if found.is_none() {
        violations.push(Violation::new(check_id, format!("{label} must be an object")));
    }
    found
}

fn decode_run(
    block: &Map<String, Value>,
    label: &str,
    elapsed_check: &str,
    rss_check: &str,
    strict: bool,
    violations: &mut Vec<Violation>,
) -> RunTelemetry {
    let elapsed_ms = positive_number(block.get("elapsed_ms"));
    if elapsed_ms.is_none() {
        violations.push(Violation::new(
            elapsed_check,
            format!("telemetry.{label}.elapsed_ms must be a positive number"),
        ));
    }
    let peak_rss_mb = positive_number(block.get("peak_rss_mb"));
    if strict && peak_rss_mb.is_none() {
        violations.push(Violation::new(
            rss_check,
            format!("telemetry.{label}.peak_rss_mb must be a positive number in strict mode"),
        ));
    }
    RunTelemetry {
        elapsed_ms,
        peak_rss_mb,
    }
}

fn decode_determinism(
    block: &Map<String, Value>,
    violations: &mut Vec<Violation>,
) -> DeterminismTelemetry {
    let prefix = "telemetry.candidate.determinism";
    let decoded = DeterminismTelemetry {
        run_a_elapsed_ms: positive_number(block.get("run_a_elapsed_ms")),
        run_b_elapsed_ms: positive_number(block.get("run_b_elapsed_ms")),
        run_a_artifact_sha256: sha256_field(block.get("run_a_artifact_sha256")),
        run_b_artifact_sha256: sha256_field(block.get("run_b_artifact_sha256")),
        run_b_cache_hit: block.get("run_b_cache_hit").and_then(Value::as_bool),
    };
    let missing = [
        (decoded.run_a_elapsed_ms.is_none(), "TEL-008", "run_a_elapsed_ms must be a positive number"),
        (decoded.run_b_elapsed_ms.is_none(), "TEL-009", "run_b_elapsed_ms must be a positive number"),
        (decoded.run_a_artifact_sha256.is_none(), "TEL-010", "run_a_artifact_sha256 must be lowercase sha256"),
        (decoded.run_b_artifact_sha256.is_none(), "TEL-011", "run_b_artifact_sha256 must be lowercase sha256"),
        (decoded.run_b_cache_hit.is_none(), "TEL-012", "run_b_cache_hit must be boolean"),
    ];
    for (absent, check_id, message) in missing {
        if absent {
            violations.push(Violation::new(check_id, format!("{prefix}.{message}")));
        }
    }
    decoded
}

fn decode_samples(value: Option<&Value>, violations: &mut Vec<Violation>) -> Vec<TelemetrySample> {
    let rows = match value.and_then(Value::as_array) {
        Some(rows) if !rows.is_empty() => rows,
        _ => {
            violations.push(Violation::new(
                "TEL-004",
                "telemetry.samples must be a non-empty list",
            ));
            return Vec::new();
        }
    };

    let mut samples = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let Some(row) = row.as_object() else {
            violations.push(Violation::new(
                "TEL-013",
                format!("telemetry.samples[{index}] must be an object"),
            ));
            continue;
        };
        let Some(fixture) = canonical_fixture(row.get("fixture")) else {
            violations.push(Violation::new(
                "TEL-014",
                format!("telemetry.samples[{index}].fixture must be a canonical fixture path"),
            ));
            continue;
        };
        let Some(baseline_elapsed_ms) = positive_number(row.get("baseline_elapsed_ms")) else {
            violations.push(Violation::new(
                "TEL-015",
                format!("telemetry.samples[{index}].baseline_elapsed_ms must be a positive number"),
            ));
            continue;
        };
        let Some(candidate_elapsed_ms) = positive_number(row.get("candidate_elapsed_ms")) else {
            violations.push(Violation::new(
                "TEL-016",
                format!("telemetry.samples[{index}].candidate_elapsed_ms must be a positive number"),
            ));
            continue;
        };
        samples.push(TelemetrySample {
            fixture,
            baseline_elapsed_ms,
            candidate_elapsed_ms,
        });
    }

    let fixtures = samples.iter().map(|s| s.fixture.as_str()).collect::<Vec<_>>();
    if fixtures.windows(2).any(|pair| pair[0] > pair[1]) {
        violations.push(Violation::new(
            "TEL-017",
            "telemetry.samples fixtures must be sorted lexicographically",
        ));
    }
    let unique = fixtures.iter().collect::<std::collections::BTreeSet<_>>();
    if unique.len() != fixtures.len() {
        violations.push(Violation::new(
            "TEL-018",
            "telemetry.samples fixtures must be unique",
        ));
    }
    samples
}

/// Decodes a telemetry document. Decode failures are returned as violations,
/// not errors.
#[must_use]
pub fn decode_telemetry(
    payload: &Map<String, Value>,
    strict: bool,
) -> (TelemetryRecord, Vec<Violation>) {
    let mut violations = Vec::new();

    let schema = payload.get("schema_version");
    if schema.and_then(Value::as_str) != Some(TELEMETRY_SCHEMA_VERSION) {
        let observed = schema.map_or_else(|| "null".to_string(), Value::to_string);
        violations.push(Violation::new(
            "TEL-001",
            format!(
                "telemetry.schema_version drift: expected={TELEMETRY_SCHEMA_VERSION:?} observed={observed}"
            ),
        ));
    }

    let baseline_block = object_field(payload, "baseline", "telemetry.baseline", "TEL-002", &mut violations);
    let candidate_block = object_field(payload, "candidate", "telemetry.candidate", "TEL-003", &mut violations);
    let samples = decode_samples(payload.get("samples"), &mut violations);

    let baseline = baseline_block
        .map(|block| decode_run(block, "baseline", "TEL-005", "TEL-019", strict, &mut violations));
    let candidate = candidate_block
        .map(|block| decode_run(block, "candidate", "TEL-006", "TEL-020", strict, &mut violations));
    let determinism_block = candidate_block.and_then(|block| {
        object_field(
            block,
            "determinism",
            "telemetry.candidate.determinism",
            "TEL-007",
            &mut violations,
        )
    });
    let determinism = determinism_block.map(|block| decode_determinism(block, &mut violations));

    (
        TelemetryRecord {
            baseline,
            candidate,
            determinism,
            samples,
        },
        violations,
    )
}

fn ceiling(baseline: f64, pct: f64) -> f64 {
    baseline * (1.0 + pct / 100.0)
}

fn regression_pct(baseline: f64, candidate: f64) -> f64 {
    (candidate - baseline) / baseline * 100.0
}

/// Applies the regression and determinism rules to a decoded record.
#[must_use]
pub fn check_record(record: &TelemetryRecord, limits: &PerfLimits) -> (Observed, Vec<Violation>) {
    let mut violations = Vec::new();
    let mut observed = Observed {
        sample_count: record.samples.len(),
        ..Observed::default()
    };

    let baseline = record.baseline.unwrap_or_default();
    let candidate = record.candidate.unwrap_or_default();
    observed.baseline_elapsed_ms = baseline.elapsed_ms.map(round6);
    observed.candidate_elapsed_ms = candidate.elapsed_ms.map(round6);
    observed.baseline_peak_rss_mb = baseline.peak_rss_mb.map(round6);
    observed.candidate_peak_rss_mb = candidate.peak_rss_mb.map(round6);

    if let (Some(base), Some(cand)) = (baseline.elapsed_ms, candidate.elapsed_ms) {
        let allowed = ceiling(base, limits.max_regression_pct);
        observed.max_allowed_elapsed_ms = Some(round6(allowed));
        observed.overall_regression_pct = Some(round6(regression_pct(base, cand)));
        if cand > allowed {
            violations.push(Violation::new(
                "PERF-001",
                format!(
                    "overall elapsed regression exceeds limit: candidate={}ms allowed={}ms limit_pct={}",
                    fixed6(cand),
                    fixed6(allowed),
                    fixed6(limits.max_regression_pct)
                ),
            ));
        }
    }

    if let (Some(base), Some(cand)) = (baseline.peak_rss_mb, candidate.peak_rss_mb) {
        let allowed = ceiling(base, limits.max_memory_regression_pct);
        observed.max_allowed_peak_rss_mb = Some(round6(allowed));
        observed.memory_regression_pct = Some(round6(regression_pct(base, cand)));
        if cand > allowed {
            violations.push(Violation::new(
                "PERF-003",
                format!(
                    "candidate peak_rss regression exceeds limit: candidate={}MB allowed={}MB limit_pct={}",
                    fixed6(cand),
                    fixed6(allowed),
                    fixed6(limits.max_memory_regression_pct)
                ),
            ));
        }
    }

    if let Some(determinism) = &record.determinism {
        if let (Some(a), Some(b)) = (
            &determinism.run_a_artifact_sha256,
            &determinism.run_b_artifact_sha256,
        ) {
            if a != b {
                violations.push(Violation::new(
                    "DET-001",
                    "artifact hash drift between determinism run_a and run_b",
                ));
            }
        }
        if determinism.run_b_cache_hit == Some(false) {
            violations.push(Violation::new(
                "DET-002",
                "determinism run_b must report cache_hit=true",
            ));
        }
        if let (Some(a), Some(b)) = (determinism.run_a_elapsed_ms, determinism.run_b_elapsed_ms) {
            let jitter = (a - b).abs();
            observed.determinism_jitter_ms = Some(round6(jitter));
            if jitter > limits.max_jitter_ms {
                violations.push(Violation::new(
                    "DET-003",
                    format!(
                        "determinism jitter exceeds limit: jitter_ms={} max_jitter_ms={}",
                        fixed6(jitter),
                        fixed6(limits.max_jitter_ms)
                    ),
                ));
            }
        }
    }

    let mut worst: Option<f64> = None;
    for sample in &record.samples {
        let pct = regression_pct(sample.baseline_elapsed_ms, sample.candidate_elapsed_ms);
        worst = Some(worst.map_or(pct, |current| current.max(pct)));
        let allowed = ceiling(sample.baseline_elapsed_ms, limits.max_regression_pct);
        if sample.candidate_elapsed_ms > allowed {
            violations.push(Violation::new(
                "PERF-002",
                format!(
                    "{} regression exceeds limit: candidate={}ms allowed={}ms limit_pct={}",
                    sample.fixture,
                    fixed6(sample.candidate_elapsed_ms),
                    fixed6(allowed),
                    fixed6(limits.max_regression_pct)
                ),
            ));
        }
    }
    observed.worst_fixture_regression_pct = worst.map(round6);

    (observed, violations)
}

/// Decode and check in one pass; violations come back sorted.
#[must_use]
pub fn evaluate_telemetry(
    payload: &Map<String, Value>,
    limits: &PerfLimits,
    strict: bool,
) -> (Observed, Vec<Violation>) {
    let (record, mut violations) = decode_telemetry(payload, strict);
    let (observed, findings) = check_record(&record, limits);
    violations.extend(findings);
    violations.sort();
    (observed, violations)
}

/// Loads telemetry, evaluates it, and writes the evidence summary when one is
/// configured.
pub fn evaluate_perf(config: &PerfGuardConfig) -> Result<PerfSummary, GateError> {
    let telemetry_path = config.telemetry_path();
    tracing::info!(
        mode = PERF_MODE,
        profile = %config.profile,
        telemetry = %telemetry_path.display(),
        "starting perf guard"
    );
    let payload = load_telemetry(&telemetry_path, &config.repo_root)?;
    let (observed, violations) =
        evaluate_telemetry(&payload, &config.limits, config.profile.is_strict());
    let status = GateStatus::from_violation_count(violations.len());
    tracing::info!(%status, violation_count = violations.len(), "perf guard finished");

    let evidence_path = config.evidence_output_path();
    let summary = PerfSummary {
        mode: PERF_MODE.to_string(),
        config: PerfConfigBlock {
            profile: config.profile,
            strict_mode: config.profile.is_strict(),
            contract_mode: config.contract_mode,
            telemetry: display_path(&telemetry_path, &config.repo_root),
            evidence_output: evidence_path
                .as_deref()
                .map(|path| display_path(path, &config.repo_root)),
            limits: config.limits,
        },
        status,
        violation_count: violations.len(),
        violations,
        observed,
    };
    if let Some(path) = &evidence_path {
        write_summary_json(&summary, path)?;
    }
    Ok(summary)
}
