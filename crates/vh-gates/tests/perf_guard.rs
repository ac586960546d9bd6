use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use vh_gates::perf::{
    DEFAULT_STRICT_EVIDENCE, PerfGuardArgs, PerfGuardConfig, PerfProfile, PerfSummary,
    TELEMETRY_SCHEMA_VERSION, evaluate_perf,
};
use vh_gates::{GateStatus, GateSummary};

const SHA_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const SHA_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

fn telemetry(candidate_ms: f64, run_b_sha: &str) -> Value {
    json!({
        "schema_version": TELEMETRY_SCHEMA_VERSION,
        "baseline": {"elapsed_ms": 100.0, "peak_rss_mb": 200.0},
        "candidate": {
            "elapsed_ms": candidate_ms,
            "peak_rss_mb": 204.0,
            "determinism": {
                "run_a_elapsed_ms": 50.0,
                "run_b_elapsed_ms": 52.0,
                "run_a_artifact_sha256": SHA_A,
                "run_b_artifact_sha256": run_b_sha,
                "run_b_cache_hit": true
            }
        },
        "samples": [
            {"fixture": "fixtures/a.objc3", "baseline_elapsed_ms": 10.0, "candidate_elapsed_ms": 10.2},
            {"fixture": "fixtures/b.objc3", "baseline_elapsed_ms": 20.0, "candidate_elapsed_ms": 20.0}
        ]
    })
}

fn write_telemetry(root: &Path, payload: &Value) -> PathBuf {
    let path = PathBuf::from("telemetry.json");
    fs::write(
        root.join(&path),
        serde_json::to_string_pretty(payload).expect("json"),
    )
    .expect("write telemetry");
    path
}

fn default_args(telemetry: PathBuf) -> PerfGuardArgs {
    PerfGuardArgs {
        telemetry: Some(telemetry),
        ..PerfGuardArgs::default()
    }
}

#[test]
fn healthy_telemetry_passes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_telemetry(dir.path(), &telemetry(104.0, SHA_A));
    let config =
        PerfGuardConfig::resolve(dir.path().to_path_buf(), default_args(path), None).expect("config");
    let summary = evaluate_perf(&config).expect("perf guard");

    assert_eq!(summary.status, GateStatus::Pass, "{:?}", summary.violations);
    assert_eq!(summary.config.telemetry, "telemetry.json");
    assert_eq!(summary.observed.sample_count, 2);
    assert_eq!(summary.observed.determinism_jitter_ms, Some(2.0));
    assert_eq!(summary.observed.max_allowed_elapsed_ms, Some(110.0));

    let text = summary.render_human();
    assert!(text.starts_with("status: PASS\n"), "{text}");
    assert!(text.contains("profile: default\n"), "{text}");
}

#[test]
fn regression_and_hash_drift_fail_with_sorted_violations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_telemetry(dir.path(), &telemetry(120.0, SHA_B));
    let config =
        PerfGuardConfig::resolve(dir.path().to_path_buf(), default_args(path), None).expect("config");
    let summary = evaluate_perf(&config).expect("perf guard");

    let ids = summary
        .violations
        .iter()
        .map(|violation| violation.check_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["DET-001", "PERF-001"]);
    assert_eq!(summary.violation_count, 2);

    let parsed: PerfSummary =
        serde_json::from_str(&summary.to_canonical_json().expect("json")).expect("parse");
    assert_eq!(parsed, summary);
}

#[test]
fn strict_mode_writes_evidence_under_the_default_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_telemetry(dir.path(), &telemetry(104.0, SHA_A));
    let config = PerfGuardConfig::resolve(
        dir.path().to_path_buf(),
        PerfGuardArgs {
            strict: true,
            ..PerfGuardArgs::default()
        },
        Some(format!(" {} ", path.display())),
    )
    .expect("config");
    assert_eq!(config.profile, PerfProfile::Strict);
    assert!(config.contract_mode);

    let summary = evaluate_perf(&config).expect("perf guard");
    assert_eq!(summary.status, GateStatus::Pass, "{:?}", summary.violations);
    assert_eq!(
        summary.config.evidence_output.as_deref(),
        Some(DEFAULT_STRICT_EVIDENCE)
    );
    let evidence = fs::read_to_string(dir.path().join(DEFAULT_STRICT_EVIDENCE)).expect("evidence");
    assert_eq!(evidence, summary.to_canonical_json().expect("json"));
}

#[test]
fn strict_mode_requires_peak_rss() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut payload = telemetry(100.0, SHA_A);
    payload["baseline"]
        .as_object_mut()
        .expect("baseline object")
        .remove("peak_rss_mb");
    let path = write_telemetry(dir.path(), &payload);
    let config = PerfGuardConfig::resolve(
        dir.path().to_path_buf(),
        PerfGuardArgs {
            telemetry: Some(path),
            strict: true,
            evidence_output: Some(PathBuf::from("out/evidence.json")),
            ..PerfGuardArgs::default()
        },
        None,
    )
    .expect("config");
    let summary = evaluate_perf(&config).expect("perf guard");

    assert_eq!(summary.status, GateStatus::Fail);
    assert_eq!(summary.violations[0].check_id, "TEL-019");
    assert!(dir.path().join("out/evidence.json").is_file());
}

#[test]
fn unreadable_telemetry_is_invalid_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("broken.json"), "{ not json").expect("write");

    let missing = PerfGuardConfig::resolve(
        dir.path().to_path_buf(),
        default_args(PathBuf::from("absent.json")),
        None,
    )
    .expect("config");
    let err = evaluate_perf(&missing).expect_err("missing telemetry");
    assert_eq!(err.to_string(), "telemetry file not found: absent.json");

    let broken = PerfGuardConfig::resolve(
        dir.path().to_path_buf(),
        default_args(PathBuf::from("broken.json")),
        None,
    )
    .expect("config");
    let err = evaluate_perf(&broken).expect_err("invalid json");
    assert!(
        err.to_string().starts_with("telemetry file is not valid JSON: broken.json"),
        "{err}"
    );
}
