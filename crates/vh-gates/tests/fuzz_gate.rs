#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};

use vh_corpus::CorpusConfig;
use vh_gates::fuzz::{
    DET_EXIT_DRIFT, FuzzConfig, FuzzSummary, SAFE_NONZERO_EXIT, SAFE_TIMEOUT, evaluate_fuzz,
};
use vh_gates::{GateStatus, GateSummary};

const CASES: usize = 3;

fn write_stub(root: &Path, body: &str) -> PathBuf {
    let path = root.join("stub_compiler.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write stub compiler");
    path
}

fn config(root: &Path, compiler: PathBuf) -> FuzzConfig {
    FuzzConfig {
        repo_root: root.to_path_buf(),
        compiler,
        launcher: Some(PathBuf::from("/bin/sh")),
        out_root: PathBuf::from("out"),
        timeout_sec: 5.0,
        max_cases: Some(CASES),
        generated_at_utc: "2026-03-01T12:00:00Z".to_string(),
        corpus: CorpusConfig::malformed_objc3(),
    }
}

#[test]
fn diagnosing_compiler_passes_and_leaves_evidence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = write_stub(dir.path(), r#"echo "error: O3P101 malformed input in $1" >&2; exit 1"#);
    let summary = evaluate_fuzz(&config(dir.path(), stub)).expect("fuzz gate");

    assert_eq!(summary.status, GateStatus::Pass, "{:?}", summary.violations);
    assert_eq!(summary.results.len(), CASES);
    assert_eq!(summary.config.out_root, "out");
    for result in &summary.results {
        assert_eq!(result.run1_exit_code, Some(1));
        assert_eq!(result.run1_output_sha256, result.run2_output_sha256);
        assert!(result.errors.is_empty());
        assert_eq!(result.source_path, format!("out/corpus/{}.objc3", result.case_id));

        let source = dir.path().join(&result.source_path);
        assert!(source.is_file(), "missing {}", source.display());
        let log = dir
            .path()
            .join(format!("out/logs/{}.run1.log", result.case_id));
        let log_text = fs::read_to_string(&log).expect("run log");
        assert!(log_text.contains("exit_code: 1"), "{log_text}");
        assert!(log_text.contains("O3P101"), "{log_text}");
    }

    let ids = summary
        .results
        .iter()
        .map(|result| result.case_id.clone())
        .collect::<Vec<_>>();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[test]
fn repeated_evaluation_is_byte_identical() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = write_stub(dir.path(), r#"echo "error: O3S201 bad input" >&2; exit 3"#);
    let cfg = config(dir.path(), stub);

    let first = evaluate_fuzz(&cfg).expect("first").to_canonical_json().expect("json");
    let second = evaluate_fuzz(&cfg).expect("second").to_canonical_json().expect("json");
    assert_eq!(first, second);
}

#[test]
fn accepting_malformed_input_fails_twice_per_case() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = write_stub(dir.path(), r#"echo "error: accepted anyway"; exit 0"#);
    let summary = evaluate_fuzz(&config(dir.path(), stub)).expect("fuzz gate");

    assert_eq!(summary.status, GateStatus::Fail);
    assert_eq!(summary.violation_count, 2 * CASES);
    assert!(
        summary
            .violations
            .iter()
            .all(|violation| violation.check_id == SAFE_NONZERO_EXIT)
    );
    for result in &summary.results {
        assert!(!result.checks.nonzero_exit);
        assert!(result.checks.diagnostic_signal_present);
    }
}

#[test]
fn exit_code_drift_is_reported_once_per_case() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = write_stub(
        dir.path(),
        r#"echo "error: O3P100 drift" >&2
case "$5" in
  *_r1) exit 1 ;;
  *) exit 2 ;;
esac"#,
    );
    let summary = evaluate_fuzz(&config(dir.path(), stub)).expect("fuzz gate");

    assert_eq!(summary.violation_count, CASES);
    for violation in &summary.violations {
        assert_eq!(violation.check_id, DET_EXIT_DRIFT);
        assert_eq!(violation.detail, "exit code drift run1=1 run2=2");
    }
}

#[test]
fn summary_json_roundtrips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = write_stub(dir.path(), "exit 0");
    let summary = evaluate_fuzz(&config(dir.path(), stub)).expect("fuzz gate");
    assert_eq!(summary.status, GateStatus::Fail);

    let text = summary.to_canonical_json().expect("json");
    let parsed: FuzzSummary = serde_json::from_str(&text).expect("parse summary");
    assert_eq!(parsed, summary);
    assert!(summary.render_human().contains("- [SAFE-001] "));
}

#[test]
fn missing_compiler_is_invalid_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = evaluate_fuzz(&config(dir.path(), PathBuf::from("bin/absent")))
        .expect_err("missing compiler");
    assert_eq!(err.to_string(), "compiler not found: bin/absent");
}

#[test]
fn hanging_compiler_is_a_timeout_not_a_missing_diagnostic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = write_stub(dir.path(), "echo 'error: O3P101 stuck' >&2\nsleep 30");
    let mut cfg = config(dir.path(), stub);
    cfg.max_cases = Some(1);
    cfg.timeout_sec = 0.3;
    let summary = evaluate_fuzz(&cfg).expect("fuzz gate");

    assert_eq!(summary.status, GateStatus::Fail);
    let details = summary
        .violations
        .iter()
        .map(|violation| (violation.check_id.as_str(), violation.detail.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        details,
        vec![
            (SAFE_TIMEOUT, "timeout at run1 (> 0.300s)"),
            (SAFE_TIMEOUT, "timeout at run2 (> 0.300s)"),
        ]
    );
    let result = &summary.results[0];
    assert_eq!(result.run1_exit_code, None);
    assert!(!result.checks.timeout_free);

    let log = dir
        .path()
        .join(format!("out/logs/{}.run1.log", result.case_id));
    let log_text = fs::read_to_string(&log).expect("run log");
    assert!(log_text.contains("status: TIMEOUT"), "{log_text}");
}

#[test]
fn oversized_timeout_is_invalid_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = write_stub(dir.path(), "exit 1");
    let mut cfg = config(dir.path(), stub);
    cfg.timeout_sec = 1e20;
    let err = evaluate_fuzz(&cfg).expect_err("timeout out of range");
    assert!(err.to_string().starts_with("--timeout-sec is out of range"), "{err}");
}
