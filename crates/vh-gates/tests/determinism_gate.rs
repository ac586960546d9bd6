#![cfg(unix)]

use std::path::Path;

use vh_gates::determinism::{
    DeterminismConfig, DeterminismSummary, MismatchKind, evaluate_determinism, shell_join,
};
use vh_gates::{GateError, GateStatus, GateSummary};
use vh_replay::{CommandTemplate, EnvPlan, ReplayError, parse_key_value, parse_variant_env};

fn config(root: &Path, script: &str, replays: usize) -> DeterminismConfig {
    config_with_env(root, script, replays, &[], &[])
}

fn config_with_env(
    root: &Path,
    script: &str,
    replays: usize,
    env_args: &[&str],
    variant_args: &[&str],
) -> DeterminismConfig {
    let env_args = env_args.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
    let variant_env_args = variant_args
        .iter()
        .map(|s| (*s).to_string())
        .collect::<Vec<_>>();
    let static_env = parse_key_value(&env_args, "--env").expect("env");
    let variants = parse_variant_env(&variant_env_args, replays).expect("variant env");
    DeterminismConfig {
        repo_root: root.to_path_buf(),
        workdir: root.to_path_buf(),
        replay_root: "replays".into(),
        run_label: "latest".to_string(),
        replays,
        artifact_globs: Vec::new(),
        summary_json: None,
        timeout_sec: 10.0,
        env_args,
        variant_env_args,
        env: EnvPlan::new(static_env, variants, replays).expect("env plan"),
        command: CommandTemplate::new(
            ["/bin/sh", "-c", script, "sh", "{run_dir}", "{run_id}"]
                .map(String::from)
                .to_vec(),
        )
        .expect("command"),
    }
}

#[test]
fn identical_artifacts_pass_and_write_summary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(
        dir.path(),
        r#"mkdir -p "$1/obj" && printf 'define i32 @main()' > "$1/out.ll" && printf 'O' > "$1/obj/a.o""#,
        3,
    );
    let summary = evaluate_determinism(&cfg).expect("determinism gate");

    assert_eq!(summary.status, GateStatus::Pass, "{:?}", summary.mismatches);
    assert_eq!(summary.runs.len(), 3);
    assert_eq!(summary.runs[0].run_dir, "replays/latest/run01");
    assert_eq!(summary.runs[0].artifact_count, Some(2));
    assert_eq!(summary.config.session.summary_json, "replays/latest/summary.json");

    let written = std::fs::read_to_string(dir.path().join("replays/latest/summary.json"))
        .expect("summary on disk");
    assert_eq!(written, summary.to_canonical_json().expect("json"));
    let parsed: DeterminismSummary = serde_json::from_str(&written).expect("parse summary");
    assert_eq!(parsed, summary);
}

#[test]
fn extra_file_in_one_replay_is_unexpected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(
        dir.path(),
        r#"printf x > "$1/out.ll"; if [ "$2" = run02 ]; then printf y > "$1/extra.txt"; fi"#,
        2,
    );
    let summary = evaluate_determinism(&cfg).expect("determinism gate");

    assert_eq!(summary.status, GateStatus::Fail);
    assert_eq!(summary.mismatches.len(), 1);
    let mismatch = &summary.mismatches[0];
    assert_eq!(mismatch.kind, MismatchKind::ArtifactUnexpected);
    assert_eq!(mismatch.run_id, "run02");
    assert_eq!(mismatch.path.as_deref(), Some("extra.txt"));

    let text = summary.render_human();
    assert!(
        text.contains("--replays 2 --replay-root replays --run-label latest --timeout-sec 10 -- /bin/sh -c"),
        "{text}"
    );
}

#[test]
fn variant_env_drives_digest_mismatch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config_with_env(
        dir.path(),
        r#"printf '%s-%s' "$STAMP" "$SEED" > "$1/out.ll""#,
        2,
        &["STAMP=fixed"],
        &["SEED=1,2"],
    );
    let summary = evaluate_determinism(&cfg).expect("determinism gate");

    assert_eq!(summary.mismatches.len(), 1);
    assert_eq!(summary.mismatches[0].kind, MismatchKind::ArtifactDigestMismatch);
    assert_eq!(summary.runs[1].env_overrides.get("SEED").map(String::as_str), Some("2"));
    assert_eq!(
        summary.runs[1].env_overrides.get("STAMP").map(String::as_str),
        Some("fixed")
    );
}

#[test]
fn failing_replay_is_reported_without_comparison() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(
        dir.path(),
        r#"printf x > "$1/out.ll"; if [ "$2" = run02 ]; then echo boom >&2; exit 4; fi"#,
        2,
    );
    let summary = evaluate_determinism(&cfg).expect("determinism gate");

    let kinds = summary
        .mismatches
        .iter()
        .map(|mismatch| mismatch.kind)
        .collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![MismatchKind::CommandExitNonzero, MismatchKind::ReplayMissingArtifacts]
    );
    assert_eq!(summary.mismatches[0].exit_code, Some(4));
    let preview = summary.runs[1].failure_preview.as_ref().expect("preview");
    assert_eq!(preview.stderr.trim(), "boom");
}

#[test]
fn empty_baseline_is_a_configuration_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(dir.path(), "true", 2);
    let err = evaluate_determinism(&cfg).expect_err("no artifacts");
    assert!(matches!(err, GateError::Replay(ReplayError::NoArtifacts { .. })), "{err}");
}

#[test]
fn fewer_than_two_replays_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(dir.path(), "true", 1);
    let err = evaluate_determinism(&cfg).expect_err("one replay");
    assert!(err.to_string().contains("--replays"), "{err}");
}

#[test]
fn replay_command_carries_non_default_layout() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join("sub")).expect("workdir");
    let mut cfg = config(dir.path(), "true", 2);
    cfg.timeout_sec = 300.0;
    let defaults = cfg.replay_command();
    let repo_root = format!(
        "check_end_to_end_determinism --repo-root {} --replays 2 ",
        shell_join(&[dir.path().display().to_string()])
    );
    assert!(defaults.starts_with(&repo_root), "{defaults}");
    for flag in ["--workdir", "--timeout-sec", "--summary-json"] {
        assert!(!defaults.contains(flag), "{defaults}");
    }

    cfg.workdir = "sub".into();
    cfg.timeout_sec = 7.0;
    cfg.summary_json = Some("out/summary.json".into());
    let command = cfg.replay_command();
    assert!(command.starts_with(&repo_root), "{command}");
    assert!(command.contains(" --workdir sub "), "{command}");
    assert!(command.contains(" --timeout-sec 7 "), "{command}");
    assert!(command.contains(" --summary-json out/summary.json "), "{command}");
    assert!(command.ends_with(" -- /bin/sh -c true sh '{run_dir}' '{run_id}'"), "{command}");
}

#[test]
fn hanging_replay_times_out_without_evidence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(
        dir.path(),
        r#"printf x > "$1/out.ll"; if [ "$2" = run02 ]; then sleep 30; fi"#,
        2,
    );
    cfg.timeout_sec = 0.5;
    let summary = evaluate_determinism(&cfg).expect("determinism gate");

    let kinds = summary
        .mismatches
        .iter()
        .map(|mismatch| mismatch.kind)
        .collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![MismatchKind::CommandTimeout, MismatchKind::ReplayMissingArtifacts]
    );
    assert!(summary.mismatches.iter().all(|mismatch| mismatch.run_id == "run02"));
    assert!(summary.runs[1].timed_out);
    assert_eq!(summary.runs[1].exit_code, None);
    assert_eq!(summary.status, GateStatus::Fail);
}

#[test]
fn stale_files_from_an_earlier_session_are_cleared() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(dir.path(), r#"printf x > "$1/out.ll""#, 2);
    assert_eq!(
        evaluate_determinism(&cfg).expect("first session").status,
        GateStatus::Pass
    );

    let stale = dir.path().join("replays/latest/run02/stale.txt");
    std::fs::write(&stale, "left over").expect("stale file");
    let summary = evaluate_determinism(&cfg).expect("second session");

    assert_eq!(summary.status, GateStatus::Pass, "{:?}", summary.mismatches);
    assert_eq!(summary.runs[1].artifact_count, Some(1));
    assert!(!stale.exists());
}

#[test]
fn dot_run_label_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    for label in [".", "..", "a/b"] {
        let mut cfg = config(dir.path(), "true", 2);
        cfg.run_label = label.to_string();
        let err = evaluate_determinism(&cfg).expect_err("bad label");
        assert!(
            err.to_string()
                .starts_with("--run-label must be a single path segment"),
            "{err}"
        );
    }
}

#[test]
fn oversized_timeout_is_invalid_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(dir.path(), "true", 2);
    cfg.timeout_sec = 1e20;
    let err = evaluate_determinism(&cfg).expect_err("timeout out of range");
    assert!(matches!(err, GateError::InvalidInput(_)), "{err}");
    assert!(err.to_string().starts_with("--timeout-sec is out of range"), "{err}");
}
