#![forbid(unsafe_code)]

use clap::Parser;
use std::path::PathBuf;
use vh_gates::determinism::{
    DEFAULT_REPLAY_ROOT, DEFAULT_REPLAYS, DEFAULT_RUN_LABEL, DEFAULT_TIMEOUT_SEC,
    DeterminismConfig, evaluate_determinism,
};
use vh_gates::report::emit_summary;
use vh_gates::{GateError, GateExit, init_tracing, resolve_repo_root};
use vh_replay::{CommandTemplate, EnvPlan, parse_key_value, parse_variant_env};

const GATE: &str = "check_end_to_end_determinism";

#[derive(Parser, Debug)]
#[command(name = "check_end_to_end_determinism")]
#[command(about = "Replay a command and compare artifact digests across runs")]
struct Args {
    /// Number of replay runs (at least 2).
    #[arg(long, default_value_t = DEFAULT_REPLAYS)]
    replays: usize,

    /// Artifact glob relative to each run directory; repeatable (default: **/*).
    #[arg(long = "artifact-glob", value_name = "GLOB")]
    artifact_globs: Vec<String>,

    /// Working directory for the replayed command (default: repo root).
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Root directory for replay sessions.
    #[arg(long, default_value = DEFAULT_REPLAY_ROOT)]
    replay_root: PathBuf,

    /// Session label under the replay root.
    #[arg(long, default_value = DEFAULT_RUN_LABEL)]
    run_label: String,

    /// Summary path (default: <replay-root>/<run-label>/summary.json).
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Static env override applied to every run; repeatable.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Per-run env values; the count must equal --replays. Repeatable.
    #[arg(long = "variant-env", value_name = "KEY=v1,v2,...")]
    variant_env: Vec<String>,

    /// Per-run wall-clock timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SEC)]
    timeout_sec: f64,

    /// Emit the canonical JSON summary on stdout.
    #[arg(long)]
    contract_mode: bool,

    /// Root that relative paths resolve against and reports are relative to.
    #[arg(long)]
    repo_root: Option<PathBuf>,

    /// Command tokens after `--`; supports {repo_root}, {run_dir}, {run_id}.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

fn main() {
    init_tracing();
    let exit = match run(Args::parse()) {
        Ok(exit) => exit,
        Err(err) => {
            eprintln!("{GATE}: error: {err}");
            GateExit::InvalidInput
        }
    };
    std::process::exit(exit.code());
}

fn run(args: Args) -> Result<GateExit, GateError> {
    let repo_root = resolve_repo_root(args.repo_root)?;
    let command = CommandTemplate::new(args.command)?;
    let static_env = parse_key_value(&args.env, "--env")?;
    let variant_env = parse_variant_env(&args.variant_env, args.replays)?;
    let env = EnvPlan::new(static_env, variant_env, args.replays)?;

    let config = DeterminismConfig {
        workdir: args.workdir.unwrap_or_else(|| repo_root.clone()),
        repo_root,
        replay_root: args.replay_root,
        run_label: args.run_label,
        replays: args.replays,
        artifact_globs: args.artifact_globs,
        summary_json: args.summary_json,
        timeout_sec: args.timeout_sec,
        env_args: args.env,
        variant_env_args: args.variant_env,
        env,
        command,
    };
    let summary = evaluate_determinism(&config)?;
    emit_summary(&summary, args.contract_mode)
}
