#![forbid(unsafe_code)]

use clap::Parser;
use std::path::PathBuf;
use vh_gates::perf::{PerfGuardArgs, PerfGuardConfig, TELEMETRY_ENV, evaluate_perf};
use vh_gates::report::emit_summary;
use vh_gates::{GateError, GateExit, init_tracing, resolve_repo_root};

const GATE: &str = "check_perf_guard";

#[derive(Parser, Debug)]
#[command(name = "check_perf_guard")]
#[command(about = "Fail-closed checker for refactor perf and determinism telemetry")]
struct Args {
    /// Telemetry JSON. Optional with --strict (falls back to VH_PERF_TELEMETRY).
    #[arg(long)]
    telemetry: Option<PathBuf>,

    /// Tighter limits, required peak RSS, contract output, and evidence by default.
    #[arg(long)]
    strict: bool,

    /// Allowed slowdown percentage (default 10, strict 5).
    #[arg(long)]
    max_regression_pct: Option<f64>,

    /// Allowed determinism run A/B jitter in ms (default 8, strict 4).
    #[arg(long)]
    max_jitter_ms: Option<f64>,

    /// Allowed peak RSS increase percentage (default 10, strict 5).
    #[arg(long)]
    max_memory_regression_pct: Option<f64>,

    /// Emit the canonical JSON summary on stdout.
    #[arg(long)]
    contract_mode: bool,

    /// Where to write the JSON evidence summary.
    #[arg(long)]
    evidence_output: Option<PathBuf>,

    /// Root that relative paths resolve against and reports are relative to.
    #[arg(long)]
    repo_root: Option<PathBuf>,
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
    let config = PerfGuardConfig::resolve(
        resolve_repo_root(args.repo_root)?,
        PerfGuardArgs {
            telemetry: args.telemetry,
            strict: args.strict,
            max_regression_pct: args.max_regression_pct,
            max_jitter_ms: args.max_jitter_ms,
            max_memory_regression_pct: args.max_memory_regression_pct,
            contract_mode: args.contract_mode,
            evidence_output: args.evidence_output,
        },
        std::env::var(TELEMETRY_ENV).ok(),
    )?;
    let summary = evaluate_perf(&config)?;
    emit_summary(&summary, config.contract_mode)
}
