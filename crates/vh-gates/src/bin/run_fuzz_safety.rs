#![forbid(unsafe_code)]

use clap::Parser;
use std::path::PathBuf;
use vh_corpus::CorpusConfig;
use vh_gates::fuzz::{
    DEFAULT_OUT_ROOT, DEFAULT_TIMEOUT_SEC, FuzzConfig, default_compiler_path, evaluate_fuzz,
};
use vh_gates::report::emit_summary;
use vh_gates::{GateError, GateExit, init_tracing, resolve_generated_at, resolve_repo_root};

const GATE: &str = "run_fuzz_safety";

#[derive(Parser, Debug)]
#[command(name = "run_fuzz_safety")]
#[command(about = "Deterministic malformed-input stress gate for the compiler parser and semantic passes")]
struct Args {
    /// Compiler executable (default: artifacts/bin/objc3c-native).
    #[arg(long, env = "VH_COMPILER")]
    compiler: Option<PathBuf>,

    /// Optional launcher used to run --compiler, e.g. an interpreter for a stub.
    #[arg(long)]
    launcher: Option<PathBuf>,

    /// Output root for corpus, log, and per-run artifacts.
    #[arg(long, default_value = DEFAULT_OUT_ROOT)]
    out_root: PathBuf,

    /// Per-invocation timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SEC)]
    timeout_sec: f64,

    /// Deterministic cap on corpus size (first N cases by id).
    #[arg(long)]
    max_cases: Option<usize>,

    /// Fixed report timestamp, YYYY-MM-DDTHH:MM:SSZ.
    #[arg(long)]
    generated_at_utc: Option<String>,

    /// Emit the canonical JSON summary on stdout.
    #[arg(long)]
    contract_mode: bool,

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
    let config = FuzzConfig {
        repo_root: resolve_repo_root(args.repo_root)?,
        compiler: args.compiler.unwrap_or_else(default_compiler_path),
        launcher: args.launcher,
        out_root: args.out_root,
        timeout_sec: args.timeout_sec,
        max_cases: args.max_cases,
        generated_at_utc: resolve_generated_at(args.generated_at_utc.as_deref())?,
        corpus: CorpusConfig::malformed_objc3(),
    };
    let summary = evaluate_fuzz(&config)?;
    emit_summary(&summary, args.contract_mode)
}
