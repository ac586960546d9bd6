#![forbid(unsafe_code)]

use crate::ReplayError;
use crate::artifacts::ArtifactSet;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use vh_digest::{output_signature, sha256_hex};

const POLL_TICK: Duration = Duration::from_millis(5);
const READ_CHUNK: usize = 8192;
/// How long pipe output may keep trickling in after the child is gone.
const DRAIN_GRACE_COMPLETED: Duration = Duration::from_secs(5);
const DRAIN_GRACE_TIMED_OUT: Duration = Duration::from_millis(250);

/// One fully-specified invocation.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub workdir: PathBuf,
    pub argv: Vec<String>,
    pub env_overrides: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// Evidence captured from one invocation.
///
/// `exit_code` is `None` exactly when the run timed out. Signal termination is
/// recorded as a negative code (`-signal`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub workdir: PathBuf,
    pub command: Vec<String>,
    pub env_overrides: BTreeMap<String, String>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub elapsed_ms: u64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub output_sha256: Option<String>,
    pub artifacts: Option<ArtifactSet>,
}

impl RunRecord {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    #[must_use]
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    #[must_use]
    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// stdout and stderr joined by a newline, lossily decoded.
    #[must_use]
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout_text(), self.stderr_text())
    }

    #[must_use]
    pub fn stdout_sha256(&self) -> String {
        sha256_hex(&self.stdout)
    }

    #[must_use]
    pub fn stderr_sha256(&self) -> String {
        sha256_hex(&self.stderr)
    }

    #[must_use]
    pub fn with_artifacts(self, artifacts: ArtifactSet) -> Self {
        Self {
            artifacts: Some(artifacts),
            ..self
        }
    }

    #[must_use]
    pub fn digest_by_path(&self) -> Option<BTreeMap<String, String>> {
        self.artifacts.as_ref().map(ArtifactSet::digest_by_path)
    }
}

enum Outcome {
    Exited(ExitStatus),
    TimedOut,
}

/// Runs `spec` to completion or until its timeout elapses.
///
/// Spawn failure is an error; everything after a successful spawn, including a
/// hang, produces a [`RunRecord`].
pub fn execute(spec: &RunSpec) -> Result<RunRecord, ReplayError> {
    let Some((program, args)) = spec.argv.split_first() else {
        return Err(ReplayError::EmptyCommand);
    };
    fs::create_dir_all(&spec.run_dir)
        .map_err(|err| ReplayError::io("failed creating", &spec.run_dir, err))?;

    tracing::debug!(run_id = %spec.run_id, command = ?spec.argv, "spawning replay run");
    let started = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .current_dir(&spec.workdir)
        .envs(&spec.env_overrides)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ReplayError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout_rx = child.stdout.take().map(spawn_reader);
    let stderr_rx = child.stderr.take().map(spawn_reader);
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let outcome = loop {
        drain_ready(stdout_rx.as_ref(), &mut stdout);
        drain_ready(stderr_rx.as_ref(), &mut stderr);

        match child.try_wait() {
            Ok(Some(status)) => break Outcome::Exited(status),
            Ok(None) => {}
            Err(source) => {
                kill_and_reap(&mut child, &spec.run_id);
                return Err(ReplayError::Wait {
                    program: program.clone(),
                    source,
                });
            }
        }

        if started.elapsed() >= spec.timeout {
            kill_and_reap(&mut child, &spec.run_id);
            break Outcome::TimedOut;
        }
        thread::sleep(POLL_TICK);
    };

    let grace = match outcome {
        Outcome::Exited(_) => DRAIN_GRACE_COMPLETED,
        Outcome::TimedOut => DRAIN_GRACE_TIMED_OUT,
    };
    let deadline = Instant::now() + grace;
    drain_until_closed(stdout_rx.as_ref(), &mut stdout, deadline);
    drain_until_closed(stderr_rx.as_ref(), &mut stderr, deadline);
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (exit_code, timed_out) = match outcome {
        Outcome::Exited(status) => (Some(exit_code_of(status)), false),
        Outcome::TimedOut => {
            tracing::warn!(
                run_id = %spec.run_id,
                timeout_ms = u64::try_from(spec.timeout.as_millis()).unwrap_or(u64::MAX),
                "replay run timed out"
            );
            (None, true)
        }
    };
    let output_sha256 = (!timed_out).then(|| {
        output_signature(
            &String::from_utf8_lossy(&stdout),
            &String::from_utf8_lossy(&stderr),
        )
    });
    tracing::debug!(run_id = %spec.run_id, ?exit_code, timed_out, elapsed_ms, "replay run finished");

    Ok(RunRecord {
        run_id: spec.run_id.clone(),
        run_dir: spec.run_dir.clone(),
        workdir: spec.workdir.clone(),
        command: spec.argv.clone(),
        env_overrides: spec.env_overrides.clone(),
        exit_code,
        timed_out,
        elapsed_ms,
        stdout,
        stderr,
        output_sha256,
        artifacts: None,
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

fn drain_ready(rx: Option<&Receiver<Vec<u8>>>, sink: &mut Vec<u8>) {
    if let Some(rx) = rx {
        while let Ok(chunk) = rx.try_recv() {
            sink.extend_from_slice(&chunk);
        }
    }
}

fn drain_until_closed(rx: Option<&Receiver<Vec<u8>>>, sink: &mut Vec<u8>, deadline: Instant) {
    let Some(rx) = rx else {
        return;
    };
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(chunk) => sink.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected | RecvTimeoutError::Timeout) => break,
        }
    }
}

/// Kills the child and every descendant, then reaps the child. Launchers such
/// as `/bin/sh` leave the real program as a grandchild holding the pipes.
fn kill_and_reap(child: &mut Child, run_id: &str) {
    kill_process_tree(child.id());
    if let Err(err) = child.kill() {
        tracing::warn!(run_id, error = %err, "failed to kill replay child");
    }
    if let Err(err) = child.wait() {
        tracing::warn!(run_id, error = %err, "failed to reap replay child");
    }
}

fn kill_process_tree(root: u32) {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut tree = Vec::new();
    let mut pending = vec![Pid::from_u32(root)];
    while let Some(pid) = pending.pop() {
        tree.push(pid);
        if let Some(kids) = children.get(&pid) {
            pending.extend(kids.iter().copied());
        }
    }

    // Descendants before ancestors.
    for pid in tree.into_iter().rev() {
        if let Some(process) = system.process(pid) {
            if process.kill_with(Signal::Kill) != Some(true) {
                let _ = process.kill();
            }
        }
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    status.code().unwrap_or(-1)
}
