#![forbid(unsafe_code)]

//! Verification gates for a compiler under test.
//!
//! Each gate evaluates into a serializable summary and never exits the process
//! itself; the binaries in `src/bin` own argument parsing, output streams, and
//! the exit-code mapping in [`GateExit`].

pub mod determinism;
pub mod fuzz;
pub mod perf;
pub mod report;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use vh_replay::ReplayError;

pub use report::{GateSummary, write_summary_json};

pub const GENERATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
pub const LOG_FILTER_ENV: &str = "VH_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";

/// Input or configuration problems. Every variant maps to exit code 2 and
/// produces no verdict.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed serializing {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl GateError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateStatus {
    Pass,
    Fail,
}

impl GateStatus {
    #[must_use]
    pub fn from_violation_count(count: usize) -> Self {
        if count == 0 { Self::Pass } else { Self::Fail }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process exit codes shared by every gate binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateExit {
    Pass,
    Fail,
    InvalidInput,
}

impl GateExit {
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Pass => 0,
            Self::Fail => 1,
            Self::InvalidInput => 2,
        }
    }
}

impl From<GateStatus> for GateExit {
    fn from(status: GateStatus) -> Self {
        match status {
            GateStatus::Pass => Self::Pass,
            GateStatus::Fail => Self::Fail,
        }
    }
}

/// One finding. Ordering follows field order, so sorting a list of violations
/// yields `(check_id, case_id, scope, detail)` order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Violation {
    pub check_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub detail: String,
}

impl Violation {
    pub fn new(check_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            check_id: check_id.into(),
            case_id: None,
            scope: None,
            detail: detail.into(),
        }
    }

    pub fn for_case(
        check_id: impl Into<String>,
        case_id: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            case_id: Some(case_id.into()),
            ..Self::new(check_id, detail)
        }
    }

    pub fn scoped(
        check_id: impl Into<String>,
        scope: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            scope: Some(scope.into()),
            ..Self::new(check_id, detail)
        }
    }

    /// Label used by the human renderer: case id, else scope, else empty.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.case_id.as_deref().or(self.scope.as_deref())
    }
}

/// Validates an explicit `--generated-at-utc` value, or stamps the current time.
pub fn resolve_generated_at(explicit: Option<&str>) -> Result<String, GateError> {
    match explicit {
        Some(value) => {
            let value = value.trim();
            NaiveDateTime::parse_from_str(value, GENERATED_AT_FORMAT).map_err(|_| {
                GateError::invalid(format!(
                    "--generated-at-utc must use YYYY-MM-DDTHH:MM:SSZ, got {value:?}"
                ))
            })?;
            Ok(value.to_string())
        }
        None => Ok(Utc::now().format(GENERATED_AT_FORMAT).to_string()),
    }
}

/// Converts a `--timeout-sec` value, rejecting anything not positive or too
/// large for a [`Duration`].
pub fn timeout_from_secs(timeout_sec: f64) -> Result<Duration, GateError> {
    if !timeout_sec.is_finite() || timeout_sec <= 0.0 {
        return Err(GateError::invalid("--timeout-sec must be > 0"));
    }
    Duration::try_from_secs_f64(timeout_sec).map_err(|_| {
        GateError::invalid(format!("--timeout-sec is out of range: {timeout_sec}"))
    })
}

/// Renders `path` relative to `repo_root` with `/` separators when it lies
/// inside the root; otherwise the path as given.
#[must_use]
pub fn display_path(path: &Path, repo_root: &Path) -> String {
    let relative = path.strip_prefix(repo_root).unwrap_or(path);
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::RootDir => parts.push(String::new()),
            Component::Prefix(prefix) => {
                parts.push(prefix.as_os_str().to_string_lossy().into_owned());
            }
            Component::CurDir => {}
            Component::ParentDir => parts.push("..".to_string()),
        }
    }
    match parts.as_slice() {
        [] => ".".to_string(),
        [root] if root.is_empty() => "/".to_string(),
        _ => parts.join("/"),
    }
}

/// The explicit `--repo-root`, else the current directory, made absolute.
pub fn resolve_repo_root(explicit: Option<PathBuf>) -> Result<PathBuf, GateError> {
    let cwd = std::env::current_dir()
        .map_err(|err| GateError::io("failed reading", "current directory", err))?;
    Ok(match explicit {
        Some(path) => resolve_path(&cwd, &path),
        None => cwd,
    })
}

/// Joins `path` onto `base` unless it is already absolute.
#[must_use]
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Installs the stderr `tracing` subscriber used by the gate binaries.
///
/// The filter comes from `VH_LOG` and defaults to `warn`. Calling this twice is
/// harmless.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
