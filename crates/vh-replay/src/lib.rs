#![forbid(unsafe_code)]

//! Replay executor and artifact collector.
//!
//! A replay is one bounded invocation of the program under test inside its own
//! run directory. The executor never retries and never treats a timeout as a
//! completion; callers classify the resulting [`RunRecord`]s.

pub mod artifacts;
pub mod env;
pub mod executor;
pub mod template;

pub use artifacts::{ArtifactSet, DEFAULT_ARTIFACT_GLOB, collect_artifacts};
pub use env::{EnvPlan, parse_key_value, parse_variant_env};
pub use executor::{RunRecord, RunSpec, execute};
pub use template::{CommandTemplate, TemplateVars};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("{context} entry must use KEY=VALUE format: {entry:?}")]
    InvalidEnvEntry { context: String, entry: String },
    #[error("{context} entry key must be non-empty: {entry:?}")]
    EmptyEnvKey { context: String, entry: String },
    #[error("variant env value count mismatch for {key:?}: expected {expected}, observed {observed}")]
    VariantCountMismatch {
        key: String,
        expected: usize,
        observed: usize,
    },
    #[error("missing replay command. Provide command tokens after '--'.")]
    EmptyCommand,
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting on {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid artifact glob {pattern:?}: {detail}")]
    InvalidGlob { pattern: String, detail: String },
    #[error("no artifacts matched under {} for patterns {patterns:?}", run_dir.display())]
    NoArtifacts {
        run_dir: PathBuf,
        patterns: Vec<String>,
    },
}

impl ReplayError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}
