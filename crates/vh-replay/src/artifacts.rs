#![forbid(unsafe_code)]

use crate::ReplayError;
use glob::{MatchOptions, Pattern};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};
use vh_digest::{ManifestEntry, corpus_digest, sha256_hex};

pub const DEFAULT_ARTIFACT_GLOB: &str = "**/*";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Digest evidence for one run directory, ordered by relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub entries: Vec<ManifestEntry>,
    pub corpus_sha256: String,
}

impl ArtifactSet {
    #[must_use]
    pub fn from_entries(mut entries: Vec<ManifestEntry>) -> Self {
        entries.sort();
        entries.dedup_by(|a, b| a.path == b.path);
        let corpus_sha256 = corpus_digest(&entries);
        Self {
            entries,
            corpus_sha256,
        }
    }

    #[must_use]
    pub fn digest_by_path(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|entry| (entry.path.clone(), entry.sha256.clone()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ensure_non_empty(&self, run_dir: &Path, patterns: &[String]) -> Result<(), ReplayError> {
        if self.is_empty() {
            return Err(ReplayError::NoArtifacts {
                run_dir: run_dir.to_path_buf(),
                patterns: patterns.to_vec(),
            });
        }
        Ok(())
    }
}

/// Scans `run_dir` for regular files matching any of `patterns`.
///
/// Patterns are relative to `run_dir`; `*` stays within one path segment and
/// `**` crosses segments. A file matched by several patterns is listed once.
/// An empty result is not an error here; see [`ArtifactSet::ensure_non_empty`].
pub fn collect_artifacts(run_dir: &Path, patterns: &[String]) -> Result<ArtifactSet, ReplayError> {
    let root = Pattern::escape(&run_dir.to_string_lossy());
    let mut entries = BTreeMap::new();

    for pattern in patterns {
        let full = format!("{}/{}", root.trim_end_matches('/'), pattern);
        let paths = glob::glob_with(&full, MATCH_OPTIONS).map_err(|err| ReplayError::InvalidGlob {
            pattern: pattern.clone(),
            detail: err.to_string(),
        })?;

        for matched in paths {
            let path = matched.map_err(|err| {
                let path = err.path().to_path_buf();
                ReplayError::io("failed scanning", path, err.into_error())
            })?;
            if !path.is_file() {
                continue;
            }
            let Some(relative) = relative_slash_path(run_dir, &path) else {
                continue;
            };
            if entries.contains_key(&relative) {
                continue;
            }
            let payload =
                fs::read(&path).map_err(|err| ReplayError::io("failed reading", &path, err))?;
            entries.insert(
                relative.clone(),
                ManifestEntry {
                    path: relative,
                    bytes: payload.len() as u64,
                    sha256: sha256_hex(&payload),
                },
            );
        }
    }

    let set = ArtifactSet::from_entries(entries.into_values().collect());
    tracing::debug!(
        run_dir = %run_dir.display(),
        artifact_count = set.len(),
        "collected artifacts"
    );
    Ok(set)
}

fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
