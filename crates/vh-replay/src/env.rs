#![forbid(unsafe_code)]

use crate::ReplayError;
use std::collections::BTreeMap;

/// Parses `KEY=VALUE` entries. Later duplicates win.
pub fn parse_key_value(
    values: &[String],
    context: &str,
) -> Result<BTreeMap<String, String>, ReplayError> {
    let mut result = BTreeMap::new();
    for raw in values {
        let Some((key, value)) = raw.split_once('=') else {
            return Err(ReplayError::InvalidEnvEntry {
                context: context.to_string(),
                entry: raw.clone(),
            });
        };
        if key.is_empty() {
            return Err(ReplayError::EmptyEnvKey {
                context: context.to_string(),
                entry: raw.clone(),
            });
        }
        result.insert(key.to_string(), value.to_string());
    }
    Ok(result)
}

/// Parses `KEY=v1,v2,...` entries; every key must carry exactly `replays` values.
pub fn parse_variant_env(
    values: &[String],
    replays: usize,
) -> Result<BTreeMap<String, Vec<String>>, ReplayError> {
    let mut mapping = BTreeMap::new();
    for raw in values {
        let Some((key, blob)) = raw.split_once('=') else {
            return Err(ReplayError::InvalidEnvEntry {
                context: "--variant-env".to_string(),
                entry: raw.clone(),
            });
        };
        if key.is_empty() {
            return Err(ReplayError::EmptyEnvKey {
                context: "--variant-env".to_string(),
                entry: raw.clone(),
            });
        }
        let per_run = blob.split(',').map(str::to_string).collect::<Vec<_>>();
        if per_run.len() != replays {
            return Err(ReplayError::VariantCountMismatch {
                key: key.to_string(),
                expected: replays,
                observed: per_run.len(),
            });
        }
        mapping.insert(key.to_string(), per_run);
    }
    Ok(mapping)
}

/// Static overrides shared by every run plus positional per-run overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvPlan {
    static_env: BTreeMap<String, String>,
    variant_env: BTreeMap<String, Vec<String>>,
}

impl EnvPlan {
    pub fn new(
        static_env: BTreeMap<String, String>,
        variant_env: BTreeMap<String, Vec<String>>,
        replays: usize,
    ) -> Result<Self, ReplayError> {
        for (key, values) in &variant_env {
            if values.len() != replays {
                return Err(ReplayError::VariantCountMismatch {
                    key: key.clone(),
                    expected: replays,
                    observed: values.len(),
                });
            }
        }
        Ok(Self {
            static_env,
            variant_env,
        })
    }

    /// Overrides for the zero-based `replay_index`: static first, then variant.
    #[must_use]
    pub fn overrides_for(&self, replay_index: usize) -> BTreeMap<String, String> {
        let mut merged = self.static_env.clone();
        for (key, values) in &self.variant_env {
            if let Some(value) = values.get(replay_index) {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}
