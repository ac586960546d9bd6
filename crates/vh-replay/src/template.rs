#![forbid(unsafe_code)]

use crate::ReplayError;
use std::path::Path;

pub const REPO_ROOT_PLACEHOLDER: &str = "{repo_root}";
pub const RUN_DIR_PLACEHOLDER: &str = "{run_dir}";
pub const RUN_ID_PLACEHOLDER: &str = "{run_id}";
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// Values substituted into a [`CommandTemplate`].
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub repo_root: &'a Path,
    pub run_dir: &'a Path,
    pub run_id: &'a str,
    pub source: Option<&'a Path>,
}

/// Argument vector with literal `{placeholder}` tokens.
///
/// Substitution is plain text replacement inside each token; no shell is
/// involved, so tokens never split or merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    tokens: Vec<String>,
}

impl CommandTemplate {
    /// Builds a template from raw tokens. A single leading `--` is dropped.
    pub fn new(tokens: Vec<String>) -> Result<Self, ReplayError> {
        let mut tokens = tokens;
        if tokens.first().is_some_and(|first| first == "--") {
            tokens.remove(0);
        }
        if tokens.is_empty() {
            return Err(ReplayError::EmptyCommand);
        }
        Ok(Self { tokens })
    }

    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    #[must_use]
    pub fn expand(&self, vars: &TemplateVars<'_>) -> Vec<String> {
        let repo_root = vars.repo_root.display().to_string();
        let run_dir = vars.run_dir.display().to_string();
        let source = vars.source.map(|path| path.display().to_string());

        self.tokens
            .iter()
            .map(|token| {
                let mut expanded = token
                    .replace(REPO_ROOT_PLACEHOLDER, &repo_root)
                    .replace(RUN_DIR_PLACEHOLDER, &run_dir)
                    .replace(RUN_ID_PLACEHOLDER, vars.run_id);
                if let Some(source) = &source {
                    expanded = expanded.replace(SOURCE_PLACEHOLDER, source);
                }
                expanded
            })
            .collect()
    }
}
