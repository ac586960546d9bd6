#![forbid(unsafe_code)]

//! Canonical JSON and human renderings shared by the gates.

use crate::{GateError, GateExit, GateStatus, Violation};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use vh_digest::canonical_json_text;

/// A finished gate verdict that can be rendered both ways.
pub trait GateSummary: Serialize {
    fn mode(&self) -> &str;
    fn status(&self) -> GateStatus;
    fn violations(&self) -> &[Violation];

    /// Gate-specific lines printed between the header and the violation list.
    fn human_detail_lines(&self) -> Vec<String> {
        Vec::new()
    }

    /// Lines appended after the violation list on FAIL.
    fn human_footer_lines(&self) -> Vec<String> {
        Vec::new()
    }

    fn human_violation_limit(&self) -> usize {
        usize::MAX
    }

    fn to_canonical_json(&self) -> Result<String, GateError> {
        canonical_json_text(self).map_err(|source| GateError::Serialize {
            what: "gate summary",
            source,
        })
    }

    fn render_human(&self) -> String {
        let mut lines = vec![
            format!("status: {}", self.status()),
            format!("mode: {}", self.mode()),
        ];
        lines.extend(self.human_detail_lines());
        lines.push(format!("violation_count: {}", self.violations().len()));
        if self.status() == GateStatus::Fail {
            let limit = self.human_violation_limit();
            lines.push("violations:".to_string());
            lines.extend(self.violations().iter().take(limit).map(violation_line));
            let hidden = self.violations().len().saturating_sub(limit);
            if hidden > 0 {
                lines.push(format!("- ... {hidden} more (see JSON summary)"));
            }
            lines.extend(self.human_footer_lines());
        }
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }
}

#[must_use]
pub fn violation_line(violation: &Violation) -> String {
    match violation.subject() {
        Some(subject) => format!(
            "- [{}] {}: {}",
            violation.check_id, subject, violation.detail
        ),
        None => format!("- [{}] {}", violation.check_id, violation.detail),
    }
}

/// Writes the canonical JSON of `summary` to `path`, creating parent dirs.
pub fn write_summary_json<S: GateSummary + ?Sized>(
    summary: &S,
    path: &Path,
) -> Result<(), GateError> {
    let text = summary.to_canonical_json()?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| GateError::io("failed creating directory", parent, err))?;
    }
    fs::write(path, text.as_bytes())
        .map_err(|err| GateError::io("failed writing summary", path, err))
}

/// Prints the verdict the way every gate binary does.
///
/// Contract mode prints canonical JSON to stdout regardless of status.
/// Otherwise the human rendering goes to stdout on PASS and stderr on FAIL.
pub fn emit_summary<S: GateSummary + ?Sized>(
    summary: &S,
    contract_mode: bool,
) -> Result<GateExit, GateError> {
    let status = summary.status();
    if contract_mode {
        write_stream(&mut io::stdout().lock(), &summary.to_canonical_json()?)?;
    } else if status == GateStatus::Fail {
        write_stream(&mut io::stderr().lock(), &summary.render_human())?;
    } else {
        write_stream(&mut io::stdout().lock(), &summary.render_human())?;
    }
    Ok(GateExit::from(status))
}

fn write_stream(stream: &mut dyn Write, text: &str) -> Result<(), GateError> {
    stream
        .write_all(text.as_bytes())
        .and_then(|()| stream.flush())
        .map_err(|err| GateError::io("failed writing", "<output stream>", err))
}

/// Formats a float to exactly six decimals, as used in violation details.
#[must_use]
pub fn fixed6(value: f64) -> String {
    format!("{value:.6}")
}

/// Rounds to six decimal places for the `observed` report blocks.
#[must_use]
pub fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
