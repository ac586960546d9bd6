#![forbid(unsafe_code)]

//! Content digests and canonical text shared by every verification gate.
//!
//! All digests are SHA-256 rendered as 64 lowercase hex characters. Canonical
//! JSON is `serde_json` pretty output (two-space indent) with a trailing newline;
//! key order comes from struct declaration order and `BTreeMap` ordering, never
//! from hash iteration.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Separator placed between normalized stdout and stderr before hashing.
pub const OUTPUT_SIGNATURE_SEPARATOR: &str = "\n---stderr---\n";

pub const SHA256_HEX_LEN: usize = 64;

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

/// True when `value` is exactly 64 lowercase hex characters.
#[must_use]
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == SHA256_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[must_use]
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}

/// Digest of a run's observable console output.
///
/// Both streams are CRLF-normalized first so that line-ending translation by the
/// host never shows up as output drift.
#[must_use]
pub fn output_signature(stdout: &str, stderr: &str) -> String {
    let mut payload = normalize_newlines(stdout);
    payload.push_str(OUTPUT_SIGNATURE_SEPARATOR);
    payload.push_str(&normalize_newlines(stderr));
    sha256_hex(payload.as_bytes())
}

/// One line of an artifact manifest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

impl ManifestEntry {
    #[must_use]
    pub fn manifest_line(&self) -> String {
        format!("{}|{}|{}", self.path, self.sha256, self.bytes)
    }
}

/// Renders the canonical manifest text: one `path|sha256|size` line per entry,
/// ordered by path, newline-terminated.
#[must_use]
pub fn manifest_text(entries: &[ManifestEntry]) -> String {
    let mut ordered = entries.iter().collect::<Vec<_>>();
    ordered.sort_by(|a, b| a.path.cmp(&b.path));

    let mut text = String::new();
    for entry in ordered {
        text.push_str(&entry.manifest_line());
        text.push('\n');
    }
    text
}

/// Aggregate digest of a whole artifact set.
#[must_use]
pub fn corpus_digest(entries: &[ManifestEntry]) -> String {
    sha256_hex(manifest_text(entries).as_bytes())
}

pub fn canonical_json_text<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    Ok(text)
}
