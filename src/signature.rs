//! Deduplication keys for news candidates.
//!
//! The key is a SHA-256 digest, truncated to 16 hex chars, over
//! `normalized(title) | publisher | date-or-"unknown" | normalized(snippet)[..N]`.
//! Equal composite keys always give equal signatures; a digest collision is
//! treated as a genuine duplicate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::ingest::types::NewsCandidate;

pub const SIGNATURE_HEX_LEN: usize = 16;
pub const DEFAULT_SNIPPET_PREFIX_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Map full-width ASCII letters/digits (U+FF10..) to their half-width forms.
fn fold_fullwidth(ch: char) -> char {
    match ch {
        '\u{FF10}'..='\u{FF19}' | '\u{FF21}'..='\u{FF3A}' | '\u{FF41}'..='\u{FF5A}' => {
            char::from_u32(ch as u32 - 0xFEE0).unwrap_or(ch)
        }
        _ => ch,
    }
}

/// Normalize text for signing: half-width digits, no punctuation or symbols,
/// single spaces, lower case.
pub fn normalize_for_signature(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for raw in s.chars() {
        let ch = fold_fullwidth(raw);
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if !ch.is_alphanumeric() {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.extend(ch.to_lowercase());
    }
    out
}

fn date_part(published_at: Option<DateTime<Utc>>) -> String {
    published_at
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// The pre-hash composite key. Exposed for diagnostics and tests.
pub fn composite_key(
    title: &str,
    publisher: &str,
    published_at: Option<DateTime<Utc>>,
    snippet: &str,
    snippet_prefix_chars: usize,
) -> String {
    let snippet_prefix: String = normalize_for_signature(snippet)
        .chars()
        .take(snippet_prefix_chars)
        .collect();
    format!(
        "{}|{}|{}|{}",
        normalize_for_signature(title),
        publisher.trim(),
        date_part(published_at),
        snippet_prefix
    )
}

pub fn signature(
    title: &str,
    publisher: &str,
    published_at: Option<DateTime<Utc>>,
    snippet: &str,
    snippet_prefix_chars: usize,
) -> Signature {
    let key = composite_key(title, publisher, published_at, snippet, snippet_prefix_chars);
    let digest = Sha256::digest(key.as_bytes());
    let mut out = String::with_capacity(SIGNATURE_HEX_LEN);
    for b in digest.iter().take(SIGNATURE_HEX_LEN / 2) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    Signature(out)
}

pub fn candidate_signature(c: &NewsCandidate, snippet_prefix_chars: usize) -> Signature {
    signature(
        &c.title,
        &c.publisher,
        c.published_at,
        &c.snippet,
        snippet_prefix_chars,
    )
}
