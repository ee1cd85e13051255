// src/ingest/mod.rs
pub mod feeds;
pub mod resolve;
pub mod types;

use crate::ingest::types::{FeedSource, RawItem};
use crate::metrics::{ensure_described, FEED_ERRORS, FEED_ITEMS};
use chrono::{DateTime, Utc};
use metrics::counter;
use std::collections::HashSet;

/// Normalize feed text: decode entities, strip tags, tidy quotes and whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (includes U+3000 ideographic space)
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

/// Drop items without title or link, de-duplicate by (title, link), order
/// newest first (undated last) and cap the pool size.
pub fn tidy_pool(raw: Vec<RawItem>, max_entries: usize) -> (Vec<RawItem>, usize) {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut dropped = 0usize;
    let mut keep = Vec::with_capacity(raw.len());
    for it in raw {
        if it.title.trim().is_empty() || it.link.trim().is_empty() {
            dropped += 1;
            continue;
        }
        if !seen.insert((it.title.clone(), it.link.clone())) {
            dropped += 1;
            continue;
        }
        keep.push(it);
    }

    keep.sort_by(|a, b| recency_key(b.published_at).cmp(&recency_key(a.published_at)));
    keep.truncate(max_entries);
    (keep, dropped)
}

fn recency_key(ts: Option<DateTime<Utc>>) -> (bool, Option<DateTime<Utc>>) {
    (ts.is_some(), ts)
}

/// Fetch every feed once. A failing feed is logged and counted, never fatal.
/// Returns (pool, feed_errors).
pub async fn collect_pool(
    feeds: &[Box<dyn FeedSource>],
    max_entries: usize,
) -> (Vec<RawItem>, usize) {
    ensure_described();

    let mut raw = Vec::new();
    let mut errors = 0usize;
    for f in feeds {
        match f.fetch_latest().await {
            Ok(mut v) => {
                counter!(FEED_ITEMS).increment(v.len() as u64);
                raw.append(&mut v);
            }
            Err(e) => {
                tracing::warn!(target: "ingest", error = ?e, feed = f.name(), "feed error");
                counter!(FEED_ERRORS).increment(1);
                errors += 1;
            }
        }
    }

    let (pool, dropped) = tidy_pool(raw, max_entries);
    tracing::info!(
        target: "ingest",
        kept = pool.len(),
        dropped,
        feed_errors = errors,
        "candidate pool collected"
    );
    (pool, errors)
}
