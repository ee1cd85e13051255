// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Title carried by the sentinel candidate when an entity has no matches at all.
pub const PLACEHOLDER_TITLE: &str = "No matching news was found within the search windows";

/// One entry as supplied by a feed, before its locator is resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawItem {
    pub title: String,
    pub snippet: String,
    pub publisher_hint: Option<String>, // e.g. "經濟日報", from <source>
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// A candidate whose locator has been resolved. Never mutated afterwards;
/// stages pass copies around.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewsCandidate {
    pub title: String,
    pub snippet: String,
    pub publisher: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Locator as it appeared in the feed. `None` only for the placeholder.
    pub source_locator: Option<String>,
    /// Canonical locator after redirects. `None` only for the placeholder.
    pub resolved_locator: Option<String>,
}

impl NewsCandidate {
    /// Sentinel used when nothing matched an entity in any window.
    pub fn placeholder() -> Self {
        Self {
            title: PLACEHOLDER_TITLE.to_string(),
            snippet: String::new(),
            publisher: String::new(),
            published_at: None,
            source_locator: None,
            resolved_locator: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.source_locator.is_none()
    }

    /// Title + snippet, used by keyword matching.
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.snippet)
    }
}

/// Newest first; undated candidates sort after every dated one.
pub fn by_recency_desc(a: &NewsCandidate, b: &NewsCandidate) -> Ordering {
    match (a.published_at, b.published_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<RawItem>>;
    fn name(&self) -> &str;
}
