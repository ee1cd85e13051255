//! Staged recency-window fallback.
//!
//! Windows are tried narrowest first (today → weekly → monthly by default).
//! The first window with a nonempty subset wins. Undated candidates are
//! eligible in every window but sort last. If every window is empty but the
//! matched pool is not, the whole pool is taken under the widest label
//! (`Forced`); if the pool is empty a single placeholder is synthesized.
//! Every call returns exactly one label and at least one candidate.
//!
//! Selections from the widest window and forced selections list delayed-
//! valuable items (earnings, supply, policy) first. Nothing is excluded.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::analyze::value::is_delayed_valuable;
use crate::ingest::types::{by_recency_desc, NewsCandidate};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Window {
    pub label: String,
    pub days: i64,
}

impl Window {
    pub fn new(label: &str, days: i64) -> Self {
        Self {
            label: label.to_string(),
            days,
        }
    }

    pub fn admits(&self, candidate: &NewsCandidate, now: DateTime<Utc>) -> bool {
        match candidate.published_at {
            Some(ts) => ts >= now - Duration::days(self.days),
            None => true,
        }
    }
}

pub fn default_windows() -> Vec<Window> {
    vec![
        Window::new("today", 1),
        Window::new("weekly", 7),
        Window::new("monthly", 30),
    ]
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    Window,
    Forced,
    EmptyPlaceholder,
}

impl SelectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionKind::Window => "window",
            SelectionKind::Forced => "forced",
            SelectionKind::EmptyPlaceholder => "empty_placeholder",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub window: String,
    pub kind: SelectionKind,
    pub candidates: Vec<NewsCandidate>,
}

pub fn select_window(
    matched: &[NewsCandidate],
    windows: &[Window],
    now: DateTime<Utc>,
) -> Selection {
    let fallback_windows;
    let windows = if windows.is_empty() {
        fallback_windows = default_windows();
        &fallback_windows
    } else {
        windows
    };

    let widest_days = windows.iter().map(|w| w.days).max().unwrap_or(0);
    for w in windows {
        let mut subset: Vec<NewsCandidate> = matched
            .iter()
            .filter(|c| w.admits(c, now))
            .cloned()
            .collect();
        if !subset.is_empty() {
            subset.sort_by(by_recency_desc);
            if w.days >= widest_days {
                prefer_valuable(&mut subset);
            }
            return Selection {
                window: w.label.clone(),
                kind: SelectionKind::Window,
                candidates: subset,
            };
        }
    }

    let widest = windows
        .last()
        .map(|w| w.label.clone())
        .unwrap_or_else(|| "monthly".to_string());

    if !matched.is_empty() {
        let mut all = matched.to_vec();
        all.sort_by(by_recency_desc);
        prefer_valuable(&mut all);
        return Selection {
            window: widest,
            kind: SelectionKind::Forced,
            candidates: all,
        };
    }

    Selection {
        window: widest,
        kind: SelectionKind::EmptyPlaceholder,
        candidates: vec![NewsCandidate::placeholder()],
    }
}

/// Stable: recency order is kept inside each group.
fn prefer_valuable(candidates: &mut [NewsCandidate]) {
    candidates.sort_by_cached_key(|c| !is_delayed_valuable(c));
}
