// src/metrics.rs
//! Counter/gauge names used across the pipeline. No exporter is installed
//! here; whatever recorder the host installs receives these series.

use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;

pub const FEED_ITEMS: &str = "digest_feed_items_total";
pub const FEED_ERRORS: &str = "digest_feed_errors_total";
pub const RESOLVE_FAILURES: &str = "digest_resolve_failures_total";
pub const RESOLVE_CACHE_HITS: &str = "digest_resolve_cache_hits_total";
pub const DEDUP: &str = "digest_dedup_total";
pub const CLASSIFIER_FALLBACK: &str = "digest_classifier_fallback_total";
pub const WINDOW_SELECTED: &str = "digest_window_selected_total";
pub const CACHE_EVICTED: &str = "digest_cache_evicted_total";
pub const LAST_RUN_TS: &str = "digest_last_run_ts";

/// One-time metrics registration (so series carry descriptions).
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(FEED_ITEMS, "Raw items parsed from feeds.");
        describe_counter!(FEED_ERRORS, "Feed fetch/parse errors.");
        describe_counter!(
            RESOLVE_FAILURES,
            "Candidates dropped after exhausting resolution retries."
        );
        describe_counter!(
            RESOLVE_CACHE_HITS,
            "Candidates served from the locator index without resolving."
        );
        describe_counter!(DEDUP, "Candidates collapsed onto an existing signature.");
        describe_counter!(
            CLASSIFIER_FALLBACK,
            "Stage-local fallbacks taken because the classifier failed."
        );
        describe_counter!(WINDOW_SELECTED, "Window selections by label and kind.");
        describe_counter!(CACHE_EVICTED, "Cache entries removed by TTL sweeps.");
        describe_gauge!(LAST_RUN_TS, "Unix ts when the digest pipeline last ran.");
    });
}
