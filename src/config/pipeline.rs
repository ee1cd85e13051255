// src/config/pipeline.rs
//! Pipeline configuration: windows, TTLs, batch caps, feeds and the tracked
//! entity registry, loaded from `config/digest.toml`.

use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::analyze::cluster::{MAX_CLUSTERS, MAX_SUPPLEMENTARY};
use crate::cache::{CacheTtl, DEFAULT_NEWS_TTL_DAYS, DEFAULT_TOPIC_TTL_DAYS};
use crate::matcher::{MatchParams, TrackedEntity};
use crate::signature::DEFAULT_SNIPPET_PREFIX_CHARS;
use crate::window::{default_windows, Window};

pub const DEFAULT_DIGEST_CONFIG_PATH: &str = "config/digest.toml";
pub const ENV_DIGEST_CONFIG_PATH: &str = "DIGEST_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSection {
    pub path: String,
    pub news_ttl_days: i64,
    pub topic_ttl_days: i64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            path: "cache/news_cache.json".to_string(),
            news_ttl_days: DEFAULT_NEWS_TTL_DAYS,
            topic_ttl_days: DEFAULT_TOPIC_TTL_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Limits {
    pub scoring_batch: usize,
    pub max_clusters: usize,
    pub max_supplementary: usize,
    pub resolver_concurrency: usize,
    pub resolve_timeout_secs: u64,
    pub resolve_retries: u32,
    pub resolve_backoff_ms: u64,
    pub classifier_timeout_secs: u64,
    pub max_pool_entries: usize,
    pub snippet_prefix_chars: usize,
    pub secondary_match_threshold: usize,
    pub sector_prefix_chars: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            scoring_batch: 15,
            max_clusters: 3,
            max_supplementary: 2,
            resolver_concurrency: 10,
            resolve_timeout_secs: 3,
            resolve_retries: 2,
            resolve_backoff_ms: 500,
            classifier_timeout_secs: 30,
            max_pool_entries: 800,
            snippet_prefix_chars: DEFAULT_SNIPPET_PREFIX_CHARS,
            secondary_match_threshold: 5,
            sector_prefix_chars: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusteringSection {
    /// Share of relevant items one cluster must cover to flag a single event.
    pub single_event_min_share: f32,
    /// Fewer relevant items than this never count as a single event.
    pub single_event_min_items: usize,
}

impl Default for ClusteringSection {
    fn default() -> Self {
        Self {
            single_event_min_share: 1.0,
            single_event_min_items: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolverSection {
    pub blocked_domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub windows: Vec<Window>,
    pub cache: CacheSection,
    pub limits: Limits,
    pub clustering: ClusteringSection,
    pub resolver: ResolverSection,
    pub feeds: Vec<String>,
    pub entities: Vec<TrackedEntity>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            windows: default_windows(),
            cache: CacheSection::default(),
            limits: Limits::default(),
            clustering: ClusteringSection::default(),
            resolver: ResolverSection::default(),
            feeds: default_feeds(),
            entities: default_entities(),
        }
    }
}

fn default_feeds() -> Vec<String> {
    [
        "https://tw.stock.yahoo.com/rss",
        "https://money.udn.com/rssfeed/news/1001/5591?ch=money",
        "https://ctee.com.tw/feed",
        "https://news.google.com/rss/search?q=台積電+OR+TSMC&hl=zh-TW&gl=TW&ceid=TW:zh-Hant",
        "https://news.google.com/rss/search?q=創見+OR+Transcend&hl=zh-TW&gl=TW&ceid=TW:zh-Hant",
        "https://news.google.com/rss/search?q=宇瞻+OR+Apacer&hl=zh-TW&gl=TW&ceid=TW:zh-Hant",
        "https://news.google.com/rss/search?q=廣達+OR+Quanta&hl=zh-TW&gl=TW&ceid=TW:zh-Hant",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_entities() -> Vec<TrackedEntity> {
    let e = |name: &str, code: &str, aliases: &[&str], sector: &str| TrackedEntity {
        name: name.to_string(),
        code: code.to_string(),
        aliases: aliases.iter().map(|s| s.to_string()).collect(),
        sector: sector.to_string(),
    };
    vec![
        e("台積電", "2330", &["TSMC"], "半導體晶圓代工"),
        e("創見", "2451", &["Transcend"], "記憶體模組"),
        e("宇瞻", "8271", &["Apacer"], "記憶體模組"),
        e("廣達", "2382", &["Quanta"], "伺服器代工"),
    ]
}

impl PipelineConfig {
    /// Resolve the path from `$DIGEST_CONFIG_PATH`, else `config/digest.toml`.
    /// A missing file yields built-in defaults; a broken one is an error.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_DIGEST_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("DIGEST_CONFIG_PATH points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        let pb = PathBuf::from(DEFAULT_DIGEST_CONFIG_PATH);
        if pb.exists() {
            return Self::load_from(&pb);
        }
        info!(target: "config", "no digest config found; using built-in defaults");
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading digest config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing digest config {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: PipelineConfig = toml::from_str(s)?;
        Ok(cfg.sanitized())
    }

    /// Replace nonsensical values with defaults and order windows narrowest first.
    pub fn sanitized(mut self) -> Self {
        let d = Limits::default();
        let l = &mut self.limits;
        let fix = |v: &mut usize, default: usize, name: &str| {
            if *v == 0 {
                warn!(target: "config", field = name, "zero limit replaced with default");
                *v = default;
            }
        };
        fix(&mut l.scoring_batch, d.scoring_batch, "scoring_batch");
        fix(&mut l.max_clusters, d.max_clusters, "max_clusters");
        fix(
            &mut l.resolver_concurrency,
            d.resolver_concurrency,
            "resolver_concurrency",
        );
        fix(&mut l.max_pool_entries, d.max_pool_entries, "max_pool_entries");
        fix(
            &mut l.snippet_prefix_chars,
            d.snippet_prefix_chars,
            "snippet_prefix_chars",
        );
        if l.max_clusters > MAX_CLUSTERS {
            warn!(target: "config", value = l.max_clusters, cap = MAX_CLUSTERS, "max_clusters clamped");
            l.max_clusters = MAX_CLUSTERS;
        }
        if l.max_supplementary > MAX_SUPPLEMENTARY {
            warn!(target: "config", value = l.max_supplementary, cap = MAX_SUPPLEMENTARY, "max_supplementary clamped");
            l.max_supplementary = MAX_SUPPLEMENTARY;
        }
        if l.resolve_timeout_secs == 0 {
            l.resolve_timeout_secs = d.resolve_timeout_secs;
        }
        if l.classifier_timeout_secs == 0 {
            l.classifier_timeout_secs = d.classifier_timeout_secs;
        }

        if self.cache.news_ttl_days <= 0 {
            self.cache.news_ttl_days = DEFAULT_NEWS_TTL_DAYS;
        }
        if self.cache.topic_ttl_days <= 0 {
            self.cache.topic_ttl_days = DEFAULT_TOPIC_TTL_DAYS;
        }

        let c = &mut self.clustering;
        if !c.single_event_min_share.is_finite() || !(0.0..=1.0).contains(&c.single_event_min_share)
        {
            c.single_event_min_share = ClusteringSection::default().single_event_min_share;
        }
        if c.single_event_min_items < 2 {
            c.single_event_min_items = 2;
        }

        self.windows.retain(|w| w.days > 0 && !w.label.trim().is_empty());
        if self.windows.is_empty() {
            self.windows = default_windows();
        }
        self.windows.sort_by_key(|w| w.days);

        self.feeds = self
            .feeds
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        self.resolver.blocked_domains = self
            .resolver
            .blocked_domains
            .into_iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        self
    }

    pub fn cache_ttl(&self) -> CacheTtl {
        CacheTtl {
            news: Duration::days(self.cache.news_ttl_days),
            topics: Duration::days(self.cache.topic_ttl_days),
        }
    }

    pub fn match_params(&self) -> MatchParams {
        MatchParams {
            secondary_threshold: self.limits.secondary_match_threshold,
            sector_prefix_chars: self.limits.sector_prefix_chars,
        }
    }

    pub fn classifier_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.limits.classifier_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
feeds = [" https://feed.test/rss ", ""]

[limits]
scoring_batch = 0
max_clusters = 2

[[entities]]
name = "Alpha"
code = "1111"
aliases = ["ALP"]
sector = "Widgets"
"#,
        )
        .unwrap();
        assert_eq!(cfg.limits.scoring_batch, 15);
        assert_eq!(cfg.limits.max_clusters, 2);
        assert_eq!(cfg.limits.resolver_concurrency, 10);
        assert_eq!(cfg.feeds, vec!["https://feed.test/rss".to_string()]);
        assert_eq!(cfg.entities.len(), 1);
        assert_eq!(cfg.windows, default_windows());
        assert_eq!(cfg.cache.news_ttl_days, 30);
    }

    #[test]
    fn windows_are_sorted_and_cleaned() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
[[windows]]
label = "monthly"
days = 30

[[windows]]
label = "today"
days = 1

[[windows]]
label = "broken"
days = 0
"#,
        )
        .unwrap();
        let labels: Vec<_> = cfg.windows.iter().map(|w| w.label.as_str()).collect();
        assert_eq!(labels, vec!["today", "monthly"]);
    }

    #[test]
    fn cluster_limits_are_clamped() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
[limits]
max_clusters = 7
max_supplementary = 5
"#,
        )
        .unwrap();
        assert_eq!(cfg.limits.max_clusters, 3);
        assert_eq!(cfg.limits.max_supplementary, 2);

        let zero = PipelineConfig::from_toml_str("[limits]\nmax_supplementary = 0\n").unwrap();
        assert_eq!(zero.limits.max_supplementary, 0);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(PipelineConfig::from_toml_str("limits = 3").is_err());
    }
}
