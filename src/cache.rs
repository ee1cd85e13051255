//! # Cache Store
//!
//! Resolved candidates keyed by signature, per-entity topic statements, and a
//! locator → signature index that lets a run skip re-resolving known links.
//!
//! - Each section lives in its own `DashMap`, so a per-signature check-then-set
//!   is atomic while the resolver pool writes concurrently.
//! - `evict(now)` drops news older than the news TTL and topics older than the
//!   topic TTL, then prunes index entries that point at evicted signatures.
//! - `load`/`save` read and replace one JSON document. A missing or unparsable
//!   document is an empty store, never an error.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ingest::types::NewsCandidate;
use crate::signature::Signature;

pub const DEFAULT_NEWS_TTL_DAYS: i64 = 30;
pub const DEFAULT_TOPIC_TTL_DAYS: i64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub signature: Signature,
    pub candidate: NewsCandidate,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicEntry {
    pub statement: String,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl {
    pub news: Duration,
    pub topics: Duration,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            news: Duration::days(DEFAULT_NEWS_TTL_DAYS),
            topics: Duration::days(DEFAULT_TOPIC_TTL_DAYS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Refreshed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub news: usize,
    pub topics: usize,
    pub locators: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub news: usize,
    pub topics: usize,
    pub locators: usize,
}

/// Keyed repository over cached candidates and topic statements.
pub trait CacheRepository: Send + Sync {
    /// Cached entry for a feed locator, if the index points at a live entry.
    fn lookup(&self, locator: &str) -> Option<CacheEntry>;
    fn get(&self, signature: &Signature) -> Option<CacheEntry>;
    /// Insert, or refresh an existing signature (newest `cached_at` is kept).
    fn put(&self, entry: CacheEntry) -> PutOutcome;
    fn index_locator(&self, locator: &str, signature: &Signature);
    fn topic(&self, entity_code: &str) -> Option<TopicEntry>;
    fn put_topic(&self, entity_code: &str, entry: TopicEntry);
    fn evict(&self, now: DateTime<Utc>) -> EvictionReport;
}

/// On-disk shape. Section names are part of the persisted format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(default)]
    news: BTreeMap<Signature, CacheEntry>,
    #[serde(default)]
    topics: BTreeMap<String, TopicEntry>,
    #[serde(default)]
    url_to_signature: BTreeMap<String, Signature>,
    #[serde(default)]
    cleared_at: Option<DateTime<Utc>>,
    #[serde(default)]
    cleared_by: Option<String>,
}

#[derive(Debug, Default)]
struct ClearMarker {
    at: Option<DateTime<Utc>>,
    by: Option<String>,
}

#[derive(Debug)]
pub struct CacheStore {
    path: Option<PathBuf>,
    ttl: CacheTtl,
    news: DashMap<Signature, CacheEntry>,
    topics: DashMap<String, TopicEntry>,
    url_index: DashMap<String, Signature>,
    cleared: Mutex<ClearMarker>,
}

impl CacheStore {
    /// Store without a backing file; `save` is a no-op.
    pub fn in_memory(ttl: CacheTtl) -> Self {
        Self {
            path: None,
            ttl,
            news: DashMap::new(),
            topics: DashMap::new(),
            url_index: DashMap::new(),
            cleared: Mutex::new(ClearMarker::default()),
        }
    }

    /// Read the document at `path`. Missing or corrupt → empty store bound to `path`.
    pub fn load<P: AsRef<Path>>(path: P, ttl: CacheTtl) -> Self {
        let path = path.as_ref().to_path_buf();
        let doc = match fs::read_to_string(&path) {
            Ok(s) => match serde_json::from_str::<CacheDocument>(&s) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(target: "cache", path = %path.display(), error = %e, "cache unparsable; starting cold");
                    CacheDocument::default()
                }
            },
            Err(e) => {
                debug!(target: "cache", path = %path.display(), error = %e, "no cache file; starting cold");
                CacheDocument::default()
            }
        };

        let store = Self::in_memory(ttl);
        for (sig, entry) in doc.news {
            store.news.insert(sig, entry);
        }
        for (code, topic) in doc.topics {
            store.topics.insert(code, topic);
        }
        for (loc, sig) in doc.url_to_signature {
            store.url_index.insert(loc, sig);
        }
        {
            let mut m = store.lock_marker();
            m.at = doc.cleared_at;
            m.by = doc.cleared_by;
        }

        let stats = store.stats();
        info!(
            target: "cache",
            news = stats.news,
            topics = stats.topics,
            locators = stats.locators,
            "cache loaded"
        );
        Self {
            path: Some(path),
            ..store
        }
    }

    pub fn ttl(&self) -> CacheTtl {
        self.ttl
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            news: self.news.len(),
            topics: self.topics.len(),
            locators: self.url_index.len(),
        }
    }

    pub fn cleared_at(&self) -> Option<DateTime<Utc>> {
        self.lock_marker().at
    }

    /// Drop every section and stamp the clearing marker.
    pub fn clear(&self, by: &str) {
        self.news.clear();
        self.topics.clear();
        self.url_index.clear();
        let mut m = self.lock_marker();
        m.at = Some(Utc::now());
        m.by = Some(by.to_string());
    }

    /// Replace the backing document atomically (temp file + rename).
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let (cleared_at, cleared_by) = {
            let m = self.lock_marker();
            (m.at, m.by.clone())
        };
        let doc = CacheDocument {
            news: self
                .news
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            topics: self
                .topics
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            url_to_signature: self
                .url_index
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            cleared_at,
            cleared_by,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating cache dir {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(&doc).context("serializing cache")?;
        let tmp = path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(json.as_bytes())
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    fn lock_marker(&self) -> std::sync::MutexGuard<'_, ClearMarker> {
        match self.cleared.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

impl CacheRepository for CacheStore {
    fn lookup(&self, locator: &str) -> Option<CacheEntry> {
        let sig = self.url_index.get(locator)?.value().clone();
        self.news.get(&sig).map(|e| e.value().clone())
    }

    fn get(&self, signature: &Signature) -> Option<CacheEntry> {
        self.news.get(signature).map(|e| e.value().clone())
    }

    fn put(&self, entry: CacheEntry) -> PutOutcome {
        match self.news.entry(entry.signature.clone()) {
            Entry::Occupied(mut o) => {
                let cached_at = o.get().cached_at.max(entry.cached_at);
                o.insert(CacheEntry { cached_at, ..entry });
                PutOutcome::Refreshed
            }
            Entry::Vacant(v) => {
                v.insert(entry);
                PutOutcome::Inserted
            }
        }
    }

    fn index_locator(&self, locator: &str, signature: &Signature) {
        self.url_index
            .insert(locator.to_string(), signature.clone());
    }

    fn topic(&self, entity_code: &str) -> Option<TopicEntry> {
        self.topics.get(entity_code).map(|e| e.value().clone())
    }

    fn put_topic(&self, entity_code: &str, entry: TopicEntry) {
        self.topics.insert(entity_code.to_string(), entry);
    }

    fn evict(&self, now: DateTime<Utc>) -> EvictionReport {
        let news_before = self.news.len();
        self.news
            .retain(|_, e| now.signed_duration_since(e.cached_at) <= self.ttl.news);
        let topics_before = self.topics.len();
        self.topics
            .retain(|_, e| now.signed_duration_since(e.cached_at) <= self.ttl.topics);
        let locators_before = self.url_index.len();
        self.url_index.retain(|_, sig| self.news.contains_key(sig));

        EvictionReport {
            news: news_before - self.news.len(),
            topics: topics_before - self.topics.len(),
            locators: locators_before - self.url_index.len(),
        }
    }
}
