// src/ingest/resolve.rs
//! Bounded-concurrency locator resolution.
//!
//! Every raw item is first looked up in the locator index; hits reuse the
//! cached candidate without touching the network. Misses go through a
//! `LocatorResolver` with a per-attempt timeout and a small retry budget.
//! Items that still fail are dropped. Output order follows the pool, not
//! completion order, so the result is deterministic for a fixed pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use metrics::counter;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheRepository, PutOutcome};
use crate::config::pipeline::Limits;
use crate::ingest::feeds::host_of;
use crate::ingest::types::{NewsCandidate, RawItem};
use crate::metrics::{ensure_described, DEDUP, RESOLVE_CACHE_HITS, RESOLVE_FAILURES};
use crate::signature::{candidate_signature, Signature};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("resolution timed out after {0:?}")]
    Timeout(Duration),
    #[error("http error: {0}")]
    Http(String),
    #[error("locator host is blocked: {0}")]
    Disallowed(String),
    #[error("invalid locator: {0}")]
    Invalid(String),
}

impl ResolveError {
    /// Blocked or malformed locators fail the same way on every attempt.
    fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::Timeout(_) | ResolveError::Http(_))
    }
}

/// Follows a feed locator to its canonical address.
#[async_trait]
pub trait LocatorResolver: Send + Sync {
    async fn resolve(&self, locator: &str) -> Result<String, ResolveError>;
}

/// Redirect-following resolver backed by `reqwest`.
pub struct HttpResolver {
    client: reqwest::Client,
    blocked: Vec<String>,
}

impl HttpResolver {
    pub fn new(blocked_domains: Vec<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent("market-news-digest/0.1")
            .build()?;
        Ok(Self {
            client,
            blocked: blocked_domains,
        })
    }

    fn check_host(&self, url: &reqwest::Url) -> Result<(), ResolveError> {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if self
            .blocked
            .iter()
            .any(|b| host == *b || host.ends_with(&format!(".{b}")))
        {
            return Err(ResolveError::Disallowed(host));
        }
        Ok(())
    }
}

#[async_trait]
impl LocatorResolver for HttpResolver {
    async fn resolve(&self, locator: &str) -> Result<String, ResolveError> {
        let parsed =
            reqwest::Url::parse(locator).map_err(|e| ResolveError::Invalid(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ResolveError::Invalid(format!("scheme {}", parsed.scheme())));
        }
        self.check_host(&parsed)?;

        let resp = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| ResolveError::Http(e.to_string()))?;
        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(ResolveError::Http(status.to_string()));
        }
        let final_url = resp.url().clone();
        self.check_host(&final_url)?;
        Ok(final_url.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ResolveParams {
    pub concurrency: usize,
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
    pub snippet_prefix_chars: usize,
}

impl ResolveParams {
    pub fn from_limits(l: &Limits) -> Self {
        Self {
            concurrency: l.resolver_concurrency.max(1),
            timeout: Duration::from_secs(l.resolve_timeout_secs),
            retries: l.resolve_retries,
            backoff: Duration::from_millis(l.resolve_backoff_ms),
            snippet_prefix_chars: l.snippet_prefix_chars,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolveReport {
    /// Unique by signature, in pool order.
    pub candidates: Vec<NewsCandidate>,
    pub cache_hits: usize,
    pub resolved: usize,
    pub failed: usize,
    pub duplicates: usize,
}

async fn resolve_with_retries(
    resolver: &dyn LocatorResolver,
    locator: &str,
    params: &ResolveParams,
) -> Result<String, ResolveError> {
    let mut last = ResolveError::Timeout(params.timeout);
    for attempt in 0..=params.retries {
        if attempt > 0 && !params.backoff.is_zero() {
            tokio::time::sleep(params.backoff * attempt).await;
        }
        match tokio::time::timeout(params.timeout, resolver.resolve(locator)).await {
            Ok(Ok(url)) => return Ok(url),
            Ok(Err(e)) if !e.is_retryable() => return Err(e),
            Ok(Err(e)) => last = e,
            Err(_) => last = ResolveError::Timeout(params.timeout),
        }
        debug!(target: "resolve", locator, attempt, error = %last, "resolve attempt failed");
    }
    Err(last)
}

fn to_candidate(item: &RawItem, resolved: String) -> NewsCandidate {
    let publisher = item
        .publisher_hint
        .clone()
        .filter(|p| !p.trim().is_empty())
        .or_else(|| host_of(&resolved))
        .unwrap_or_default();
    NewsCandidate {
        title: item.title.clone(),
        snippet: item.snippet.clone(),
        publisher,
        published_at: item.published_at,
        source_locator: Some(item.link.clone()),
        resolved_locator: Some(resolved),
    }
}

/// Resolve a raw pool into unique candidates, writing successes to the cache.
pub async fn resolve_pool(
    items: &[RawItem],
    cache: &dyn CacheRepository,
    resolver: &dyn LocatorResolver,
    params: &ResolveParams,
    now: DateTime<Utc>,
) -> ResolveReport {
    ensure_described();
    let mut report = ResolveReport::default();
    let mut ordered: Vec<(usize, Signature, NewsCandidate)> = Vec::with_capacity(items.len());
    let mut misses: Vec<(usize, &RawItem)> = Vec::new();

    for (idx, item) in items.iter().enumerate() {
        match cache.lookup(&item.link) {
            Some(entry) => {
                report.cache_hits += 1;
                let sig = entry.signature.clone();
                let candidate = entry.candidate.clone();
                cache.put(CacheEntry {
                    cached_at: now,
                    ..entry
                });
                ordered.push((idx, sig, candidate));
            }
            None => misses.push((idx, item)),
        }
    }
    counter!(RESOLVE_CACHE_HITS).increment(report.cache_hits as u64);

    let outcomes: Vec<(usize, &RawItem, Result<String, ResolveError>)> = stream::iter(misses)
        .map(|(idx, item)| async move {
            let res = resolve_with_retries(resolver, &item.link, params).await;
            (idx, item, res)
        })
        .buffer_unordered(params.concurrency.max(1))
        .collect()
        .await;

    for (idx, item, res) in outcomes {
        match res {
            Ok(resolved) => {
                let candidate = to_candidate(item, resolved);
                let sig = candidate_signature(&candidate, params.snippet_prefix_chars);
                let outcome = cache.put(CacheEntry {
                    signature: sig.clone(),
                    candidate: candidate.clone(),
                    cached_at: now,
                });
                if outcome == PutOutcome::Refreshed {
                    debug!(target: "resolve", signature = %sig, "known signature refreshed");
                }
                cache.index_locator(&item.link, &sig);
                report.resolved += 1;
                ordered.push((idx, sig, candidate));
            }
            Err(e) => {
                warn!(target: "resolve", locator = %item.link, error = %e, "candidate dropped");
                counter!(RESOLVE_FAILURES).increment(1);
                report.failed += 1;
            }
        }
    }

    ordered.sort_by_key(|(idx, _, _)| *idx);
    let mut seen: HashSet<Signature> = HashSet::new();
    for (_, sig, candidate) in ordered {
        if seen.insert(sig) {
            report.candidates.push(candidate);
        } else {
            report.duplicates += 1;
        }
    }
    counter!(DEDUP).increment(report.duplicates as u64);

    info!(
        target: "resolve",
        unique = report.candidates.len(),
        cache_hits = report.cache_hits,
        resolved = report.resolved,
        failed = report.failed,
        duplicates = report.duplicates,
        "pool resolved"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_host_and_subdomains_are_disallowed() {
        let r = HttpResolver::new(vec!["blocked.test".into()]).unwrap();
        let sub = reqwest::Url::parse("https://news.blocked.test/a").unwrap();
        let other = reqwest::Url::parse("https://notblocked.test/a").unwrap();
        assert!(matches!(r.check_host(&sub), Err(ResolveError::Disallowed(_))));
        assert!(r.check_host(&other).is_ok());
    }

    #[tokio::test]
    async fn malformed_locator_is_invalid() {
        let r = HttpResolver::new(vec![]).unwrap();
        assert!(matches!(
            r.resolve("not a url").await,
            Err(ResolveError::Invalid(_))
        ));
        assert!(matches!(
            r.resolve("ftp://files.test/x").await,
            Err(ResolveError::Invalid(_))
        ));
    }

    #[test]
    fn publisher_falls_back_to_resolved_host() {
        let item = RawItem {
            title: "t".into(),
            snippet: String::new(),
            publisher_hint: None,
            link: "https://agg.test/r/1".into(),
            published_at: None,
        };
        let c = to_candidate(&item, "https://www.paper.test/story".into());
        assert_eq!(c.publisher, "paper.test");
        assert_eq!(c.source_locator.as_deref(), Some("https://agg.test/r/1"));
    }
}
