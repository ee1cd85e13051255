// tests/pipeline_e2e.rs
use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use market_news_digest::ai_adapter::{DisabledClient, MockProvider};
use market_news_digest::analyze::topic::TopicSource;
use market_news_digest::cache::{CacheStore, CacheTtl};
use market_news_digest::delivery::MemorySink;
use market_news_digest::ingest::feeds::RssFeed;
use market_news_digest::ingest::resolve::{LocatorResolver, ResolveError};
use market_news_digest::{
    run_once, Digest, DigestSink, FeedSource, PipelineConfig, Pipeline, SelectionKind,
    TrackedEntity,
};
use std::sync::Arc;

const FEED: &str = r#"<rss version="2.0"><channel><title>fixture</title>
<item>
  <title>台積電 9月營收 年增 36%</title>
  <link>https://agg.test/r/1</link>
  <pubDate>Sun, 18 Oct 2026 02:00:00 +0000</pubDate>
  <description>TSMC revenue hits record</description>
  <source url="https://money.test">經濟日報</source>
</item>
<item>
  <title>TSMC board approves capex</title>
  <link>https://agg.test/r/2</link>
  <pubDate>Sat, 17 Oct 2026 20:00:00 +0000</pubDate>
  <description>Board meeting announcement</description>
</item>
<item>
  <title>Quanta server orders climb</title>
  <link>https://agg.test/r/3</link>
  <pubDate>Mon, 12 Oct 2026 08:00:00 +0000</pubDate>
  <description>AI server demand</description>
</item>
<item>
  <title>Broken link story about TSMC</title>
  <link>https://agg.test/r/broken</link>
  <pubDate>Sun, 18 Oct 2026 01:00:00 +0000</pubDate>
</item>
</channel></rss>"#;

struct Identity;

#[async_trait]
impl LocatorResolver for Identity {
    async fn resolve(&self, locator: &str) -> Result<String, ResolveError> {
        if locator.ends_with("broken") {
            return Err(ResolveError::Http("404 Not Found".into()));
        }
        Ok(locator.replace("agg.test/r", "paper.test/story"))
    }
}

struct FailingSink;

#[async_trait]
impl DigestSink for FailingSink {
    async fn deliver(&self, _digest: &Digest) -> Result<()> {
        anyhow::bail!("no destination")
    }
    fn name(&self) -> &str {
        "failing"
    }
}

fn entity(name: &str, code: &str, alias: &str) -> TrackedEntity {
    TrackedEntity {
        name: name.into(),
        code: code.into(),
        aliases: vec![alias.into()],
        sector: String::new(),
    }
}

fn config(cache_path: &std::path::Path) -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.cache.path = cache_path.display().to_string();
    cfg.limits.resolve_backoff_ms = 0;
    cfg.limits.classifier_timeout_secs = 2;
    cfg.entities = vec![
        entity("台積電", "2330", "TSMC"),
        entity("創見", "2451", "Transcend"),
        entity("廣達", "2382", "Quanta"),
    ];
    cfg
}

fn feeds() -> Vec<Box<dyn FeedSource>> {
    vec![Box::new(RssFeed::from_fixture("fixture", FEED))]
}

/// Answers by stage, recognised from the system prompt.
fn scripted_classifier() -> MockProvider {
    MockProvider::new(|system, user| {
        if system.contains("\"results\"") {
            let n = user.matches("\"index\"").count();
            let results: Vec<String> = (1..=n)
                .map(|i| format!(r#"{{"index":{i},"verdict":"relevant","score":0.{}}}"#, 9 - i.min(8)))
                .collect();
            Some(format!(r#"{{"results":[{}]}}"#, results.join(",")))
        } else if system.contains("\"clusters\"") {
            Some(r#"{"clusters":[{"theme":"revenue x capex","member_indices":[1,2]}],"is_single_event":true}"#.to_string())
        } else {
            Some(r#"{"statement":"Tracked for revenue momentum."}"#.to_string())
        }
    })
}

#[tokio::test]
async fn full_run_with_classifier() {
    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("news_cache.json");
    let cfg = config(&cache_path);
    let cache = Arc::new(CacheStore::load(&cache_path, cfg.cache_ttl()));
    let pipeline = Pipeline::new(cfg, cache, Arc::new(scripted_classifier()), Arc::new(Identity));
    let sink = MemorySink::new();
    let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();

    let digest = run_once(&feeds(), &pipeline, &sink, now).await.unwrap();
    assert_eq!(sink.delivered().len(), 1);

    let codes: Vec<_> = digest.entities.iter().map(|e| e.code.as_str()).collect();
    assert_eq!(codes, vec!["2330", "2451", "2382"]);

    let tsmc = &digest.entities[0];
    assert_eq!(tsmc.window, "today");
    assert_eq!(tsmc.selection, SelectionKind::Window);
    assert_eq!(tsmc.clusters.len(), 1);
    assert!(tsmc.single_event);
    assert_eq!(tsmc.event_description.as_deref(), Some("revenue x capex"));
    assert_eq!(tsmc.topic_source, TopicSource::Fresh);
    assert!(!tsmc.degraded);
    let rep = tsmc.clusters[0].representative.as_ref().unwrap();
    assert_eq!(rep.candidate.publisher, "經濟日報");

    // No matches at all → placeholder.
    let transcend = &digest.entities[1];
    assert_eq!(transcend.selection, SelectionKind::EmptyPlaceholder);
    assert_eq!(transcend.window, "monthly");
    assert!(transcend.clusters[0]
        .representative
        .as_ref()
        .unwrap()
        .candidate
        .is_placeholder());

    // Six days old → weekly window.
    let quanta = &digest.entities[2];
    assert_eq!(quanta.window, "weekly");

    // Cache persisted: three resolved stories, three topics.
    let reloaded = CacheStore::load(&cache_path, CacheTtl::default());
    let stats = reloaded.stats();
    assert_eq!(stats.news, 3);
    assert_eq!(stats.topics, 3);
}

#[tokio::test]
async fn disabled_classifier_still_delivers_every_entity() {
    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("news_cache.json");
    let cfg = config(&cache_path);
    let cache = Arc::new(CacheStore::load(&cache_path, cfg.cache_ttl()));
    let pipeline = Pipeline::new(cfg, cache, Arc::new(DisabledClient), Arc::new(Identity));
    let sink = MemorySink::new();
    let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();

    let digest = run_once(&feeds(), &pipeline, &sink, now).await.unwrap();
    assert_eq!(digest.entities.len(), 3);
    for e in &digest.entities {
        assert!(!e.clusters.is_empty());
        assert!(e.clusters.len() <= 3);
        assert_eq!(e.topic_source, TopicSource::Fallback);
    }
    let tsmc = &digest.entities[0];
    assert!(tsmc.degraded);
    assert_eq!(tsmc.clusters[0].theme, "related news");
    assert_eq!(tsmc.clusters[0].supplementary.len(), 1);
}

#[tokio::test]
async fn failing_sink_is_the_only_fatal_error() {
    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("news_cache.json");
    let cfg = config(&cache_path);
    let cache = Arc::new(CacheStore::load(&cache_path, cfg.cache_ttl()));
    let pipeline = Pipeline::new(cfg, cache, Arc::new(DisabledClient), Arc::new(Identity));
    let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();

    let err = run_once(&feeds(), &pipeline, &FailingSink, now)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("no destination"));
    // The cache was still persisted before delivery.
    assert!(cache_path.exists());
}
