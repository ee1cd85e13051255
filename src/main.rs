//! Digest runner: binary entrypoint
//! Loads configuration, runs the pipeline once and writes the digest.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_news_digest::ai_adapter::build_client_from_config;
use market_news_digest::cache::CacheStore;
use market_news_digest::config::{AiConfig, PipelineConfig};
use market_news_digest::ingest::feeds::RssFeed;
use market_news_digest::ingest::resolve::HttpResolver;
use market_news_digest::{run_once, FeedSource, JsonFileSink, Pipeline};

/// `RUST_LOG` wins; otherwise `market_news_digest=info,warn`.
/// `DIGEST_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_news_digest=info,warn"));
    let json = std::env::var("DIGEST_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PipelineConfig::load_default().context("loading digest config")?;
    let ai_cfg = AiConfig::load_default().context("loading ai config")?;

    let cache = Arc::new(CacheStore::load(&cfg.cache.path, cfg.cache_ttl()));
    let client = build_client_from_config(&ai_cfg);
    let resolver = Arc::new(HttpResolver::new(cfg.resolver.blocked_domains.clone())?);

    let feed_timeout = Duration::from_secs(cfg.limits.resolve_timeout_secs.max(10));
    let mut feeds: Vec<Box<dyn FeedSource>> = Vec::with_capacity(cfg.feeds.len());
    for url in &cfg.feeds {
        match RssFeed::from_url(url, feed_timeout) {
            Ok(f) => feeds.push(Box::new(f)),
            Err(e) => tracing::warn!(error = ?e, feed = %url, "skipping feed"),
        }
    }

    tracing::info!(
        entities = cfg.entities.len(),
        feeds = feeds.len(),
        classifier = client.provider_name(),
        "starting digest run"
    );

    let sink = JsonFileSink::from_env();
    let pipeline = Pipeline::new(cfg, cache, client, resolver);
    let digest = run_once(&feeds, &pipeline, &sink, Utc::now()).await?;

    for e in &digest.entities {
        tracing::info!(
            entity = %e.code,
            window = %e.window,
            clusters = e.clusters.len(),
            single_event = e.single_event,
            degraded = e.degraded,
            "delivered"
        );
    }
    Ok(())
}
