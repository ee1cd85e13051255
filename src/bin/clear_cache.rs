//! Empties the news cache, topic cache and locator index, stamping who cleared it,
//! and deletes cached classifier responses. The daily classifier counter and the
//! configuration files are left untouched.

use anyhow::{Context, Result};
use market_news_digest::ai_adapter::{clear_response_cache, default_cache_dir};
use market_news_digest::cache::CacheStore;
use market_news_digest::PipelineConfig;

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = PipelineConfig::load_default().context("loading digest config")?;
    let store = CacheStore::load(&cfg.cache.path, cfg.cache_ttl());

    let before = store.stats();
    tracing::info!(
        path = %cfg.cache.path,
        news = before.news,
        topics = before.topics,
        locators = before.locators,
        "current cache"
    );

    store.clear("clear_cache");
    store.save().context("saving cleared cache")?;

    let ai_dir = default_cache_dir();
    let responses = clear_response_cache(&ai_dir)
        .with_context(|| format!("clearing classifier responses in {}", ai_dir.display()))?;

    tracing::info!(
        path = %cfg.cache.path,
        cleared_at = ?store.cleared_at(),
        responses,
        "cache cleared"
    );
    Ok(())
}
