// src/pipeline.rs
//! One parameterized run: collect → resolve → per entity (match → window →
//! relevance → clusters → topic) → assemble → deliver.
//!
//! Per-entity work runs concurrently and shares nothing mutable except the
//! cache store. Every stage recovers locally; the only error `run_once`
//! returns is a failed delivery.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, gauge};
use std::sync::Arc;
use tracing::{info, warn};

use crate::analyze::ai_adapter::DynLlmClient;
use crate::analyze::cluster::{cluster_topics, ClusterParams};
use crate::analyze::relevance::score_relevance;
use crate::analyze::topic::TopicSummarizer;
use crate::cache::{CacheRepository, CacheStore};
use crate::config::PipelineConfig;
use crate::delivery::{assemble, Digest, DigestSink, EntityDigest};
use crate::ingest::collect_pool;
use crate::ingest::resolve::{resolve_pool, LocatorResolver, ResolveParams};
use crate::ingest::types::{FeedSource, NewsCandidate, RawItem};
use crate::matcher::{match_candidates, TrackedEntity};
use crate::metrics::{ensure_described, CACHE_EVICTED, LAST_RUN_TS, WINDOW_SELECTED};
use crate::window::select_window;

pub struct Pipeline {
    cfg: PipelineConfig,
    cache: Arc<CacheStore>,
    client: DynLlmClient,
    resolver: Arc<dyn LocatorResolver>,
}

impl Pipeline {
    pub fn new(
        cfg: PipelineConfig,
        cache: Arc<CacheStore>,
        client: DynLlmClient,
        resolver: Arc<dyn LocatorResolver>,
    ) -> Self {
        Self {
            cfg,
            cache,
            client,
            resolver,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Resolve the raw pool and build one digest entry per tracked entity.
    pub async fn run(&self, raw: &[RawItem], now: DateTime<Utc>) -> Digest {
        ensure_described();
        let params = ResolveParams::from_limits(&self.cfg.limits);
        let report = resolve_pool(raw, self.cache.as_ref(), self.resolver.as_ref(), &params, now).await;

        let results = join_all(
            self.cfg
                .entities
                .iter()
                .map(|e| self.process_entity(e, &report.candidates, now)),
        )
        .await;

        assemble(&self.cfg.entities, results, now)
    }

    pub async fn process_entity(
        &self,
        entity: &TrackedEntity,
        pool: &[NewsCandidate],
        now: DateTime<Utc>,
    ) -> EntityDigest {
        let matched = match_candidates(entity, pool, &self.cfg.match_params());
        let selection = select_window(&matched.candidates, &self.cfg.windows, now);
        counter!(
            WINDOW_SELECTED,
            "window" => selection.window.clone(),
            "kind" => selection.kind.as_str()
        )
        .increment(1);

        let timeout = self.cfg.classifier_timeout();
        let scoring = score_relevance(
            self.client.as_ref(),
            entity,
            &selection.candidates,
            self.cfg.limits.scoring_batch,
            timeout,
        )
        .await;

        let clustering = cluster_topics(
            self.client.as_ref(),
            entity,
            &scoring.items,
            &ClusterParams::from_config(&self.cfg),
        )
        .await;

        let topic = TopicSummarizer::new(
            self.client.as_ref(),
            self.cache.as_ref(),
            self.cfg.cache_ttl().topics,
            timeout,
        )
        .statement(entity, now)
        .await;

        info!(
            target: "pipeline",
            entity = %entity.label(),
            matched = matched.candidates.len(),
            window = %selection.window,
            kind = selection.kind.as_str(),
            relevant = scoring.items.len(),
            clusters = clustering.clusters.len(),
            "entity processed"
        );

        EntityDigest::new(entity, &selection, topic, clustering, scoring.fell_back)
    }
}

/// One full execution against live feeds. Cache persistence problems are
/// logged; only a failed delivery is an error.
pub async fn run_once(
    feeds: &[Box<dyn FeedSource>],
    pipeline: &Pipeline,
    sink: &dyn DigestSink,
    now: DateTime<Utc>,
) -> Result<Digest> {
    ensure_described();

    let evicted = pipeline.cache().evict(now);
    counter!(CACHE_EVICTED, "section" => "news").increment(evicted.news as u64);
    counter!(CACHE_EVICTED, "section" => "topics").increment(evicted.topics as u64);
    counter!(CACHE_EVICTED, "section" => "locators").increment(evicted.locators as u64);
    info!(
        target: "pipeline",
        news = evicted.news,
        topics = evicted.topics,
        locators = evicted.locators,
        "cache evicted"
    );

    let (raw, feed_errors) = collect_pool(feeds, pipeline.config().limits.max_pool_entries).await;
    let digest = pipeline.run(&raw, now).await;

    if let Err(e) = pipeline.cache().save() {
        warn!(target: "pipeline", error = ?e, "cache save failed; next run starts colder");
    }
    let stats = pipeline.cache().stats();
    info!(
        target: "pipeline",
        feed_errors,
        cached_news = stats.news,
        cached_topics = stats.topics,
        "run complete"
    );

    sink.deliver(&digest)
        .await
        .with_context(|| format!("delivering digest via {}", sink.name()))?;
    gauge!(LAST_RUN_TS).set(now.timestamp() as f64);
    Ok(digest)
}
