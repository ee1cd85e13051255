// src/delivery.rs
//! Structural assembly of the run's digest and the sinks it is delivered to.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::analyze::cluster::{Cluster, ClusteringOutcome};
use crate::analyze::topic::{TopicSource, TopicStatement};
use crate::matcher::TrackedEntity;
use crate::window::{Selection, SelectionKind};

pub const DEFAULT_OUTPUT_PATH: &str = "out/digest.json";
pub const ENV_OUTPUT_PATH: &str = "DIGEST_OUTPUT_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityDigest {
    pub name: String,
    pub code: String,
    pub window: String,
    pub selection: SelectionKind,
    pub topic_statement: String,
    pub topic_source: TopicSource,
    pub clusters: Vec<Cluster>,
    pub single_event: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_description: Option<String>,
    /// True when any classifier stage fell back for this entity.
    pub degraded: bool,
}

impl EntityDigest {
    pub fn new(
        entity: &TrackedEntity,
        selection: &Selection,
        topic: TopicStatement,
        clustering: ClusteringOutcome,
        relevance_fell_back: bool,
    ) -> Self {
        Self {
            name: entity.name.clone(),
            code: entity.code.clone(),
            window: selection.window.clone(),
            selection: selection.kind,
            topic_statement: topic.text,
            topic_source: topic.source,
            clusters: clustering.clusters,
            single_event: clustering.single_event,
            event_description: clustering.event_description,
            degraded: relevance_fell_back || clustering.fell_back,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Digest {
    pub generated_at: DateTime<Utc>,
    pub entities: Vec<EntityDigest>,
}

/// Order the per-entity results like the registry. Results for codes not in
/// the registry are dropped.
pub fn assemble(
    registry: &[TrackedEntity],
    mut results: Vec<EntityDigest>,
    generated_at: DateTime<Utc>,
) -> Digest {
    let mut entities = Vec::with_capacity(registry.len());
    for e in registry {
        if let Some(pos) = results.iter().position(|r| r.code == e.code) {
            entities.push(results.swap_remove(pos));
        }
    }
    Digest {
        generated_at,
        entities,
    }
}

#[async_trait]
pub trait DigestSink: Send + Sync {
    async fn deliver(&self, digest: &Digest) -> Result<()>;
    fn name(&self) -> &str;
}

/// Writes the digest as pretty JSON, replacing the file atomically.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// `$DIGEST_OUTPUT_PATH`, else `out/digest.json`.
    pub fn from_env() -> Self {
        let p = std::env::var(ENV_OUTPUT_PATH).unwrap_or_else(|_| DEFAULT_OUTPUT_PATH.to_string());
        Self::new(p)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DigestSink for JsonFileSink {
    async fn deliver(&self, digest: &Digest) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating output dir {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(digest).context("serializing digest")?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp)
                .with_context(|| format!("creating {}", tmp.display()))?;
            f.write_all(json.as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        tracing::info!(target: "delivery", path = %self.path.display(), entities = digest.entities.len(), "digest written");
        Ok(())
    }

    fn name(&self) -> &str {
        "json-file"
    }
}

/// Keeps every delivered digest in memory.
#[derive(Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<Digest>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Digest> {
        self.delivered
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DigestSink for MemorySink {
    async fn deliver(&self, digest: &Digest) -> Result<()> {
        self.delivered
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .push(digest.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ed(code: &str) -> EntityDigest {
        EntityDigest {
            name: code.into(),
            code: code.into(),
            window: "today".into(),
            selection: SelectionKind::Window,
            topic_statement: "t".into(),
            topic_source: TopicSource::Fallback,
            clusters: Vec::new(),
            single_event: false,
            event_description: None,
            degraded: false,
        }
    }

    fn reg(codes: &[&str]) -> Vec<TrackedEntity> {
        codes
            .iter()
            .map(|c| TrackedEntity {
                name: c.to_string(),
                code: c.to_string(),
                aliases: Vec::new(),
                sector: String::new(),
            })
            .collect()
    }

    #[test]
    fn assemble_follows_registry_order() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();
        let d = assemble(&reg(&["2330", "2451", "8271"]), vec![ed("8271"), ed("2330"), ed("2451")], at);
        let codes: Vec<_> = d.entities.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec!["2330", "2451", "8271"]);
    }

    #[tokio::test]
    async fn json_sink_creates_directory_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/digest.json");
        let sink = JsonFileSink::new(&path);
        let d = Digest {
            generated_at: Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap(),
            entities: vec![ed("2330")],
        };
        sink.deliver(&d).await.unwrap();
        let back: Digest = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, d);
    }
}
