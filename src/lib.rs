// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod cache;
pub mod config;
pub mod delivery;
pub mod ingest;
pub mod matcher;
pub mod metrics;
pub mod pipeline;
pub mod signature;
pub mod window;

// Relevance scoring, clustering, information value and topic statements.
pub mod analyze;

// ---- Re-exports for stable public API ----
pub use analyze::ai_adapter;
pub use crate::cache::{CacheEntry, CacheRepository, CacheStore, TopicEntry};
pub use crate::config::pipeline::PipelineConfig;
pub use crate::delivery::{Digest, DigestSink, EntityDigest, JsonFileSink};
pub use crate::ingest::types::{FeedSource, NewsCandidate, RawItem};
pub use crate::matcher::TrackedEntity;
pub use crate::pipeline::{run_once, Pipeline};
pub use crate::signature::Signature;
pub use crate::window::{Selection, SelectionKind, Window};
