// src/analyze/mod.rs
//! Classifier-backed stages: relevance scoring, topic clustering and the
//! per-entity topic statement. Each stage owns its fallback; nothing here
//! returns an error to the pipeline.

pub mod ai_adapter;
pub mod cluster;
pub mod relevance;
pub mod topic;
pub mod value;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::analyze::ai_adapter::LlmClient;
use crate::ingest::types::NewsCandidate;
use crate::matcher::TrackedEntity;

pub use crate::analyze::cluster::{cluster_topics, Cluster, ClusterParams, ClusteringOutcome};
pub use crate::analyze::relevance::{score_relevance, ScoredCandidate, ScoringOutcome, Verdict};
pub use crate::analyze::topic::{TopicSource, TopicStatement, TopicSummarizer};
pub use crate::analyze::value::InformationValue;

/// Snippets sent to the classifier are cut to this many chars.
const REQUEST_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("no JSON object found in classifier response")]
    NoJsonObject,
    #[error("classifier response does not match schema: {0}")]
    Schema(String),
    #[error("index {index} outside 1..={len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("index {0} appears more than once")]
    DuplicateIndex(usize),
    #[error("classifier response decoded to an empty result")]
    Empty,
    #[error("classifier gave no answer")]
    NoAnswer,
}

/// Slice from the first `{` to the last `}`. Tolerates prose or code fences
/// around a single JSON object; anything inside is left to the strict decode.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Extract + strict serde decode.
pub fn decode_strict<T: DeserializeOwned>(text: &str) -> Result<T, DecodeError> {
    let obj = extract_json_object(text).ok_or(DecodeError::NoJsonObject)?;
    serde_json::from_str(obj).map_err(|e| DecodeError::Schema(e.to_string()))
}

/// Classifier indices are 1-based; returns the 0-based position.
pub(crate) fn check_index(index: usize, len: usize) -> Result<usize, DecodeError> {
    if index == 0 || index > len {
        return Err(DecodeError::IndexOutOfRange { index, len });
    }
    Ok(index - 1)
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityContext<'a> {
    pub name: &'a str,
    pub code: &'a str,
    pub aliases: &'a [String],
    pub sector: &'a str,
}

impl<'a> From<&'a TrackedEntity> for EntityContext<'a> {
    fn from(e: &'a TrackedEntity) -> Self {
        Self {
            name: &e.name,
            code: &e.code,
            aliases: &e.aliases,
            sector: &e.sector,
        }
    }
}

/// One numbered line of a classifier request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestItem {
    pub index: usize,
    pub title: String,
    pub publisher: String,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_reason: Option<String>,
}

impl RequestItem {
    pub fn new(index: usize, c: &NewsCandidate) -> Self {
        Self {
            index,
            title: c.title.clone(),
            publisher: c.publisher.clone(),
            snippet: c.snippet.chars().take(REQUEST_SNIPPET_CHARS).collect(),
            published: c.published_at.map(|d| d.format("%Y-%m-%d %H:%M").to_string()),
            prior_score: None,
            prior_reason: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifierRequest<'a> {
    pub entity: EntityContext<'a>,
    pub items: Vec<RequestItem>,
}

impl ClassifierRequest<'_> {
    pub fn to_prompt(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// One time-bounded classifier call, decoded by the calling stage. Only
/// answers that `decode` accepts may be cached by the client.
pub async fn ask<T, F>(
    client: &dyn LlmClient,
    stage: &'static str,
    system: &str,
    user: &str,
    timeout: Duration,
    decode: F,
) -> Result<T, DecodeError>
where
    F: Fn(&str) -> Result<T, DecodeError> + Send + Sync,
{
    let accept = |text: &str| decode(text).is_ok();
    match tokio::time::timeout(timeout, client.complete_checked(system, user, &accept)).await {
        Ok(Some(text)) => {
            debug!(target: "ai", stage, provider = client.provider_name(), chars = text.len(), "classifier answered");
            decode(text.as_str())
        }
        Ok(None) => {
            debug!(target: "ai", stage, provider = client.provider_name(), "classifier returned nothing");
            Err(DecodeError::NoAnswer)
        }
        Err(_) => {
            warn!(target: "ai", stage, timeout_secs = timeout.as_secs(), "classifier timed out");
            Err(DecodeError::NoAnswer)
        }
    }
}

/// Shortened title for log fields.
pub(crate) fn short_title(title: &str) -> String {
    title.chars().take(40).collect()
}
