// src/analyze/topic.rs
//! Per-entity topic statement: a short standing description of what the
//! company is currently about. Regenerated at most once per topic TTL.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::analyze::ai_adapter::LlmClient;
use crate::analyze::{ask, decode_strict, DecodeError, EntityContext};
use crate::cache::{CacheRepository, TopicEntry};
use crate::matcher::TrackedEntity;
use crate::metrics::CLASSIFIER_FALLBACK;

const SYSTEM_PROMPT: &str = "You are an equity analyst. In one or two sentences, state the \
investment topic currently driving the given listed company (business focus, main catalysts). \
Reply with JSON only: {\"statement\":\"...\"}";

const MAX_STATEMENT_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TopicSource {
    Cached,
    Fresh,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicStatement {
    pub text: String,
    pub source: TopicSource,
}

#[derive(Debug, Deserialize)]
struct TopicResponse {
    statement: String,
}

/// The date is part of the request so a regenerated statement is never a
/// replay of the previous one.
#[derive(Debug, Serialize)]
struct TopicRequest<'a> {
    entity: EntityContext<'a>,
    as_of: String,
}

fn decode_statement(text: &str) -> Result<String, DecodeError> {
    let r: TopicResponse = decode_strict(text)?;
    let s: String = r.statement.trim().chars().take(MAX_STATEMENT_CHARS).collect();
    if s.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(s)
}

/// Deterministic statement used when no classifier answer is available.
pub fn fallback_statement(entity: &TrackedEntity) -> String {
    if entity.sector.trim().is_empty() {
        format!("{} ({})", entity.name, entity.code)
    } else {
        format!("{} ({}): {}", entity.name, entity.code, entity.sector.trim())
    }
}

pub struct TopicSummarizer<'a> {
    client: &'a dyn LlmClient,
    cache: &'a dyn CacheRepository,
    ttl: chrono::Duration,
    timeout: Duration,
}

impl<'a> TopicSummarizer<'a> {
    pub fn new(
        client: &'a dyn LlmClient,
        cache: &'a dyn CacheRepository,
        ttl: chrono::Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            cache,
            ttl,
            timeout,
        }
    }

    /// Cached statement if still within the TTL, else one classifier call.
    /// Fallback statements are not cached so the next run retries.
    pub async fn statement(&self, entity: &TrackedEntity, now: DateTime<Utc>) -> TopicStatement {
        if let Some(hit) = self.cache.topic(&entity.code) {
            if now - hit.cached_at <= self.ttl {
                debug!(target: "topic", entity = %entity.code, "topic statement from cache");
                return TopicStatement {
                    text: hit.statement,
                    source: TopicSource::Cached,
                };
            }
        }

        let request = TopicRequest {
            entity: EntityContext::from(entity),
            as_of: now.date_naive().to_string(),
        };
        let user = serde_json::to_string(&request).unwrap_or_default();
        let fresh = ask(self.client, "topic", SYSTEM_PROMPT, &user, self.timeout, decode_statement).await;

        match fresh {
            Ok(text) => {
                self.cache.put_topic(
                    &entity.code,
                    TopicEntry {
                        statement: text.clone(),
                        cached_at: now,
                    },
                );
                TopicStatement {
                    text,
                    source: TopicSource::Fresh,
                }
            }
            Err(reason) => {
                warn!(target: "topic", entity = %entity.code, reason = %reason, "topic fallback");
                counter!(CLASSIFIER_FALLBACK, "stage" => "topic").increment(1);
                TopicStatement {
                    text: fallback_statement(entity),
                    source: TopicSource::Fallback,
                }
            }
        }
    }
}
