// src/analyze/relevance.rs
//! Relevance scoring through the classifier.
//!
//! The batch (the first `scoring_batch` candidates in selection order) is
//! numbered from 1, newest first, and sent once. Only `relevant` verdicts survive, ordered by score then recency.
//! Timeouts, empty answers and anything failing the strict decode take the
//! fallback: the whole batch, uniform nominal score, recency order.

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::analyze::ai_adapter::LlmClient;
use crate::analyze::{
    ask, check_index, decode_strict, short_title, ClassifierRequest, DecodeError, EntityContext,
    RequestItem,
};
use crate::ingest::types::{by_recency_desc, NewsCandidate};
use crate::matcher::TrackedEntity;
use crate::metrics::CLASSIFIER_FALLBACK;

/// Score assigned to every item when the classifier could not be used.
pub const NOMINAL_SCORE: f32 = 0.5;

const SYSTEM_PROMPT: &str = "You are an equity analyst screening news for one listed company. \
For every numbered item decide whether it is materially about the company: \
\"relevant\", \"ambiguous\" or \"irrelevant\". Give a score between 0 and 1 and a one-line reason. \
Reply with JSON only: {\"results\":[{\"index\":1,\"verdict\":\"relevant\",\"score\":0.9,\"reason\":\"...\"}]}";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Relevant,
    Ambiguous,
    Irrelevant,
}

/// A candidate the classifier (or the fallback) considers relevant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: NewsCandidate,
    pub score: f32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringOutcome {
    /// Score desc, recency desc. Nonempty whenever the input was.
    pub items: Vec<ScoredCandidate>,
    pub fell_back: bool,
}

#[derive(Debug, Deserialize)]
struct RelevanceResponse {
    results: Vec<RawVerdict>,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    index: usize,
    verdict: Verdict,
    score: f32,
    #[serde(default)]
    reason: String,
}

/// (0-based position, verdict, score, reason)
pub type DecodedVerdict = (usize, Verdict, f32, String);

/// Strict decode of a relevance answer for a batch of `len` items.
pub fn decode_verdicts(text: &str, len: usize) -> Result<Vec<DecodedVerdict>, DecodeError> {
    let resp: RelevanceResponse = decode_strict(text)?;
    if resp.results.is_empty() {
        return Err(DecodeError::Empty);
    }
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(resp.results.len());
    for v in resp.results {
        let pos = check_index(v.index, len)?;
        if !seen.insert(pos) {
            return Err(DecodeError::DuplicateIndex(v.index));
        }
        if !v.score.is_finite() || !(0.0..=1.0).contains(&v.score) {
            return Err(DecodeError::Schema(format!(
                "score {} for index {} outside 0..=1",
                v.score, v.index
            )));
        }
        out.push((pos, v.verdict, v.score, v.reason.trim().to_string()));
    }
    Ok(out)
}

/// Whole batch, uniform score, recency order.
pub fn fallback(batch: &[NewsCandidate]) -> Vec<ScoredCandidate> {
    batch
        .iter()
        .map(|c| ScoredCandidate {
            candidate: c.clone(),
            score: NOMINAL_SCORE,
            reason: "classifier unavailable; kept by recency".to_string(),
        })
        .collect()
}

/// Keep relevant verdicts, order by score desc then recency desc.
/// `batch` is already in recency order, so a stable sort on score is enough
/// once recency ties are resolved by `by_recency_desc`.
pub fn rank(batch: &[NewsCandidate], verdicts: Vec<DecodedVerdict>) -> Vec<ScoredCandidate> {
    let mut kept: Vec<(usize, ScoredCandidate)> = verdicts
        .into_iter()
        .filter(|(_, v, _, _)| *v == Verdict::Relevant)
        .map(|(pos, _, score, reason)| {
            (
                pos,
                ScoredCandidate {
                    candidate: batch[pos].clone(),
                    score,
                    reason,
                },
            )
        })
        .collect();
    kept.sort_by(|(pa, a), (pb, b)| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| by_recency_desc(&a.candidate, &b.candidate))
            .then(pa.cmp(pb))
    });
    kept.into_iter().map(|(_, s)| s).collect()
}

/// Score one entity's selected candidates. Never fails.
pub async fn score_relevance(
    client: &dyn LlmClient,
    entity: &TrackedEntity,
    candidates: &[NewsCandidate],
    batch_cap: usize,
    timeout: Duration,
) -> ScoringOutcome {
    // The cap keeps the caller's preference order; the batch is then
    // numbered newest first.
    let mut batch: Vec<NewsCandidate> = candidates.iter().take(batch_cap.max(1)).cloned().collect();
    batch.sort_by(by_recency_desc);

    if batch.is_empty() {
        return ScoringOutcome {
            items: Vec::new(),
            fell_back: false,
        };
    }

    // The placeholder is not news; there is nothing to ask about.
    if batch.iter().all(|c| c.is_placeholder()) {
        return ScoringOutcome {
            items: batch
                .into_iter()
                .map(|c| ScoredCandidate {
                    candidate: c,
                    score: NOMINAL_SCORE,
                    reason: "no matching news".to_string(),
                })
                .collect(),
            fell_back: false,
        };
    }

    let request = ClassifierRequest {
        entity: EntityContext::from(entity),
        items: batch
            .iter()
            .enumerate()
            .map(|(i, c)| RequestItem::new(i + 1, c))
            .collect(),
    };

    let len = batch.len();
    let decoded = ask(client, "relevance", SYSTEM_PROMPT, &request.to_prompt(), timeout, |text| {
        decode_verdicts(text, len)
    })
    .await;

    match decoded {
        Ok(verdicts) => {
            let mut items = rank(&batch, verdicts);
            if items.is_empty() {
                // Nothing judged relevant: keep the freshest item so the entity
                // still reports something.
                debug!(target: "relevance", entity = %entity.code, "no relevant verdicts; keeping most recent");
                items.push(ScoredCandidate {
                    candidate: batch[0].clone(),
                    score: NOMINAL_SCORE,
                    reason: "no item judged relevant; most recent kept".to_string(),
                });
            }
            info!(
                target: "relevance",
                entity = %entity.code,
                batch = batch.len(),
                relevant = items.len(),
                top = %short_title(&items[0].candidate.title),
                "relevance scored"
            );
            ScoringOutcome {
                items,
                fell_back: false,
            }
        }
        Err(e) => {
            warn!(target: "relevance", entity = %entity.code, error = %e, "relevance fallback");
            counter!(CLASSIFIER_FALLBACK, "stage" => "relevance").increment(1);
            ScoringOutcome {
                items: fallback(&batch),
                fell_back: true,
            }
        }
    }
}
