// src/analyze/cluster.rs
//! Topic clustering over one entity's relevant, score-ordered items.
//!
//! - 0 or 1 item: one trivial cluster, no classifier call.
//! - Otherwise one classifier call groups the items. Each decoded cluster
//!   gets exactly one representative (given, or the most valuable member by
//!   `InformationValue`) and up to `max_supplementary` perspective-tagged
//!   items. More than `max_clusters` clusters are cut by representative score.
//! - Any failure yields a single "related news" cluster built from the top
//!   of the list.
//!
//! The single-event flag is computed locally from cluster membership so the
//! same input always yields the same flag.

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::analyze::ai_adapter::LlmClient;
use crate::analyze::relevance::ScoredCandidate;
use crate::analyze::value::{most_valuable, InformationValue};
use crate::analyze::{
    ask, check_index, decode_strict, ClassifierRequest, DecodeError, EntityContext, RequestItem,
};
use crate::config::PipelineConfig;
use crate::ingest::types::NewsCandidate;
use crate::matcher::TrackedEntity;
use crate::metrics::CLASSIFIER_FALLBACK;

/// Upper bounds on what one entity's digest may carry.
pub const MAX_CLUSTERS: usize = 3;
pub const MAX_SUPPLEMENTARY: usize = 2;

pub const TRIVIAL_THEME: &str = "single news";
pub const FALLBACK_THEME: &str = "related news";
pub const GENERIC_PERSPECTIVE: &str = "additional context";

/// Titles at least this similar to the representative count as near-duplicates.
const NEAR_DUPLICATE_SIMILARITY: f64 = 0.9;

const SYSTEM_PROMPT: &str = "You are an equity analyst grouping news about one listed company \
into themes (for example \"US fab x tariff talks\", \"monthly revenue x market reaction\"). \
Items covering the same theme or event belong together. For each cluster choose the most \
informative representative: official disclosure over report over commentary, concrete figures, \
dates and names, direct financial impact over indirect, then the prior score. Add up to two \
supplementary items with a short perspective label each (e.g. \"policy angle\", \"market reaction\"). \
If every item covers one single event, set is_single_event and describe the event. \
Reply with JSON only: {\"clusters\":[{\"cluster_id\":1,\"theme\":\"...\",\"representative_index\":1,\
\"representative_reason\":\"...\",\"member_indices\":[1,2,3],\"supplementary_indices\":[2,3],\
\"supplementary_perspectives\":[\"...\",\"...\"]}],\"is_single_event\":false,\"event_description\":null}";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupplementaryItem {
    pub candidate: NewsCandidate,
    pub perspective: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub theme: String,
    /// `None` only when there was nothing to cluster.
    pub representative: Option<ScoredCandidate>,
    pub supplementary: Vec<SupplementaryItem>,
    /// Distinct relevant items assigned to this cluster.
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringOutcome {
    pub clusters: Vec<Cluster>,
    pub single_event: bool,
    pub event_description: Option<String>,
    pub fell_back: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterParams {
    pub max_clusters: usize,
    pub max_supplementary: usize,
    pub single_event_min_share: f32,
    pub single_event_min_items: usize,
    pub timeout: Duration,
}

impl ClusterParams {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            max_clusters: cfg.limits.max_clusters,
            max_supplementary: cfg.limits.max_supplementary,
            single_event_min_share: cfg.clustering.single_event_min_share,
            single_event_min_items: cfg.clustering.single_event_min_items,
            timeout: cfg.classifier_timeout(),
        }
    }
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

#[derive(Debug, Deserialize)]
struct ClusterResponse {
    clusters: Vec<RawCluster>,
    #[serde(default)]
    is_single_event: Option<bool>,
    #[serde(default)]
    event_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCluster {
    theme: String,
    #[serde(default)]
    representative_index: Option<usize>,
    #[serde(default)]
    representative_reason: Option<String>,
    #[serde(default)]
    member_indices: Vec<usize>,
    #[serde(default)]
    supplementary_indices: Vec<usize>,
    #[serde(default)]
    supplementary_perspectives: Vec<String>,
}

/// A decoded cluster, positions 0-based into the item list.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPlan {
    pub theme: String,
    pub representative: Option<usize>,
    pub representative_reason: Option<String>,
    pub members: BTreeSet<usize>,
    /// (position, perspective label if given)
    pub supplementary: Vec<(usize, Option<String>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedClusters {
    pub plans: Vec<ClusterPlan>,
    pub is_single_event: Option<bool>,
    pub event_description: Option<String>,
}

/// Strict decode of a clustering answer for `len` items.
pub fn decode_clusters(text: &str, len: usize) -> Result<DecodedClusters, DecodeError> {
    let resp: ClusterResponse = decode_strict(text)?;
    if resp.clusters.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut plans = Vec::with_capacity(resp.clusters.len());
    for raw in resp.clusters {
        let theme = raw.theme.trim().to_string();
        if theme.is_empty() {
            return Err(DecodeError::Schema("cluster without theme".to_string()));
        }
        let representative = raw
            .representative_index
            .map(|i| check_index(i, len))
            .transpose()?;

        let mut members = BTreeSet::new();
        for &i in &raw.member_indices {
            members.insert(check_index(i, len)?);
        }
        members.extend(representative);

        let mut supplementary = Vec::new();
        let mut labels = raw.supplementary_perspectives.into_iter();
        for &i in &raw.supplementary_indices {
            let pos = check_index(i, len)?;
            let label = labels
                .next()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            members.insert(pos);
            if Some(pos) != representative && !supplementary.iter().any(|(p, _)| *p == pos) {
                supplementary.push((pos, label));
            }
        }

        if members.is_empty() {
            return Err(DecodeError::Schema(format!(
                "cluster '{theme}' has no representative or members"
            )));
        }
        plans.push(ClusterPlan {
            theme,
            representative,
            representative_reason: raw
                .representative_reason
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            members,
            supplementary,
        });
    }

    Ok(DecodedClusters {
        plans,
        is_single_event: resp.is_single_event,
        event_description: resp
            .event_description
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    })
}

fn near_duplicate(a: &NewsCandidate, b: &NewsCandidate) -> bool {
    strsim::normalized_levenshtein(&a.title, &b.title) >= NEAR_DUPLICATE_SIMILARITY
}

/// Pick up to `max` supplementary items from `pool` (in order), skipping
/// near-duplicates of the representative unless that would leave the list short.
fn pick_supplementary(
    items: &[ScoredCandidate],
    rep: usize,
    pool: &[(usize, Option<String>)],
    max: usize,
) -> Vec<SupplementaryItem> {
    let rep_c = &items[rep].candidate;
    let (distinct, dups): (Vec<_>, Vec<_>) = pool
        .iter()
        .filter(|(p, _)| *p != rep)
        .partition(|(p, _)| !near_duplicate(rep_c, &items[*p].candidate));

    distinct
        .into_iter()
        .chain(dups)
        .take(max)
        .map(|(p, label)| SupplementaryItem {
            candidate: items[*p].candidate.clone(),
            perspective: label
                .clone()
                .unwrap_or_else(|| GENERIC_PERSPECTIVE.to_string()),
        })
        .collect()
}

fn build_cluster(
    items: &[ScoredCandidate],
    plan: &ClusterPlan,
    max_supplementary: usize,
) -> Option<Cluster> {
    let member_list: Vec<usize> = plan.members.iter().copied().collect();
    let rep = plan
        .representative
        .or_else(|| most_valuable(items, &member_list))?;

    let pool: Vec<(usize, Option<String>)> = if plan.supplementary.is_empty() {
        let mut others: Vec<usize> = member_list.iter().copied().filter(|&p| p != rep).collect();
        others.sort_by(|&a, &b| {
            InformationValue::assess(&items[b])
                .compare(&InformationValue::assess(&items[a]))
                .then(a.cmp(&b))
        });
        others.into_iter().map(|p| (p, None)).collect()
    } else {
        plan.supplementary.clone()
    };

    let mut representative = items[rep].clone();
    if let Some(reason) = &plan.representative_reason {
        representative.reason = reason.clone();
    }

    Some(Cluster {
        theme: plan.theme.clone(),
        representative: Some(representative),
        supplementary: pick_supplementary(items, rep, &pool, max_supplementary),
        size: plan.members.len(),
    })
}

/// Keep the `max` clusters whose representatives score highest
/// (`InformationValue` breaks ties), in their original order.
pub fn cap_clusters(clusters: Vec<Cluster>, max: usize) -> Vec<Cluster> {
    if clusters.len() <= max {
        return clusters;
    }
    let key = |c: &Cluster| c.representative.as_ref().map(InformationValue::assess);
    let mut order: Vec<usize> = (0..clusters.len()).collect();
    order.sort_by(|&a, &b| {
        let (ka, kb) = (key(&clusters[a]), key(&clusters[b]));
        let by_value = match (ka, kb) {
            (Some(x), Some(y)) => y.score.total_cmp(&x.score).then(y.compare(&x)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_value.then(a.cmp(&b))
    });
    let mut keep: Vec<usize> = order.into_iter().take(max).collect();
    keep.sort_unstable();

    let mut slots: Vec<Option<Cluster>> = clusters.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// True when one cluster covers at least `min_share` of `total` items and
/// there are at least `min_items` items.
pub fn is_single_event(largest: usize, total: usize, min_share: f32, min_items: usize) -> bool {
    if total < min_items.max(2) || total == 0 {
        return false;
    }
    (largest as f32 / total as f32) >= min_share
}

/// Single cluster used when there are 0 or 1 items.
pub fn trivial(items: &[ScoredCandidate]) -> ClusteringOutcome {
    ClusteringOutcome {
        clusters: vec![Cluster {
            theme: TRIVIAL_THEME.to_string(),
            representative: items.first().cloned(),
            supplementary: Vec::new(),
            size: items.len(),
        }],
        single_event: false,
        event_description: None,
        fell_back: false,
    }
}

/// "related news": top item as representative, the next ones as supplementary.
pub fn fallback(items: &[ScoredCandidate], max_supplementary: usize) -> ClusteringOutcome {
    let clusters = vec![Cluster {
        theme: FALLBACK_THEME.to_string(),
        representative: items.first().cloned(),
        supplementary: items
            .iter()
            .skip(1)
            .take(max_supplementary)
            .map(|s| SupplementaryItem {
                candidate: s.candidate.clone(),
                perspective: GENERIC_PERSPECTIVE.to_string(),
            })
            .collect(),
        size: items.len(),
    }];
    ClusteringOutcome {
        clusters,
        single_event: false,
        event_description: None,
        fell_back: true,
    }
}

/// Turn a decoded answer into the delivered clusters.
pub fn assemble(
    items: &[ScoredCandidate],
    decoded: DecodedClusters,
    params: &ClusterParams,
) -> ClusteringOutcome {
    let built: Vec<Cluster> = decoded
        .plans
        .iter()
        .filter_map(|p| build_cluster(items, p, params.max_supplementary))
        .collect();

    let dominant = built
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.size.cmp(&b.size).then(ib.cmp(ia)))
        .map(|(_, c)| (c.size, c.theme.clone()));
    let (largest, dominant_theme) = dominant.unwrap_or((0, String::new()));

    let single_event = is_single_event(
        largest,
        items.len(),
        params.single_event_min_share,
        params.single_event_min_items,
    );
    if let Some(flag) = decoded.is_single_event {
        if flag != single_event {
            debug!(target: "cluster", classifier = flag, computed = single_event, "single-event flag disagrees with classifier");
        }
    }
    let event_description = single_event.then(|| {
        decoded
            .event_description
            .clone()
            .unwrap_or(dominant_theme)
    });

    ClusteringOutcome {
        clusters: cap_clusters(built, params.max_clusters.max(1)),
        single_event,
        event_description,
        fell_back: false,
    }
}

/// Cluster one entity's relevant items. Never fails.
pub async fn cluster_topics(
    client: &dyn LlmClient,
    entity: &TrackedEntity,
    items: &[ScoredCandidate],
    params: &ClusterParams,
) -> ClusteringOutcome {
    if items.len() <= 1 {
        return trivial(items);
    }

    let request = ClassifierRequest {
        entity: EntityContext::from(entity),
        items: items
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut r = RequestItem::new(i + 1, &s.candidate);
                r.prior_score = Some(s.score);
                r.prior_reason = Some(s.reason.clone());
                r
            })
            .collect(),
    };

    let len = items.len();
    let decoded = ask(client, "cluster", SYSTEM_PROMPT, &request.to_prompt(), params.timeout, |text| {
        decode_clusters(text, len)
    })
    .await;

    match decoded {
        Ok(d) => {
            let out = assemble(items, d, params);
            info!(
                target: "cluster",
                entity = %entity.code,
                items = items.len(),
                clusters = out.clusters.len(),
                single_event = out.single_event,
                "topics clustered"
            );
            out
        }
        Err(e) => {
            warn!(target: "cluster", entity = %entity.code, error = %e, "clustering fallback");
            counter!(CLASSIFIER_FALLBACK, "stage" => "cluster").increment(1);
            fallback(items, params.max_supplementary)
        }
    }
}
