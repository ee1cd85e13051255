//! Entity-scoped candidate matching.
//!
//! Primary pass: title or snippet contains the entity name, code or an alias
//! (ASCII case-insensitive; CJK text is compared as-is). When the primary pass
//! finds fewer than `secondary_threshold` items, a broader pass also admits
//! candidates mentioning a short prefix of the sector descriptor.
//! Output keeps the pool's order.

use serde::{Deserialize, Serialize};

use crate::ingest::types::NewsCandidate;

/// A company/ticker the digest is curated for. Static configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackedEntity {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// e.g. "半導體晶圓代工" or "Memory modules"
    #[serde(default)]
    pub sector: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchParams {
    pub secondary_threshold: usize,
    pub sector_prefix_chars: usize,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            secondary_threshold: 5,
            sector_prefix_chars: 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    pub candidates: Vec<NewsCandidate>,
    pub primary: usize,
    pub secondary: usize,
}

impl TrackedEntity {
    /// Lower-cased, non-empty, de-duplicated needles: name, code, aliases.
    pub fn needles(&self) -> Vec<String> {
        let mut out: Vec<String> = std::iter::once(&self.name)
            .chain(std::iter::once(&self.code))
            .chain(self.aliases.iter())
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Short sector prefix for the broad pass. Latin descriptors use their
    /// first word, since two Latin letters would match nearly anything.
    pub fn sector_prefix(&self, prefix_chars: usize) -> Option<String> {
        let sector = self.sector.trim();
        let first = sector.chars().next()?;
        let prefix: String = if first.is_ascii_alphabetic() {
            sector.split_whitespace().next().unwrap_or_default().to_string()
        } else {
            sector.chars().take(prefix_chars.max(1)).collect()
        };
        let prefix = prefix.to_lowercase();
        if prefix.is_empty() {
            None
        } else {
            Some(prefix)
        }
    }

    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.code)
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| haystack.contains(n.as_str()))
}

pub fn match_candidates(
    entity: &TrackedEntity,
    pool: &[NewsCandidate],
    params: &MatchParams,
) -> MatchResult {
    let needles = entity.needles();
    let haystacks: Vec<String> = pool.iter().map(|c| c.text().to_lowercase()).collect();

    let primary_hits: Vec<bool> = haystacks
        .iter()
        .map(|h| contains_any(h, &needles))
        .collect();
    let primary = primary_hits.iter().filter(|&&hit| hit).count();

    let sector_prefix = if primary < params.secondary_threshold {
        entity.sector_prefix(params.sector_prefix_chars)
    } else {
        None
    };

    let mut secondary = 0usize;
    let mut candidates = Vec::new();
    for (i, cand) in pool.iter().enumerate() {
        if primary_hits[i] {
            candidates.push(cand.clone());
        } else if let Some(prefix) = &sector_prefix {
            if haystacks[i].contains(prefix.as_str()) {
                secondary += 1;
                candidates.push(cand.clone());
            }
        }
    }

    tracing::debug!(
        target: "matcher",
        entity = %entity.code,
        primary,
        secondary,
        "matched candidates"
    );

    MatchResult {
        candidates,
        primary,
        secondary,
    }
}
