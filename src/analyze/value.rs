// src/analyze/value.rs
//! Local information-value ordering used to pick cluster representatives.
//!
//! Factors, compared in this order:
//! 1. primacy of source (official disclosure > report > commentary)
//! 2. specificity (how many kinds of concrete detail appear: percentages,
//!    amounts, dates, other figures)
//! 3. impact (direct financial keywords > supply/technology/policy keywords)
//! 4. the relevance score, as the final tie-break

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;

use crate::analyze::relevance::ScoredCandidate;
use crate::ingest::types::NewsCandidate;

const OFFICIAL: &[&str] = &[
    "公告", "重訊", "重大訊息", "法說會", "董事會", "股東會", "財報", "季報", "年報",
    "announces", "announced", "press release", "filing", "annual report", "earnings call",
];

const COMMENTARY: &[&str] = &[
    "分析", "觀點", "評論", "專欄", "解讀", "看法", "analyst", "opinion", "commentary",
    "column", "outlook view",
];

const DIRECT_FINANCIAL: &[&str] = &[
    "營收", "法說會", "財測", "展望", "接單", "capex", "資本支出", "月營收", "季報", "年報",
    "業績", "獲利", "eps", "毛利率", "營業利益", "淨利", "營業額", "營業收入", "股利", "配息",
    "revenue", "earnings", "profit", "guidance", "dividend", "margin",
];

const INDIRECT: &[&str] = &[
    // technology / supply
    "dram", "nand", "hbm", "cowos", "ddr5", "lpddr5", "價格", "供需", "產能", "瓶頸", "缺貨",
    "供應鏈", "先進製程", "先進封裝", "euv", "液冷", "ai伺服器", "gb200", "h200", "ai晶片",
    "記憶體", "capacity", "supply chain", "shipment",
    // policy / geopolitics
    "關稅", "管制", "補助金", "投資審查", "美國廠", "地緣政治", "貿易戰", "出口管制", "制裁",
    "投資限制", "稅收優惠", "政策支持", "產業政策", "國家安全", "技術封鎖", "tariff",
    "export control", "sanction", "subsidy", "regulation",
];

static RE_PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?\s*(?:%|％|個百分點)").expect("valid regex"));
static RE_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:nt\$|us\$|\$|新台幣|美元)\s*\d|\d+(?:\.\d+)?\s*(?:億|萬|元|美元|billion|million)")
        .expect("valid regex")
});
static RE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\d{4}[-/.]\d{1,2}[-/.]\d{1,2}|\d{1,2}月\d{1,2}日|\d{4}年|第[一二三四1-4]季|\bq[1-4]\b|\bh[12]\b",
    )
    .expect("valid regex")
});
static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").expect("valid regex"));

/// News that stays worth reporting after a delay: earnings, supply or
/// technology, and policy items.
pub fn is_delayed_valuable(candidate: &NewsCandidate) -> bool {
    let text = candidate.text().to_lowercase();
    contains_any(&text, DIRECT_FINANCIAL) || contains_any(&text, INDIRECT)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InformationValue {
    /// 2 official, 1 report, 0 commentary.
    pub primacy: u8,
    /// 0..=4
    pub specificity: u8,
    /// 2 direct financial, 1 indirect, 0 none.
    pub impact: u8,
    pub score: f32,
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

impl InformationValue {
    pub fn assess(item: &ScoredCandidate) -> Self {
        let text = item.candidate.text().to_lowercase();

        let primacy = if contains_any(&text, OFFICIAL) {
            2
        } else if contains_any(&text, COMMENTARY) {
            0
        } else {
            1
        };

        let mut specificity = 0u8;
        for re in [&*RE_PERCENT, &*RE_AMOUNT, &*RE_DATE] {
            if re.is_match(&text) {
                specificity += 1;
            }
        }
        if specificity == 0 && RE_NUMBER.is_match(&text) {
            specificity = 1;
        } else if specificity > 0 && RE_NUMBER.find_iter(&text).count() > 3 {
            specificity += 1;
        }

        let impact = if contains_any(&text, DIRECT_FINANCIAL) {
            2
        } else if contains_any(&text, INDIRECT) {
            1
        } else {
            0
        };

        Self {
            primacy,
            specificity,
            impact,
            score: item.score,
        }
    }

    /// Higher value compares greater.
    pub fn compare(&self, other: &Self) -> Ordering {
        self.primacy
            .cmp(&other.primacy)
            .then(self.specificity.cmp(&other.specificity))
            .then(self.impact.cmp(&other.impact))
            .then(self.score.total_cmp(&other.score))
    }
}

/// Position (into `items`) of the most valuable entry among `positions`.
/// Ties go to the earliest position.
pub fn most_valuable(items: &[ScoredCandidate], positions: &[usize]) -> Option<usize> {
    let mut best: Option<(usize, InformationValue)> = None;
    for &p in positions {
        let Some(item) = items.get(p) else { continue };
        let v = InformationValue::assess(item);
        match &best {
            Some((_, b)) if v.compare(b) != Ordering::Greater => {}
            _ => best = Some((p, v)),
        }
    }
    best.map(|(p, _)| p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::NewsCandidate;

    fn scored(title: &str, score: f32) -> ScoredCandidate {
        ScoredCandidate {
            candidate: NewsCandidate {
                title: title.into(),
                snippet: String::new(),
                publisher: "p".into(),
                published_at: None,
                source_locator: Some(format!("https://x.test/{title}")),
                resolved_locator: Some(format!("https://x.test/{title}")),
            },
            score,
            reason: String::new(),
        }
    }

    #[test]
    fn official_disclosure_outranks_commentary() {
        let official = InformationValue::assess(&scored("台積電董事會公告 資本支出", 0.5));
        let comment = InformationValue::assess(&scored("分析師觀點：台積電營收 成長 20%", 0.9));
        assert_eq!(official.primacy, 2);
        assert_eq!(comment.primacy, 0);
        assert_eq!(official.compare(&comment), Ordering::Greater);
    }

    #[test]
    fn specificity_counts_kinds_of_detail() {
        let bare = InformationValue::assess(&scored("台積電 動態", 0.5));
        let rich = InformationValue::assess(&scored("台積電 9月營收 新台幣 3312億元 年增 36.4%", 0.5));
        assert_eq!(bare.specificity, 0);
        assert!(rich.specificity >= 2);
        assert_eq!(rich.impact, 2);
    }

    #[test]
    fn score_breaks_ties_and_earliest_wins_exact_ties() {
        let items = vec![scored("a", 0.4), scored("b", 0.8), scored("c", 0.8)];
        assert_eq!(most_valuable(&items, &[0, 1, 2]), Some(1));
        assert_eq!(most_valuable(&items, &[0]), Some(0));
        assert_eq!(most_valuable(&items, &[]), None);
    }
}
