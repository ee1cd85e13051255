// tests/classifier_stages.rs
use chrono::{DateTime, Duration, TimeZone, Utc};
use market_news_digest::ai_adapter::{DisabledClient, MockProvider};
use market_news_digest::analyze::cluster::{cluster_topics, ClusterParams, FALLBACK_THEME, GENERIC_PERSPECTIVE};
use market_news_digest::analyze::relevance::{score_relevance, ScoredCandidate, NOMINAL_SCORE};
use market_news_digest::{NewsCandidate, TrackedEntity};
use std::time::Duration as StdDuration;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
}

fn cand(title: &str, age_hours: i64) -> NewsCandidate {
    NewsCandidate {
        title: title.into(),
        snippet: format!("{title} snippet"),
        publisher: "p".into(),
        published_at: Some(now() - Duration::hours(age_hours)),
        source_locator: Some(format!("https://x.test/{age_hours}")),
        resolved_locator: Some(format!("https://x.test/{age_hours}")),
    }
}

fn scored(title: &str, score: f32) -> ScoredCandidate {
    ScoredCandidate {
        candidate: cand(title, 1),
        score,
        reason: "r".into(),
    }
}

fn gamma() -> TrackedEntity {
    TrackedEntity {
        name: "Gamma".into(),
        code: "3333".into(),
        aliases: vec![],
        sector: String::new(),
    }
}

fn params() -> ClusterParams {
    ClusterParams {
        timeout: StdDuration::from_millis(200),
        ..ClusterParams::default()
    }
}

#[tokio::test]
async fn relevance_keeps_relevant_sorted_by_score() {
    let batch = vec![cand("a", 1), cand("b", 2), cand("c", 3)];
    let mock = MockProvider::fixed(
        "Here is the result:\n```json\n{\"results\":[\
         {\"index\":1,\"verdict\":\"relevant\",\"score\":0.6,\"reason\":\"x\"},\
         {\"index\":2,\"verdict\":\"irrelevant\",\"score\":0.1,\"reason\":\"y\"},\
         {\"index\":3,\"verdict\":\"relevant\",\"score\":0.9,\"reason\":\"z\"}]}\n```",
    );
    let out = score_relevance(&mock, &gamma(), &batch, 15, StdDuration::from_secs(1)).await;
    assert!(!out.fell_back);
    let titles: Vec<_> = out.items.iter().map(|s| s.candidate.title.as_str()).collect();
    assert_eq!(titles, vec!["c", "a"]);
    assert_eq!(out.items[0].reason, "z");
}

#[tokio::test]
async fn relevance_batch_is_capped_to_most_recent() {
    let batch: Vec<_> = (0..20).map(|i| cand(&format!("n{i}"), i)).collect();
    let out = score_relevance(&DisabledClient, &gamma(), &batch, 15, StdDuration::from_secs(1)).await;
    assert!(out.fell_back);
    assert_eq!(out.items.len(), 15);
    assert_eq!(out.items[0].candidate.title, "n0");
    assert_eq!(out.items[14].candidate.title, "n14");
}

#[tokio::test]
async fn relevance_cap_keeps_selection_order() {
    // Selection put two older items first; the cap must not drop them.
    let mut batch: Vec<_> = (0..20).map(|i| cand(&format!("n{i}"), i)).collect();
    batch.rotate_left(18);
    let out = score_relevance(&DisabledClient, &gamma(), &batch, 15, StdDuration::from_secs(1)).await;
    let titles: Vec<_> = out.items.iter().map(|s| s.candidate.title.as_str()).collect();
    assert_eq!(titles.len(), 15);
    assert_eq!(titles[0], "n0");
    assert_eq!(&titles[13..], &["n18", "n19"]);
}

#[tokio::test]
async fn malformed_relevance_answer_falls_back() {
    let batch = vec![cand("a", 1), cand("b", 2)];
    for answer in [
        "I think they are all relevant.",
        r#"{"results":[{"index":9,"verdict":"relevant","score":0.5}]}"#,
        r#"{"results":[{"index":1,"verdict":"relevant","score":"high"}]}"#,
    ] {
        let mock = MockProvider::fixed(answer);
        let out = score_relevance(&mock, &gamma(), &batch, 15, StdDuration::from_secs(1)).await;
        assert!(out.fell_back, "answer should fall back: {answer}");
        assert_eq!(out.items.len(), 2);
        assert!(out.items.iter().all(|s| s.score == NOMINAL_SCORE));
    }
}

#[tokio::test]
async fn nothing_relevant_keeps_most_recent() {
    let batch = vec![cand("older", 5), cand("newest", 1)];
    let mock = MockProvider::fixed(
        r#"{"results":[{"index":1,"verdict":"irrelevant","score":0.1},{"index":2,"verdict":"ambiguous","score":0.4}]}"#,
    );
    let out = score_relevance(&mock, &gamma(), &batch, 15, StdDuration::from_secs(1)).await;
    assert!(!out.fell_back);
    assert_eq!(out.items.len(), 1);
    assert_eq!(out.items[0].candidate.title, "newest");
}

#[tokio::test]
async fn placeholder_skips_classifier() {
    let mock = MockProvider::fixed("{}");
    let out = score_relevance(
        &mock,
        &gamma(),
        &[NewsCandidate::placeholder()],
        15,
        StdDuration::from_secs(1),
    )
    .await;
    assert_eq!(mock.calls(), 0);
    assert_eq!(out.items.len(), 1);
    assert!(out.items[0].candidate.is_placeholder());

    let clusters = cluster_topics(&mock, &gamma(), &out.items, &params()).await;
    assert_eq!(mock.calls(), 0);
    assert_eq!(clusters.clusters.len(), 1);
    assert!(clusters.clusters[0].supplementary.is_empty());
}

#[tokio::test]
async fn cluster_count_is_capped_at_three() {
    let items: Vec<_> = (0..5).map(|i| scored(&format!("item {i}"), 0.9 - i as f32 * 0.1)).collect();
    let answer = r#"{"clusters":[
        {"theme":"t5","representative_index":5},
        {"theme":"t1","representative_index":1},
        {"theme":"t4","representative_index":4},
        {"theme":"t2","representative_index":2},
        {"theme":"t3","representative_index":3}]}"#;
    let mock = MockProvider::fixed(answer);
    let out = cluster_topics(&mock, &gamma(), &items, &params()).await;
    assert!(!out.fell_back);
    let themes: Vec<_> = out.clusters.iter().map(|c| c.theme.as_str()).collect();
    // Top three representatives by score, in the classifier's order.
    assert_eq!(themes, vec!["t1", "t2", "t3"]);
    assert!(!out.single_event);
}

#[tokio::test]
async fn four_items_in_one_cluster_is_a_single_event() {
    let items: Vec<_> = (0..4).map(|i| scored(&format!("story {i}"), 0.8)).collect();
    let answer = r#"{"clusters":[{"theme":"US fab","representative_index":1,
        "member_indices":[1,2,3,4],"supplementary_indices":[2,3],
        "supplementary_perspectives":["policy angle","market reaction"]}],
        "is_single_event":true,"event_description":"US fab groundbreaking"}"#;
    let mock = MockProvider::fixed(answer);
    let out = cluster_topics(&mock, &gamma(), &items, &params()).await;
    assert!(out.single_event);
    assert_eq!(out.event_description.as_deref(), Some("US fab groundbreaking"));
    let c = &out.clusters[0];
    assert_eq!(c.size, 4);
    assert_eq!(c.supplementary.len(), 2);
    assert_eq!(c.supplementary[0].perspective, "policy angle");
}

#[tokio::test]
async fn split_two_one_one_is_not_a_single_event() {
    let items: Vec<_> = (0..4).map(|i| scored(&format!("story {i}"), 0.8)).collect();
    let answer = r#"{"clusters":[
        {"theme":"a","representative_index":1,"member_indices":[1,2]},
        {"theme":"b","representative_index":3},
        {"theme":"c","representative_index":4}],
        "is_single_event":true,"event_description":"ignored"}"#;
    let mock = MockProvider::fixed(answer);
    let out = cluster_topics(&mock, &gamma(), &items, &params()).await;
    assert!(!out.fell_back);
    assert!(!out.single_event);
    assert!(out.event_description.is_none());
    assert_eq!(out.clusters.len(), 3);
}

// Scenario C: the classifier never answers in time.
#[tokio::test]
async fn classifier_timeout_degrades_both_stages() {
    let batch: Vec<_> = (0..6).map(|i| cand(&format!("gamma news {i}"), i + 1)).collect();
    let slow = MockProvider::fixed("{}").with_delay(StdDuration::from_secs(5));
    let timeout = StdDuration::from_millis(50);

    let scored = score_relevance(&slow, &gamma(), &batch, 15, timeout).await;
    assert!(scored.fell_back);
    assert_eq!(scored.items.len(), 6);
    assert!(scored.items.iter().all(|s| s.score == NOMINAL_SCORE));

    let p = ClusterParams {
        timeout,
        ..ClusterParams::default()
    };
    let out = cluster_topics(&slow, &gamma(), &scored.items, &p).await;
    assert!(out.fell_back);
    assert_eq!(out.clusters.len(), 1);
    let c = &out.clusters[0];
    assert_eq!(c.theme, FALLBACK_THEME);
    assert_eq!(c.representative.as_ref().unwrap().candidate.title, "gamma news 0");
    assert_eq!(c.supplementary.len(), 2);
    assert!(c.supplementary.iter().all(|s| s.perspective == GENERIC_PERSPECTIVE));
}

#[tokio::test]
async fn identical_answers_give_identical_clusters() {
    let items: Vec<_> = (0..4).map(|i| scored(&format!("story {i}"), 0.8 - i as f32 * 0.1)).collect();
    let answer = r#"{"clusters":[{"theme":"a","member_indices":[1,2]},{"theme":"b","member_indices":[3,4]}]}"#;
    let first = cluster_topics(&MockProvider::fixed(answer), &gamma(), &items, &params()).await;
    let second = cluster_topics(&MockProvider::fixed(answer), &gamma(), &items, &params()).await;
    assert_eq!(first, second);
}
