//! Retrieval journeys: keyword fallback scoring, rerank behavior,
//! session-scoped overrides, explain output, and budget-aware context.

use engram_core::{
    ClaimInput, ContextOptions, Rerank, SearchOptions, StoreOptions, Weights,
};
use engram_e2e_tests::{embedded_engine, engine, store_text};

#[test]
fn keyword_fallback_scores_by_matched_token_ratio() {
    let mut graph = engine();
    store_text(&mut graph, "a", "database security vulnerability");
    store_text(&mut graph, "a", "security best practices");
    store_text(&mut graph, "a", "cooking recipes");

    let response = graph
        .search(Some("a"), "security vulnerability", &SearchOptions::default())
        .unwrap();

    assert_eq!(response.hits.len(), 2);
    assert_eq!(response.hits[0].memory.text, "database security vulnerability");
    assert_eq!(response.hits[0].keyword_score, Some(1.0));
    assert_eq!(response.hits[1].memory.text, "security best practices");
    assert_eq!(response.hits[1].keyword_score, Some(0.5));
}

#[test]
fn all_stop_word_query_falls_back_to_substring() {
    let mut graph = engine();
    store_text(&mut graph, "a", "it is what it is");
    store_text(&mut graph, "a", "unrelated content");

    let response = graph
        .search(Some("a"), "it is", &SearchOptions::default())
        .unwrap();
    assert_eq!(response.hits.len(), 1);
    assert_eq!(response.hits[0].keyword_score, Some(1.0));
}

#[test]
fn rerank_off_orders_by_raw_score() {
    let mut graph = engine();
    // High importance should NOT outrank a better keyword match when the
    // rerank is off.
    graph
        .store(
            "a",
            "deploy checklist",
            StoreOptions {
                importance: Some(1.0),
                ..Default::default()
            },
        )
        .unwrap();
    graph
        .store(
            "a",
            "deploy pipeline rollback steps",
            StoreOptions {
                importance: Some(0.1),
                ..Default::default()
            },
        )
        .unwrap();

    let response = graph
        .search(
            Some("a"),
            "pipeline rollback",
            &SearchOptions {
                rerank: Rerank::Off,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(response.hits[0].memory.text, "deploy pipeline rollback steps");
    assert_eq!(response.hits[0].score, 1.0);
}

#[test]
fn rerank_weights_can_prefer_confidence_over_relevance() {
    let mut graph = engine();
    // Trusted memory with a weaker keyword match.
    graph
        .store(
            "a",
            "release process overview",
            StoreOptions {
                provenance: Some(engram_core::ProvenanceInput {
                    source: Some("user_explicit".into()),
                    source_id: None,
                }),
                ..Default::default()
            },
        )
        .unwrap();
    // Untrusted memory with the stronger match.
    graph
        .store(
            "a",
            "release process rollback details",
            StoreOptions {
                provenance: Some(engram_core::ProvenanceInput {
                    source: Some("inference".into()),
                    source_id: None,
                }),
                ..Default::default()
            },
        )
        .unwrap();

    let confidence_heavy = Weights {
        relevance: 0.05,
        confidence: 0.9,
        recency: 0.025,
        importance: 0.025,
    };
    let response = graph
        .search(
            Some("a"),
            "release process rollback",
            &SearchOptions {
                rerank: Rerank::Weights(confidence_heavy),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(response.hits[0].memory.text, "release process overview");
}

#[test]
fn session_scoped_claims_shadow_globals() {
    let mut graph = engine();
    graph
        .store(
            "a",
            "Editor is vim",
            StoreOptions {
                claim: Some(ClaimInput {
                    subject: "user".into(),
                    predicate: "editor".into(),
                    value: "vim".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .unwrap();
    graph
        .store(
            "a",
            "Editor is helix for this session",
            StoreOptions {
                claim: Some(ClaimInput {
                    subject: "user".into(),
                    predicate: "editor".into(),
                    value: "helix".into(),
                    scope: Some("session".into()),
                    session_id: Some("s-42".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .unwrap();

    // Without a session, the global value is what search sees.
    let response = graph
        .search(Some("a"), "editor", &SearchOptions::default())
        .unwrap();
    assert!(response.hits.iter().any(|h| h.memory.text == "Editor is vim"));

    // Inside the session, the session value suppresses the global one.
    let response = graph
        .search(
            Some("a"),
            "editor",
            &SearchOptions {
                session_id: Some("s-42".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(response.hits.len(), 1);
    assert_eq!(response.hits[0].memory.text, "Editor is helix for this session");
}

#[test]
fn session_claims_from_other_agents_union_into_results() {
    let mut graph = engine();
    graph
        .store(
            "a",
            "Editor is vim",
            StoreOptions {
                claim: Some(ClaimInput {
                    subject: "user".into(),
                    predicate: "editor".into(),
                    value: "vim".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .unwrap();
    // Another agent pinned a session-scoped value for the same key.
    graph
        .store(
            "b",
            "Editor is helix for this session",
            StoreOptions {
                claim: Some(ClaimInput {
                    subject: "user".into(),
                    predicate: "editor".into(),
                    value: "helix".into(),
                    scope: Some("session".into()),
                    session_id: Some("s-42".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .unwrap();

    // Searching agent a without a session never sees b's memory.
    let response = graph
        .search(Some("a"), "editor", &SearchOptions::default())
        .unwrap();
    assert_eq!(response.hits.len(), 1);
    assert_eq!(response.hits[0].memory.agent, "a");

    // Inside the session, b's value crosses the agent boundary and
    // shadows a's global.
    let response = graph
        .search(
            Some("a"),
            "editor",
            &SearchOptions {
                session_id: Some("s-42".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(response.hits.len(), 1);
    assert_eq!(response.hits[0].memory.agent, "b");
    assert_eq!(
        response.hits[0].memory.text,
        "Editor is helix for this session"
    );

    // A different session id unions nothing and leaves the global alone.
    let response = graph
        .search(
            Some("a"),
            "editor",
            &SearchOptions {
                session_id: Some("s-99".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(response.hits.len(), 1);
    assert_eq!(response.hits[0].memory.agent, "a");
}

#[test]
fn explain_attaches_meta_and_per_hit_breakdown() {
    let mut graph = engine();
    store_text(&mut graph, "a", "observability dashboards");
    store_text(&mut graph, "b", "other agent memory");

    let response = graph
        .search(
            Some("a"),
            "observability",
            &SearchOptions {
                explain: true,
                ..Default::default()
            },
        )
        .unwrap();
    let meta = response.meta.expect("meta");
    assert_eq!(meta.query, "observability");
    assert_eq!(meta.returned, 1);
    assert_eq!(meta.candidates, 1);

    let explain = response.hits[0].explain.as_ref().expect("explain");
    assert_eq!(explain.retrieved.keyword_score, Some(1.0));
    assert_eq!(explain.retrieved.keyword_hits, vec!["observability"]);
    let rerank = explain.rerank.as_ref().expect("rerank block");
    assert!((rerank.weights.relevance - 0.40).abs() < 1e-9);
    assert!(rerank.composite_score > 0.0);
}

#[test]
fn search_many_embeds_in_one_batch_and_enforces_cap() {
    let mut graph = embedded_engine();
    store_text(&mut graph, "a", "database indexes");
    store_text(&mut graph, "a", "kitchen recipes");

    let responses = graph
        .search_many(
            Some("a"),
            &["database indexes".to_string(), "kitchen recipes".to_string()],
            &SearchOptions::default(),
        )
        .unwrap();
    assert_eq!(responses.len(), 2);
    assert!(!responses[0].hits.is_empty());

    assert_eq!(
        graph
            .search_many(Some("a"), &[], &SearchOptions::default())
            .unwrap_err()
            .kind(),
        "invalid"
    );

    let too_many: Vec<String> = (0..21).map(|i| format!("query {i}")).collect();
    assert_eq!(
        graph
            .search_many(Some("a"), &too_many, &SearchOptions::default())
            .unwrap_err()
            .kind(),
        "capacity_exceeded"
    );
}

#[test]
fn context_packs_to_token_budget_and_reports_exclusions() {
    let mut graph = engine();
    graph
        .store(
            "a",
            "projectx critical decision",
            StoreOptions {
                importance: Some(1.0),
                ..Default::default()
            },
        )
        .unwrap();
    let long_text = format!("projectx background {}", "detail ".repeat(60));
    graph
        .store(
            "a",
            &long_text,
            StoreOptions {
                importance: Some(0.1),
                ..Default::default()
            },
        )
        .unwrap();

    let result = graph
        .context(
            Some("a"),
            "projectx",
            &ContextOptions {
                max_memories: 10,
                max_tokens: Some(140),
                ..Default::default()
            },
        )
        .unwrap();

    assert!(result.context.contains("projectx critical decision"));
    assert!(!result.context.contains("projectx background"));
    assert_eq!(result.included, Some(1));
    assert_eq!(result.excluded, Some(1));
    let excluded = result.excluded_reasons.as_ref().unwrap();
    assert_eq!(excluded.len(), 1);
    assert_eq!(excluded[0].reason, "budget");

    // The estimate is the rendered context at one token per four chars.
    let expected = result.context.chars().count().div_ceil(4);
    assert_eq!(result.token_estimate, Some(expected));
}

#[test]
fn context_without_budget_takes_top_scored() {
    let mut graph = engine();
    for i in 0..5 {
        store_text(&mut graph, "a", &format!("deploy note number {i}"));
    }
    let result = graph
        .context(
            Some("a"),
            "deploy note",
            &ContextOptions {
                max_memories: 3,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(result.count, 3);
    assert!(result.token_estimate.is_none());
    assert!(result.context.starts_with("## Relevant Memory Context"));
}
