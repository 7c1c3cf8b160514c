//! Maintenance journeys: decay, reinforcement, consolidation, compression,
//! episodes, and the LLM-guided evolve path.

use engram_core::{
    CompressOptions, ConsolidateOptions, EngineConfig, EpisodeFilter, LinkType, SearchOptions,
    Status, StoreOptions,
};
use engram_e2e_tests::mocks::MockChat;
use engram_e2e_tests::{embedded_engine, engine, engine_with_config, store_claim, store_text};

// ============================================================================
// DECAY
// ============================================================================

#[test]
fn decay_archives_weak_memories() {
    let mut graph = engine_with_config(EngineConfig {
        archive_threshold: 0.9,
        delete_threshold: 0.01,
        ..Default::default()
    });
    store_text(&mut graph, "a", "Something to decay");

    // Dry run reports without mutating anything.
    let preview = graph.decay(true).unwrap();
    assert!(preview.dry_run);
    assert!(preview.total >= 1);
    assert!(preview.archived >= 1);
    assert_eq!(graph.len(), 1);

    let report = graph.decay(false).unwrap();
    assert!(report.total >= 1);
    assert!(report.archived >= 1);
    assert_eq!(graph.len(), 0);

    // The archived copy is findable through health's archive count.
    let health = graph.health().unwrap();
    assert_eq!(health.archive_count, 1);
}

#[test]
fn decay_dry_run_leaves_state_identical() {
    let mut graph = engine();
    store_text(&mut graph, "a", "healthy recent memory");
    let before = graph.list(None);

    let report = graph.decay(true).unwrap();
    assert!(report.dry_run);

    let after = graph.list(None);
    assert_eq!(before.len(), after.len());
    assert_eq!(
        serde_json::to_string(&before).unwrap(),
        serde_json::to_string(&after).unwrap()
    );
}

// ============================================================================
// REINFORCE / DISPUTE / CORROBORATE
// ============================================================================

#[test]
fn reinforce_bumps_importance_and_seeds_stability() {
    let mut graph = engine();
    let stored = store_text(&mut graph, "a", "worth keeping");

    let memory = graph.reinforce(&stored.id, 0.3).unwrap();
    assert!((memory.importance - 0.8).abs() < 1e-9);
    assert_eq!(memory.access_count, 1);
    assert_eq!(memory.reinforcements, 1);
    assert!(memory.stability.is_some());
    assert!(memory.last_review_interval.is_some());

    // Importance caps at 1.
    let memory = graph.reinforce(&stored.id, 0.9).unwrap();
    assert_eq!(memory.importance, 1.0);
    assert_eq!(memory.reinforcements, 2);
}

#[test]
fn dispute_drops_trust_and_demotes_aged_memories() {
    let mut graph = engine();
    let stored = store_text(&mut graph, "a", "dubious claim");

    // Fresh inference memory: 0.5 base minus the full -0.15 feedback
    // floor still clears the 0.3 bar.
    let memory = graph.dispute(&stored.id, Some("contradicted by logs")).unwrap();
    assert!((memory.provenance.trust - 0.35).abs() < 1e-6);
    assert_eq!(memory.status, Status::Active);

    // An aged memory takes the additional age discount and falls under
    // the bar.
    use chrono::{Duration, Utc};
    use engram_core::StorageAdapter;
    let storage = engram_core::MemoryStorage::new();
    let old = engram_core::Memory::new(
        "mem_old".into(),
        "a".into(),
        "stale dubious claim".into(),
        Utc::now() - Duration::days(400),
    );
    storage.save(std::slice::from_ref(&old)).unwrap();
    let mut aged_graph =
        engram_core::MemoryGraph::open(EngineConfig::default(), Box::new(storage)).unwrap();

    let memory = aged_graph.dispute("mem_old", None).unwrap();
    assert!(memory.provenance.trust < 0.3);
    assert_eq!(memory.status, Status::Disputed);

    let memory = aged_graph.corroborate("mem_old").unwrap();
    assert_eq!(memory.provenance.corroboration, 2);
    // Corroboration recovers trust but the status stays disputed until an
    // operator intervenes.
    assert_eq!(memory.status, Status::Disputed);
}

// ============================================================================
// CONSOLIDATION
// ============================================================================

#[test]
fn consolidation_dry_run_matches_real_run() {
    let mut graph = embedded_engine();
    store_text(&mut graph, "a", "database migrations need a rollback plan");
    store_text(&mut graph, "a", "database migrations need a rollback plan");
    store_claim(
        &mut graph, "a", "Theme blue", "user", "theme", "blue", "user_explicit",
    );

    let preview = graph.consolidate(&ConsolidateOptions { dry_run: true }).unwrap();
    let before_len = graph.len();
    let real = graph.consolidate(&ConsolidateOptions { dry_run: false }).unwrap();

    // Same report modulo the dry-run flag and wall-clock duration.
    assert_eq!(preview.deduplicated, real.deduplicated);
    assert_eq!(preview.contradictions_resolved, real.contradictions_resolved);
    assert_eq!(preview.contradictions_pending, real.contradictions_pending);
    assert_eq!(preview.corroborated, real.corroborated);
    assert_eq!(preview.pruned_superseded, real.pruned_superseded);
    assert_eq!(preview.before_total, real.before_total);
    assert_eq!(preview.after_total, real.after_total);
    assert!(preview.dry_run);
    assert!(!real.dry_run);

    // The dry run really did leave the graph untouched.
    assert_eq!(before_len, real.before_total);
}

#[test]
fn consolidation_dedups_identical_embeddings() {
    let mut graph = embedded_engine();
    let first = store_text(&mut graph, "a", "retry with exponential backoff");
    let second = store_text(&mut graph, "a", "retry with exponential backoff");

    let report = graph.consolidate(&ConsolidateOptions::default()).unwrap();
    assert_eq!(report.deduplicated, 1);

    let a = graph.get(&first.id).unwrap();
    let b = graph.get(&second.id).unwrap();
    let (winner, loser) = if a.status == Status::Active { (a, b) } else { (b, a) };
    assert_eq!(winner.status, Status::Active);
    assert_eq!(loser.status, Status::Superseded);
    assert_eq!(loser.superseded_by.as_deref(), Some(winner.id.as_str()));
    assert_eq!(winner.provenance.corroboration, 2);
}

#[test]
fn consolidation_resolves_contradictions_by_trust() {
    let mut graph = engine();
    // keep_active leaves both sides active so the sweep has work to do.
    graph
        .store(
            "a",
            "Theme blue",
            StoreOptions {
                claim: Some(engram_core::ClaimInput {
                    subject: "user".into(),
                    predicate: "theme".into(),
                    value: "blue".into(),
                    ..Default::default()
                }),
                provenance: Some(engram_core::ProvenanceInput {
                    source: Some("user_explicit".into()),
                    source_id: None,
                }),
                ..Default::default()
            },
        )
        .unwrap();
    let weak = graph
        .store(
            "a",
            "Theme green",
            StoreOptions {
                claim: Some(engram_core::ClaimInput {
                    subject: "user".into(),
                    predicate: "theme".into(),
                    value: "green".into(),
                    ..Default::default()
                }),
                on_conflict: engram_core::OnConflict::KeepActive,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(!weak.quarantined);

    let report = graph.consolidate(&ConsolidateOptions::default()).unwrap();
    assert_eq!(report.contradictions_resolved, 1);
    assert_eq!(graph.get(&weak.id).unwrap().status, Status::Superseded);
}

// ============================================================================
// COMPRESSION
// ============================================================================

#[test]
fn extractive_compression_builds_digest_with_links() {
    let mut graph = engine();
    let a = graph
        .store(
            "a",
            "incident review found a dns misconfiguration",
            StoreOptions {
                importance: Some(0.9),
                tags: vec!["incident".into()],
                ..Default::default()
            },
        )
        .unwrap();
    let b = graph
        .store(
            "a",
            "postmortem action item rotate credentials",
            StoreOptions {
                importance: Some(0.4),
                tags: vec!["postmortem".into()],
                ..Default::default()
            },
        )
        .unwrap();

    let outcome = graph
        .compress(
            &[a.id.clone(), b.id.clone()],
            &CompressOptions::default(),
        )
        .unwrap();
    assert_eq!(outcome.source_count, 2);
    // Highest importance leads the digest text.
    assert!(outcome.text.starts_with("incident review"));

    let digest = graph.get(&outcome.digest_id).unwrap();
    assert_eq!(digest.category, "digest");
    assert!((digest.importance - 0.9).abs() < 1e-9);
    assert!(digest.tags.contains(&"incident".into()));
    assert!(digest.tags.contains(&"postmortem".into()));
    assert!(digest
        .links
        .iter()
        .all(|l| l.link_type == LinkType::DigestOf));

    let source = graph.get(&a.id).unwrap();
    assert!(source
        .links
        .iter()
        .any(|l| l.target_id == digest.id && l.link_type == LinkType::DigestedInto));

    // A single source is not compressible.
    assert_eq!(
        graph
            .compress(&[a.id.clone()], &CompressOptions::default())
            .unwrap_err()
            .kind(),
        "invalid"
    );
}

#[test]
fn llm_compression_requires_chat_adapter() {
    let mut graph = engine();
    let a = store_text(&mut graph, "a", "first");
    let b = store_text(&mut graph, "a", "second");
    let err = graph
        .compress(
            &[a.id, b.id],
            &CompressOptions {
                method: engram_core::CompressionMethod::Llm,
                ..Default::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), "adapter_missing");
}

// ============================================================================
// EPISODES
// ============================================================================

#[test]
fn episode_lifecycle_recomputes_range_and_roster() {
    let mut graph = engine();
    let a = graph
        .store(
            "a",
            "sprint planning outcome",
            StoreOptions {
                event_time: Some("2026-07-01T10:00:00Z".into()),
                ..Default::default()
            },
        )
        .unwrap();
    let b = graph
        .store(
            "b",
            "sprint demo notes",
            StoreOptions {
                event_time: Some("2026-07-03T15:00:00Z".into()),
                ..Default::default()
            },
        )
        .unwrap();

    let episode = graph
        .create_episode("sprint 12", vec![a.id.clone()], vec![], None)
        .unwrap();
    assert_eq!(episode.agents, vec!["a".to_string()]);

    let episode = graph.add_to_episode(&episode.id, &[b.id.clone()]).unwrap();
    assert_eq!(episode.agents.len(), 2);
    assert_eq!(
        episode.time_range.start.to_rfc3339(),
        "2026-07-01T10:00:00+00:00"
    );
    assert_eq!(
        episode.time_range.end.to_rfc3339(),
        "2026-07-03T15:00:00+00:00"
    );

    let listed = graph.list_episodes(&EpisodeFilter {
        agent: Some("b".into()),
        tag: None,
    });
    assert_eq!(listed.len(), 1);

    let hits = graph.search_episode(&episode.id, "demo", 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, b.id);

    graph.delete_episode(&episode.id).unwrap();
    assert_eq!(
        graph.get_episode(&episode.id).unwrap_err().kind(),
        "not_found"
    );
}

#[test]
fn episode_summary_comes_from_chat_adapter() {
    let mut graph = engine().with_chat(Box::new(MockChat::scripted(vec![
        "The sprint shipped the auth rework.",
    ])));
    let a = store_text(&mut graph, "a", "auth rework merged");
    let episode = graph
        .create_episode("sprint", vec![a.id], vec![], None)
        .unwrap();

    let episode = graph.summarize_episode(&episode.id).unwrap();
    assert_eq!(
        episode.summary.as_deref(),
        Some("The sprint shipped the auth rework.")
    );

    // Without a chat adapter the operation refuses.
    let mut bare = engine();
    let b = store_text(&mut bare, "a", "memo");
    let bare_episode = bare.create_episode("e", vec![b.id], vec![], None).unwrap();
    assert_eq!(
        bare.summarize_episode(&bare_episode.id).unwrap_err().kind(),
        "adapter_missing"
    );
}

// ============================================================================
// EVOLVE
// ============================================================================

#[test]
fn evolve_updates_in_place_when_chat_says_update() {
    let mut graph = embedded_engine().with_chat(Box::new(MockChat::scripted(vec![
        r#"{"conflicts": [], "updates": [0]}"#,
    ])));
    let original = store_text(&mut graph, "a", "deploy window tuesday morning");

    let outcome = graph
        .evolve("a", "deploy window tuesday morning after standup", 0.8, None)
        .unwrap();
    assert_eq!(outcome.action, "updated");
    assert_eq!(outcome.id, original.id);
    assert!(outcome.error.is_none());

    let memory = graph.get(&original.id).unwrap();
    assert_eq!(memory.text, "deploy window tuesday morning after standup");
    assert!((memory.importance - 0.8).abs() < 1e-9);
    assert_eq!(memory.evolution.len(), 1);
    assert_eq!(memory.evolution[0].from, "deploy window tuesday morning");

    // The token index follows the edit.
    let hits = graph
        .search(Some("a"), "standup", &SearchOptions::default())
        .unwrap()
        .hits;
    assert_eq!(hits.len(), 1);
}

#[test]
fn evolve_archives_conflicts_and_stores_novel_text() {
    let mut graph = embedded_engine().with_chat(Box::new(MockChat::scripted(vec![
        r#"{"conflicts": [0], "updates": []}"#,
    ])));
    let wrong = store_text(&mut graph, "a", "service timeout is thirty seconds");

    let outcome = graph
        .evolve("a", "service timeout is sixty seconds now", 0.5, None)
        .unwrap();
    assert_eq!(outcome.action, "stored");
    assert_eq!(outcome.archived_conflicts, vec![wrong.id.clone()]);

    // The contradicted memory left the active set.
    assert_eq!(graph.get(&wrong.id).unwrap_err().kind(), "not_found");
    let replacement = graph.get(&outcome.id).unwrap();
    assert!(replacement.supersedes.contains(&wrong.id));
}

#[test]
fn evolve_surfaces_bad_chat_json_without_corrupting_state() {
    let mut graph = embedded_engine().with_chat(Box::new(MockChat::scripted(vec![
        "definitely not json",
    ])));
    store_text(&mut graph, "a", "cache ttl is five minutes");

    let outcome = graph
        .evolve("a", "cache ttl is five minutes by default", 0.5, None)
        .unwrap();
    // Parse failure is reported inline and the text lands as a new store.
    assert_eq!(outcome.action, "stored");
    assert!(outcome.error.is_some());
    assert_eq!(graph.len(), 2);
}

// ============================================================================
// AUTO-LABELING
// ============================================================================

#[test]
fn auto_label_clusters_creates_from_chat_json() {
    let mut graph = engine().with_chat(Box::new(MockChat::scripted(vec![
        r#"{"label": "Deploy process", "description": "Release workflow"}"#,
    ])));
    let a = store_text(&mut graph, "a", "deploys run from main");
    let b = store_text(&mut graph, "a", "deploy checklist lives in the wiki");
    let c = store_text(&mut graph, "a", "rollbacks use the previous tag");
    graph.link(&a.id, &b.id, LinkType::Related, None).unwrap();
    graph.link(&b.id, &c.id, LinkType::Related, None).unwrap();

    let report = graph.auto_label_clusters(3, 5).unwrap();
    assert_eq!(report.created.len(), 1);
    assert!(report.errors.is_empty());
    assert_eq!(report.created[0].label, "Deploy process");
    assert_eq!(report.created[0].memory_ids.len(), 3);

    // Bad JSON is an inline error, not a failure.
    let mut graph = engine().with_chat(Box::new(MockChat::scripted(vec!["nope"])));
    let a = store_text(&mut graph, "a", "one");
    let b = store_text(&mut graph, "a", "two");
    let c = store_text(&mut graph, "a", "three");
    graph.link(&a.id, &b.id, LinkType::Related, None).unwrap();
    graph.link(&b.id, &c.id, LinkType::Related, None).unwrap();
    let report = graph.auto_label_clusters(3, 5).unwrap();
    assert!(report.created.is_empty());
    assert_eq!(report.errors.len(), 1);
}
