//! Graph journeys: auto-linking symmetry, manual link/unlink, traversal,
//! paths, clusters, and orphans.

use std::collections::HashMap;

use engram_core::{LinkType, MemoryGraph, SearchOptions, StorageAdapter, StoreOptions};
use engram_e2e_tests::mocks::MockEmbedding;
use engram_e2e_tests::{engine, store_text};

/// Engine whose embedder returns controlled vectors per exact text.
fn engine_with_vectors(vectors: &[(&str, Vec<f64>)]) -> MemoryGraph {
    let map: HashMap<String, Vec<f64>> = vectors
        .iter()
        .map(|(text, vector)| (text.to_string(), vector.clone()))
        .collect();
    engram_core::MemoryGraph::open(
        engram_core::EngineConfig::default(),
        Box::new(engram_core::MemoryStorage::new()),
    )
    .unwrap()
    .with_embedder(Box::new(MockEmbedding::fixed(map)))
}

#[test]
fn storing_similar_memories_links_both_sides() {
    let mut graph = engine_with_vectors(&[
        ("alpha system design", vec![1.0, 0.0, 0.0]),
        ("alpha system design notes", vec![0.95, 0.3, 0.0]),
        ("sourdough hydration", vec![0.0, 0.0, 1.0]),
    ]);

    let first = store_text(&mut graph, "a", "alpha system design");
    let second = store_text(&mut graph, "a", "alpha system design notes");
    let loner = store_text(&mut graph, "a", "sourdough hydration");

    assert_eq!(second.links, 1);
    assert_ne!(second.top_link, "none");

    // The bidirectional invariant: both endpoints carry the pair with the
    // same similarity and type.
    let a = graph.get(&first.id).unwrap();
    let b = graph.get(&second.id).unwrap();
    let forward = b.links.iter().find(|l| l.target_id == first.id).unwrap();
    let reverse = a.links.iter().find(|l| l.target_id == second.id).unwrap();
    assert_eq!(forward.link_type, LinkType::Similar);
    assert_eq!(reverse.link_type, LinkType::Similar);
    assert!((forward.similarity - reverse.similarity).abs() < 1e-12);

    assert!(graph.get(&loner.id).unwrap().links.is_empty());
}

#[test]
fn manual_link_upserts_and_unlink_is_idempotent() {
    let mut graph = engine();
    let a = store_text(&mut graph, "a", "first memory");
    let b = store_text(&mut graph, "a", "second memory");

    graph.link(&a.id, &b.id, LinkType::Related, Some(0.5)).unwrap();
    // Re-linking the same pair replaces, not duplicates.
    graph.link(&a.id, &b.id, LinkType::Supersedes, Some(0.8)).unwrap();

    let view = graph.links(&a.id).unwrap();
    assert_eq!(view.links.len(), 1);
    assert_eq!(view.links[0].link_type, LinkType::Supersedes);
    assert_eq!(view.links[0].similarity, 0.8);

    assert!(graph.unlink(&a.id, &b.id).unwrap());
    assert!(!graph.unlink(&a.id, &b.id).unwrap());

    // Self-links and unknown ids are rejected.
    assert_eq!(
        graph.link(&a.id, &a.id, LinkType::Related, None).unwrap_err().kind(),
        "invalid"
    );
    assert_eq!(
        graph.link(&a.id, "mem_missing", LinkType::Related, None).unwrap_err().kind(),
        "not_found"
    );
}

#[test]
fn traverse_respects_hops_and_type_filters() {
    let mut graph = engine();
    let a = store_text(&mut graph, "a", "node a");
    let b = store_text(&mut graph, "a", "node b");
    let c = store_text(&mut graph, "a", "node c");
    let d = store_text(&mut graph, "a", "node d");
    graph.link(&a.id, &b.id, LinkType::Related, Some(0.9)).unwrap();
    graph.link(&b.id, &c.id, LinkType::Related, Some(0.8)).unwrap();
    graph.link(&c.id, &d.id, LinkType::Supersedes, Some(1.0)).unwrap();

    let one_hop = graph.traverse(&a.id, 1, None).unwrap();
    assert_eq!(one_hop.len(), 2);
    assert_eq!(one_hop[0].id, a.id);
    assert_eq!(one_hop[0].hop, 0);
    assert_eq!(one_hop[0].similarity, 1.0);

    let all = graph.traverse(&a.id, 5, None).unwrap();
    assert_eq!(all.len(), 4);

    // Following only `related` edges stops before d.
    let related_only = graph
        .traverse(&a.id, 5, Some(&[LinkType::Related]))
        .unwrap();
    assert_eq!(related_only.len(), 3);
    assert!(related_only.iter().all(|n| n.id != d.id));
}

#[test]
fn path_reconstructs_shortest_route() {
    let mut graph = engine();
    let a = store_text(&mut graph, "a", "node a");
    let b = store_text(&mut graph, "a", "node b");
    let c = store_text(&mut graph, "a", "node c");
    let island = store_text(&mut graph, "a", "island");
    graph.link(&a.id, &b.id, LinkType::Related, None).unwrap();
    graph.link(&b.id, &c.id, LinkType::Related, None).unwrap();

    let result = graph.path(&a.id, &c.id, None).unwrap();
    assert!(result.found);
    assert_eq!(result.hops, 2);
    assert_eq!(result.path, vec![a.id.clone(), b.id.clone(), c.id.clone()]);

    let missing = graph.path(&a.id, &island.id, None).unwrap();
    assert!(!missing.found);
    assert!(missing.path.is_empty());
}

#[test]
fn clusters_report_members_agents_and_labels() {
    let mut graph = engine();
    let a = graph
        .store(
            "a",
            "auth service login flow",
            StoreOptions {
                tags: vec!["auth".into()],
                ..Default::default()
            },
        )
        .unwrap();
    let b = graph
        .store(
            "b",
            "auth service token refresh",
            StoreOptions {
                tags: vec!["auth".into(), "tokens".into()],
                ..Default::default()
            },
        )
        .unwrap();
    let c = store_text(&mut graph, "a", "auth service logout");
    store_text(&mut graph, "a", "completely separate note");
    graph.link(&a.id, &b.id, LinkType::Related, None).unwrap();
    graph.link(&b.id, &c.id, LinkType::Related, None).unwrap();

    let clusters = graph.graph_clusters(3);
    assert_eq!(clusters.len(), 1);
    let cluster = &clusters[0];
    assert_eq!(cluster.size, 3);
    assert_eq!(cluster.agents.get("a"), Some(&2));
    assert_eq!(cluster.agents.get("b"), Some(&1));
    assert_eq!(cluster.top_tags.first().map(|(t, _)| t.as_str()), Some("auth"));
    assert!(cluster.label.is_none());

    // A labeled cluster covering most members annotates the component.
    graph
        .create_cluster("authentication", vec![a.id.clone(), b.id.clone()], None)
        .unwrap();
    let clusters = graph.graph_clusters(3);
    assert_eq!(clusters[0].label.as_deref(), Some("authentication"));
}

#[test]
fn orphans_come_back_weakest_first() {
    let mut graph = engine();
    let linked_a = store_text(&mut graph, "a", "linked one");
    let linked_b = store_text(&mut graph, "a", "linked two");
    graph
        .link(&linked_a.id, &linked_b.id, LinkType::Related, None)
        .unwrap();
    graph
        .store(
            "a",
            "weak orphan",
            StoreOptions {
                importance: Some(0.1),
                ..Default::default()
            },
        )
        .unwrap();
    graph
        .store(
            "a",
            "strong orphan",
            StoreOptions {
                importance: Some(0.9),
                ..Default::default()
            },
        )
        .unwrap();

    let orphans = graph.orphans(Some("a"), 0);
    assert_eq!(orphans.len(), 2);
    assert_eq!(orphans[0].memory, "weak orphan");
    assert!(orphans[0].strength <= orphans[1].strength);
}

#[test]
fn links_view_renders_deleted_targets() {
    // A broken half loaded from storage (target gone) renders as
    // (deleted) instead of failing the view.
    use chrono::Utc;
    let storage = engram_core::MemoryStorage::new();
    let mut memory =
        engram_core::Memory::new("mem_keeper".into(), "a".into(), "keeper".into(), Utc::now());
    memory.links.push(engram_core::Link {
        target_id: "mem_ghost".into(),
        similarity: 0.8,
        link_type: LinkType::Related,
    });
    storage.save(std::slice::from_ref(&memory)).unwrap();

    let graph = engram_core::MemoryGraph::open(
        engram_core::EngineConfig::default(),
        Box::new(storage),
    )
    .unwrap();
    let view = graph.links("mem_keeper").unwrap();
    assert_eq!(view.links.len(), 1);
    assert_eq!(view.links[0].memory, "(deleted)");
    assert!(view.links[0].agent.is_empty());
}

#[test]
fn quarantine_reject_archives_and_removes() {
    let mut graph = engine();
    let keeper = store_text(&mut graph, "a", "keeper");
    let doomed = store_text(&mut graph, "a", "doomed");
    graph.link(&keeper.id, &doomed.id, LinkType::Related, None).unwrap();

    graph
        .quarantine(&doomed.id, engram_core::QuarantineReason::Manual, None)
        .unwrap();
    // Quarantining a non-active memory is a state conflict.
    assert_eq!(
        graph
            .quarantine(&doomed.id, engram_core::QuarantineReason::Manual, None)
            .unwrap_err()
            .kind(),
        "conflict"
    );
    graph
        .review_quarantine(&doomed.id, engram_core::ReviewAction::Reject, None)
        .unwrap();

    // The removed memory no longer resolves, and the survivor's broken
    // link half was cleaned.
    assert_eq!(graph.get(&doomed.id).unwrap_err().kind(), "not_found");
    assert!(graph.links(&keeper.id).unwrap().links.is_empty());
    let hits = graph
        .search(Some("a"), "doomed", &SearchOptions::default())
        .unwrap()
        .hits;
    assert!(hits.is_empty());
}
