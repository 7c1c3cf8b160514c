//! Write-path journeys: dedup by corroboration, trust-gated supersession,
//! quarantine on reverse trust, validation, and batch rollback.

use std::cell::RefCell;
use std::rc::Rc;

use engram_core::{
    EngineEvent, MemoryStorage, QuarantineReason, SearchOptions, Status, StoreManyItem,
    StoreOptions,
};
use engram_e2e_tests::{engine, store_claim, store_text};

#[test]
fn same_claim_twice_corroborates_instead_of_duplicating() {
    let mut graph = engine();

    let first = store_claim(
        &mut graph, "a", "Timezone is UTC", "user", "timezone", "UTC", "user_explicit",
    );
    assert!(!first.deduplicated);

    let second = store_claim(
        &mut graph, "a", "Timezone is UTC", "user", "timezone", "UTC", "user_explicit",
    );
    assert!(second.deduplicated);
    assert_eq!(second.id, first.id);
    assert_eq!(graph.len(), 1);

    let memory = graph.get(&first.id).unwrap();
    assert_eq!(memory.provenance.corroboration, 2);
}

#[test]
fn higher_trust_claim_supersedes_existing() {
    let mut graph = engine();
    let supersede_events = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&supersede_events);
    graph.on("supersede", move |event| {
        if let EngineEvent::Supersede {
            superseded_id,
            by_id,
        } = event
        {
            seen.borrow_mut().push((superseded_id.clone(), by_id.clone()));
        }
    });

    let old = store_claim(
        &mut graph, "a", "Theme is blue", "user", "theme", "blue", "inference",
    );
    let new = store_claim(
        &mut graph, "a", "Theme is green", "user", "theme", "green", "user_explicit",
    );
    assert!(!new.quarantined);

    let old_memory = graph.get(&old.id).unwrap();
    assert_eq!(old_memory.status, Status::Superseded);
    assert_eq!(old_memory.superseded_by.as_deref(), Some(new.id.as_str()));

    let new_memory = graph.get(&new.id).unwrap();
    assert!(new_memory.supersedes.contains(&old.id));
    assert!(new_memory
        .links
        .iter()
        .any(|l| l.target_id == old.id && l.link_type == engram_core::LinkType::Supersedes));

    assert_eq!(&*supersede_events.borrow(), &[(old.id, new.id)]);
}

#[test]
fn lower_trust_claim_is_quarantined_with_pending_conflict() {
    let mut graph = engine();

    let trusted = store_claim(
        &mut graph, "a", "Timezone is UTC", "user", "timezone", "UTC", "user_explicit",
    );
    let upstart = store_claim(
        &mut graph, "a", "Timezone is PST", "user", "timezone", "PST", "inference",
    );

    assert!(upstart.quarantined);
    assert!(upstart.pending_conflict_id.is_some());

    let memory = graph.get(&upstart.id).unwrap();
    assert_eq!(memory.status, Status::Quarantined);
    assert_eq!(
        memory.quarantine.as_ref().unwrap().reason,
        QuarantineReason::TrustInsufficient
    );

    let open = graph.pending_conflicts();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].new_id, upstart.id);
    assert_eq!(open[0].existing_id, trusted.id);

    // Default search only sees the trusted value.
    let hits = graph
        .search(Some("a"), "timezone", &SearchOptions::default())
        .unwrap()
        .hits;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.id, trusted.id);

    // Opting into quarantined results surfaces the challenger.
    let hits = graph
        .search(
            Some("a"),
            "timezone",
            &SearchOptions {
                include_quarantined: true,
                ..Default::default()
            },
        )
        .unwrap()
        .hits;
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().any(|h| h.memory.id == upstart.id));
}

#[test]
fn resolving_a_conflict_activates_the_challenger() {
    let mut graph = engine();
    store_claim(
        &mut graph, "a", "Timezone is UTC", "user", "timezone", "UTC", "user_explicit",
    );
    let upstart = store_claim(
        &mut graph, "a", "Timezone is PST", "user", "timezone", "PST", "inference",
    );
    let conflict_id = upstart.pending_conflict_id.unwrap();

    let resolved = graph
        .resolve_conflict(&conflict_id, engram_core::ConflictResolution::Supersede)
        .unwrap();
    assert_eq!(resolved.resolution.as_deref(), Some("supersede"));

    let memory = graph.get(&upstart.id).unwrap();
    assert_eq!(memory.status, Status::Active);
    assert!(memory.quarantine.as_ref().unwrap().resolved_at.is_some());

    // A second resolution attempt is a state conflict.
    let err = graph
        .resolve_conflict(&conflict_id, engram_core::ConflictResolution::KeepBoth)
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
}

#[test]
fn validation_rejects_bad_inputs_before_mutation() {
    let mut graph = engine();

    assert_eq!(
        graph
            .store("", "text", StoreOptions::default())
            .unwrap_err()
            .kind(),
        "invalid"
    );
    assert_eq!(
        graph
            .store("agent with spaces", "text", StoreOptions::default())
            .unwrap_err()
            .kind(),
        "invalid"
    );
    assert_eq!(
        graph.store("a", "   ", StoreOptions::default()).unwrap_err().kind(),
        "invalid"
    );
    assert_eq!(
        graph
            .store(
                "a",
                "text",
                StoreOptions {
                    event_time: Some("not-a-time".into()),
                    ..Default::default()
                }
            )
            .unwrap_err()
            .kind(),
        "invalid"
    );
    assert_eq!(
        graph
            .store(
                "a",
                "text",
                StoreOptions {
                    importance: Some(1.5),
                    ..Default::default()
                }
            )
            .unwrap_err()
            .kind(),
        "invalid"
    );
    // Session scope demands a session id.
    assert_eq!(
        graph
            .store(
                "a",
                "text",
                StoreOptions {
                    claim: Some(engram_core::ClaimInput {
                        subject: "user".into(),
                        predicate: "editor".into(),
                        value: "helix".into(),
                        scope: Some("session".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }
            )
            .unwrap_err()
            .kind(),
        "invalid"
    );
    assert!(graph.is_empty());
}

#[test]
fn capacity_limit_fails_closed() {
    let mut graph = engram_e2e_tests::engine_with_config(engram_core::EngineConfig {
        max_memories: 2,
        ..Default::default()
    });
    store_text(&mut graph, "a", "one");
    store_text(&mut graph, "a", "two");
    let err = graph
        .store("a", "three", StoreOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), "capacity_exceeded");
    assert_eq!(graph.len(), 2);
}

#[test]
fn store_many_rolls_back_on_persistence_failure() {
    // Keep a handle to the adapter so the failure switch stays reachable
    // after the engine takes ownership of its box.
    let storage = std::sync::Arc::new(MemoryStorage::new());
    let mut graph = engram_core::MemoryGraph::open(
        engram_core::EngineConfig::default(),
        Box::new(std::sync::Arc::clone(&storage)),
    )
    .unwrap();

    store_text(&mut graph, "a", "survivor");
    storage.set_fail_writes(true);

    let err = graph
        .store_many(
            "a",
            vec![
                StoreManyItem {
                    text: "batch one".into(),
                    options: StoreOptions::default(),
                },
                StoreManyItem {
                    text: "batch two".into(),
                    options: StoreOptions::default(),
                },
            ],
        )
        .unwrap_err();
    assert_eq!(err.kind(), "storage");

    // In-memory state rolled back to the pre-batch snapshot.
    assert_eq!(graph.len(), 1);
    assert!(graph.list(Some("a")).iter().all(|m| m.text == "survivor"));

    // And the engine still works once storage recovers.
    storage.set_fail_writes(false);
    let outcomes = graph
        .store_many(
            "a",
            vec![StoreManyItem {
                text: "batch one".into(),
                options: StoreOptions::default(),
            }],
        )
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(graph.len(), 2);
}

#[test]
fn store_many_enforces_batch_cap() {
    let mut graph = engram_e2e_tests::engine_with_config(engram_core::EngineConfig {
        max_batch_store: 2,
        ..Default::default()
    });
    let items: Vec<StoreManyItem> = (0..3)
        .map(|i| StoreManyItem {
            text: format!("item {i}"),
            options: StoreOptions::default(),
        })
        .collect();
    assert_eq!(
        graph.store_many("a", items).unwrap_err().kind(),
        "capacity_exceeded"
    );
    assert!(graph.is_empty());
}
