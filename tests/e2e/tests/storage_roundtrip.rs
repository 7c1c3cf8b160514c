//! Storage round-trips across adapters, plus health and timeline smoke.

use chrono::{Duration, Utc};
use engram_core::{
    EngineConfig, FileStorage, Link, LinkType, Memory, MemoryGraph, SqliteStorage,
    StorageAdapter, StoreOptions, TimeField,
};
use engram_e2e_tests::{engine, store_claim, store_text};
use tempfile::TempDir;

/// A memory exercising every optional field group.
fn rich_memory(id: &str) -> Memory {
    let now = Utc::now();
    let mut memory = Memory::new(
        id.to_string(),
        "agent-7".to_string(),
        "quarterly goals locked".to_string(),
        now,
    );
    memory.category = "decision".into();
    memory.importance = 0.8;
    memory.tags = vec!["planning".into(), "q3".into()];
    memory.embedding = Some(vec![0.1, -0.4, 0.9]);
    memory.event_at = Some(now - Duration::days(2));
    memory.stability = Some(3.5);
    memory.last_review_interval = Some(1.25);
    memory.claim = Some(engram_core::Claim {
        subject: "team".into(),
        predicate: "goal".into(),
        value: "ship v2".into(),
        normalized_value: Some("ship v2".into()),
        scope: engram_core::ClaimScope::Global,
        session_id: None,
        valid_from: None,
        valid_until: None,
        exclusive: true,
    });
    memory
}

fn roundtrip(storage: &dyn StorageAdapter) {
    let mut a = rich_memory("mem_a");
    let mut b = Memory::new("mem_b".into(), "agent-7".into(), "second".into(), Utc::now());
    a.links.push(Link {
        target_id: "mem_b".into(),
        similarity: 0.88,
        link_type: LinkType::Similar,
    });
    b.links.push(Link {
        target_id: "mem_a".into(),
        similarity: 0.88,
        link_type: LinkType::Similar,
    });

    storage.save(&[a.clone(), b.clone()]).unwrap();
    let loaded = storage.load().unwrap();

    assert_eq!(loaded.len(), 2);
    // Order preserved, fields equal under canonical JSON comparison.
    assert_eq!(
        serde_json::to_value(&loaded[0]).unwrap(),
        serde_json::to_value(&a).unwrap()
    );
    assert_eq!(
        serde_json::to_value(&loaded[1]).unwrap(),
        serde_json::to_value(&b).unwrap()
    );
}

#[test]
fn file_storage_roundtrips_canonically() {
    let dir = TempDir::new().unwrap();
    let storage = FileStorage::new(dir.path()).unwrap();
    roundtrip(&storage);
}

#[test]
fn sqlite_storage_roundtrips_canonically() {
    let storage = SqliteStorage::in_memory().unwrap();
    roundtrip(&storage);
}

#[test]
fn engine_state_survives_reopen_on_file_storage() {
    let dir = TempDir::new().unwrap();

    let first_id;
    {
        let storage = FileStorage::new(dir.path()).unwrap();
        let mut graph = MemoryGraph::open(EngineConfig::default(), Box::new(storage)).unwrap();
        first_id = store_claim(
            &mut graph, "a", "Timezone is UTC", "user", "timezone", "UTC", "user_explicit",
        )
        .id;
        graph
            .create_episode("bootstrap", vec![first_id.clone()], vec![], None)
            .unwrap();
    }

    let storage = FileStorage::new(dir.path()).unwrap();
    let mut graph = MemoryGraph::open(EngineConfig::default(), Box::new(storage)).unwrap();
    assert_eq!(graph.len(), 1);
    assert_eq!(graph.get(&first_id).unwrap().text, "Timezone is UTC");
    assert_eq!(graph.list_episodes(&Default::default()).len(), 1);

    // The rebuilt claim index still dedups.
    let again = store_claim(
        &mut graph, "a", "Timezone is UTC", "user", "timezone", "UTC", "user_explicit",
    );
    assert!(again.deduplicated);
    assert_eq!(again.id, first_id);
}

#[test]
fn health_reports_totals_and_buckets() {
    let mut graph = engine();
    let a = store_text(&mut graph, "a", "first note");
    let b = store_text(&mut graph, "b", "second note");
    graph.link(&a.id, &b.id, LinkType::Related, None).unwrap();

    let report = graph.health().unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.by_agent.get("a"), Some(&1));
    assert_eq!(report.by_agent.get("b"), Some(&1));
    assert_eq!(report.links_total, 1);
    assert_eq!(report.cross_agent_links, 1);
    assert_eq!(report.orphans, 0);
    assert!(report.avg_strength > 0.0);
    assert_eq!(report.sm2_count, 0);

    graph.reinforce(&a.id, 0.1).unwrap();
    let report = graph.health().unwrap();
    assert_eq!(report.sm2_count, 1);
    assert!(report.avg_stability.is_some());
}

#[test]
fn timeline_groups_by_day_and_honors_time_field() {
    let mut graph = engine();
    graph
        .store(
            "a",
            "yesterday's incident",
            StoreOptions {
                event_time: Some((Utc::now() - Duration::days(1)).to_rfc3339()),
                ..Default::default()
            },
        )
        .unwrap();
    store_text(&mut graph, "a", "today's note");

    let days = graph.timeline(Some("a"), 7, TimeField::Auto);
    let total: usize = days.iter().map(|d| d.entries.len()).sum();
    assert_eq!(total, 2);
    // Newest day first.
    assert!(days.len() >= 1);
    assert!(days.windows(2).all(|w| w[0].date >= w[1].date));

    // Only memories with an explicit event time survive the event axis.
    let days = graph.timeline(Some("a"), 7, TimeField::Event);
    let total: usize = days.iter().map(|d| d.entries.len()).sum();
    assert_eq!(total, 1);
}
