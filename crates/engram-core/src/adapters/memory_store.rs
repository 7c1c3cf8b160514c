//! Volatile in-memory storage
//!
//! Backs tests and embedding-free demos. Advertises the incremental
//! capability so the engine's incremental persistence path gets exercised
//! without a database.

use std::sync::Mutex;

use uuid::Uuid;

use super::{StorageAdapter, StorageCapabilities};
use crate::error::StorageError;
use crate::memory::{Episode, LabeledCluster, Link, Memory, PendingConflict};

#[derive(Debug, Default)]
struct State {
    memories: Vec<Memory>,
    archive: Vec<Memory>,
    episodes: Vec<Episode>,
    clusters: Vec<LabeledCluster>,
    conflicts: Vec<PendingConflict>,
}

/// In-process storage with no durability
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
    /// When true, every write fails; used to test rollback paths
    fail_writes: Mutex<bool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(StorageError::Unsupported("simulated write failure".into()));
        }
        Ok(())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StorageAdapter for MemoryStorage {
    fn load(&self) -> Result<Vec<Memory>, StorageError> {
        Ok(self.state().memories.clone())
    }

    fn save(&self, memories: &[Memory]) -> Result<(), StorageError> {
        self.check_writable()?;
        self.state().memories = memories.to_vec();
        Ok(())
    }

    fn load_archive(&self) -> Result<Vec<Memory>, StorageError> {
        Ok(self.state().archive.clone())
    }

    fn save_archive(&self, memories: &[Memory]) -> Result<(), StorageError> {
        self.check_writable()?;
        self.state().archive = memories.to_vec();
        Ok(())
    }

    fn load_episodes(&self) -> Result<Vec<Episode>, StorageError> {
        Ok(self.state().episodes.clone())
    }

    fn save_episodes(&self, episodes: &[Episode]) -> Result<(), StorageError> {
        self.check_writable()?;
        self.state().episodes = episodes.to_vec();
        Ok(())
    }

    fn load_clusters(&self) -> Result<Vec<LabeledCluster>, StorageError> {
        Ok(self.state().clusters.clone())
    }

    fn save_clusters(&self, clusters: &[LabeledCluster]) -> Result<(), StorageError> {
        self.check_writable()?;
        self.state().clusters = clusters.to_vec();
        Ok(())
    }

    fn load_pending_conflicts(&self) -> Result<Vec<PendingConflict>, StorageError> {
        Ok(self.state().conflicts.clone())
    }

    fn save_pending_conflicts(&self, conflicts: &[PendingConflict]) -> Result<(), StorageError> {
        self.check_writable()?;
        self.state().conflicts = conflicts.to_vec();
        Ok(())
    }

    fn gen_id(&self) -> String {
        format!("mem_{}", Uuid::new_v4())
    }

    fn gen_episode_id(&self) -> String {
        format!("ep_{}", Uuid::new_v4())
    }

    fn gen_cluster_id(&self) -> String {
        format!("cl_{}", Uuid::new_v4())
    }

    fn gen_conflict_id(&self) -> String {
        format!("pc_{}", Uuid::new_v4())
    }

    fn capabilities(&self) -> StorageCapabilities {
        StorageCapabilities {
            incremental: true,
            vector_search: false,
        }
    }

    fn upsert(&self, memory: &Memory) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut state = self.state();
        if let Some(existing) = state.memories.iter_mut().find(|m| m.id == memory.id) {
            *existing = memory.clone();
        } else {
            state.memories.push(memory.clone());
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        self.state().memories.retain(|m| m.id != id);
        Ok(())
    }

    fn upsert_links(&self, source_id: &str, links: &[Link]) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut state = self.state();
        if let Some(memory) = state.memories.iter_mut().find(|m| m.id == source_id) {
            memory.links = links.to_vec();
        }
        Ok(())
    }

    fn remove_links(&self, id: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        for memory in &mut self.state().memories {
            memory.links.retain(|l| l.target_id != id);
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn upsert_inserts_then_replaces() {
        let storage = MemoryStorage::new();
        let mut m = Memory::new(storage.gen_id(), "a".into(), "v1".into(), Utc::now());
        storage.upsert(&m).unwrap();
        m.text = "v2".into();
        storage.upsert(&m).unwrap();

        let loaded = storage.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].text, "v2");
    }

    #[test]
    fn simulated_failure_blocks_writes() {
        let storage = MemoryStorage::new();
        storage.set_fail_writes(true);
        assert!(storage.save(&[]).is_err());
        assert!(storage
            .upsert(&Memory::new("mem_x".into(), "a".into(), "t".into(), Utc::now()))
            .is_err());
        storage.set_fail_writes(false);
        assert!(storage.save(&[]).is_ok());
    }

    #[test]
    fn remove_links_cleans_both_sides() {
        let storage = MemoryStorage::new();
        let mut a = Memory::new("mem_a".into(), "a".into(), "a".into(), Utc::now());
        let b = Memory::new("mem_b".into(), "a".into(), "b".into(), Utc::now());
        a.links.push(Link {
            target_id: "mem_b".into(),
            similarity: 0.9,
            link_type: Default::default(),
        });
        storage.save(&[a, b]).unwrap();

        storage.remove_links("mem_b").unwrap();
        let loaded = storage.load().unwrap();
        assert!(loaded[0].links.is_empty());
    }
}
