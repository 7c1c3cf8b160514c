//! JSON file storage
//!
//! One JSON document per entity under a single directory. Writes go to a
//! temporary file in the same directory followed by a rename, so readers
//! never observe a partial file. Not incremental; the engine full-saves.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::StorageAdapter;
use crate::error::StorageError;
use crate::memory::{Episode, LabeledCluster, Memory, PendingConflict};

const MEMORIES_FILE: &str = "memories.json";
const ARCHIVE_FILE: &str = "archive.json";
const EPISODES_FILE: &str = "episodes.json";
const CLUSTERS_FILE: &str = "clusters.json";
const CONFLICTS_FILE: &str = "conflicts.json";

/// Directory-backed JSON storage
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open (creating the directory if needed).
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_doc<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, StorageError> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_doc<T: serde::Serialize>(&self, name: &str, items: &[T]) -> Result<(), StorageError> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        let raw = serde_json::to_string_pretty(items)?;
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl StorageAdapter for FileStorage {
    fn load(&self) -> Result<Vec<Memory>, StorageError> {
        self.read_doc(MEMORIES_FILE)
    }

    fn save(&self, memories: &[Memory]) -> Result<(), StorageError> {
        self.write_doc(MEMORIES_FILE, memories)
    }

    fn load_archive(&self) -> Result<Vec<Memory>, StorageError> {
        self.read_doc(ARCHIVE_FILE)
    }

    fn save_archive(&self, memories: &[Memory]) -> Result<(), StorageError> {
        self.write_doc(ARCHIVE_FILE, memories)
    }

    fn load_episodes(&self) -> Result<Vec<Episode>, StorageError> {
        self.read_doc(EPISODES_FILE)
    }

    fn save_episodes(&self, episodes: &[Episode]) -> Result<(), StorageError> {
        self.write_doc(EPISODES_FILE, episodes)
    }

    fn load_clusters(&self) -> Result<Vec<LabeledCluster>, StorageError> {
        self.read_doc(CLUSTERS_FILE)
    }

    fn save_clusters(&self, clusters: &[LabeledCluster]) -> Result<(), StorageError> {
        self.write_doc(CLUSTERS_FILE, clusters)
    }

    fn load_pending_conflicts(&self) -> Result<Vec<PendingConflict>, StorageError> {
        self.read_doc(CONFLICTS_FILE)
    }

    fn save_pending_conflicts(&self, conflicts: &[PendingConflict]) -> Result<(), StorageError> {
        self.write_doc(CONFLICTS_FILE, conflicts)
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
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn missing_files_load_empty() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        assert!(storage.load().unwrap().is_empty());
        assert!(storage.load_archive().unwrap().is_empty());
        assert!(storage.load_episodes().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_roundtrips_in_order() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        let now = Utc::now();
        let mut memories = vec![
            Memory::new(storage.gen_id(), "a".into(), "first".into(), now),
            Memory::new(storage.gen_id(), "a".into(), "second".into(), now),
        ];
        memories[0].embedding = Some(vec![0.25, -0.5]);
        memories[1].tags = vec!["alpha".into()];

        storage.save(&memories).unwrap();
        let loaded = storage.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, memories[0].id);
        assert_eq!(loaded[0].embedding, memories[0].embedding);
        assert_eq!(loaded[1].text, "second");
        assert_eq!(loaded[1].tags, memories[1].tags);
    }

    #[test]
    fn writes_leave_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage.save(&[]).unwrap();
        storage.save_archive(&[]).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn ids_are_prefixed_and_unique() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let a = storage.gen_id();
        let b = storage.gen_id();
        assert!(a.starts_with("mem_") && b.starts_with("mem_"));
        assert_ne!(a, b);
        assert!(storage.gen_episode_id().starts_with("ep_"));
        assert!(storage.gen_cluster_id().starts_with("cl_"));
        assert!(storage.gen_conflict_id().starts_with("pc_"));
    }

    #[test]
    fn not_incremental() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        assert!(!storage.capabilities().incremental);
    }
}
