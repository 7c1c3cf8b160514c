//! SQLite storage - the relational variant
//!
//! Normalized layout: one row per memory with its JSON document, plus a
//! separate links table holding one row per link direction so the
//! bidirectional invariant is visible to SQL. Incremental ops touch only
//! the rows an engine operation mutated.

use std::path::PathBuf;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{StorageAdapter, StorageCapabilities};
use crate::error::StorageError;
use crate::memory::{Episode, LabeledCluster, Link, Memory, PendingConflict};

/// SQLite-backed storage
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) the database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.into())?;
        Self::configure_connection(&conn)?;
        Self::apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn apply_schema(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                 seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                 id         TEXT NOT NULL UNIQUE,
                 agent      TEXT NOT NULL,
                 status     TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 doc        TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS links (
                 source_id  TEXT NOT NULL,
                 target_id  TEXT NOT NULL,
                 similarity REAL NOT NULL,
                 link_type  TEXT NOT NULL,
                 pos        INTEGER NOT NULL,
                 PRIMARY KEY (source_id, target_id)
             );
             CREATE INDEX IF NOT EXISTS idx_links_target ON links(target_id);
             CREATE TABLE IF NOT EXISTS archive (
                 seq INTEGER PRIMARY KEY AUTOINCREMENT,
                 id  TEXT NOT NULL UNIQUE,
                 doc TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS episodes (
                 seq INTEGER PRIMARY KEY AUTOINCREMENT,
                 id  TEXT NOT NULL UNIQUE,
                 doc TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS clusters (
                 seq INTEGER PRIMARY KEY AUTOINCREMENT,
                 id  TEXT NOT NULL UNIQUE,
                 doc TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS conflicts (
                 seq INTEGER PRIMARY KEY AUTOINCREMENT,
                 id  TEXT NOT NULL UNIQUE,
                 doc TEXT NOT NULL
             );",
        )?;
        Ok(())
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Serialize a memory without its links; links live in their own table.
    fn memory_doc(memory: &Memory) -> Result<String, StorageError> {
        let mut stripped = memory.clone();
        stripped.links = Vec::new();
        Ok(serde_json::to_string(&stripped)?)
    }

    fn insert_links(
        conn: &Connection,
        source_id: &str,
        links: &[Link],
    ) -> Result<(), StorageError> {
        conn.execute("DELETE FROM links WHERE source_id = ?1", params![source_id])?;
        let mut stmt = conn.prepare_cached(
            "INSERT INTO links (source_id, target_id, similarity, link_type, pos)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (pos, link) in links.iter().enumerate() {
            stmt.execute(params![
                source_id,
                link.target_id,
                link.similarity,
                link.link_type.as_str(),
                pos as i64,
            ])?;
        }
        Ok(())
    }

    fn load_links(conn: &Connection, source_id: &str) -> Result<Vec<Link>, StorageError> {
        let mut stmt = conn.prepare_cached(
            "SELECT target_id, similarity, link_type FROM links
             WHERE source_id = ?1 ORDER BY pos",
        )?;
        let rows = stmt.query_map(params![source_id], |row| {
            let target_id: String = row.get(0)?;
            let similarity: f64 = row.get(1)?;
            let link_type: String = row.get(2)?;
            Ok((target_id, similarity, link_type))
        })?;
        let mut links = Vec::new();
        for row in rows {
            let (target_id, similarity, link_type) = row?;
            links.push(Link {
                target_id,
                similarity,
                link_type: link_type.parse().unwrap_or_default(),
            });
        }
        Ok(links)
    }

    fn load_docs<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
    ) -> Result<Vec<T>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT doc FROM {table} ORDER BY seq"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    fn save_docs<T: serde::Serialize>(
        &self,
        table: &str,
        ids_docs: Vec<(String, &T)>,
    ) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM {table}"), [])?;
        {
            let mut stmt =
                tx.prepare(&format!("INSERT INTO {table} (id, doc) VALUES (?1, ?2)"))?;
            for (id, doc) in ids_docs {
                stmt.execute(params![id, serde_json::to_string(doc)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl StorageAdapter for SqliteStorage {
    fn load(&self) -> Result<Vec<Memory>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT doc FROM memories ORDER BY seq")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut memories: Vec<Memory> = Vec::new();
        for row in rows {
            memories.push(serde_json::from_str(&row?)?);
        }
        for memory in &mut memories {
            memory.links = Self::load_links(&conn, &memory.id)?;
        }
        Ok(memories)
    }

    fn save(&self, memories: &[Memory]) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM memories", [])?;
        tx.execute("DELETE FROM links", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO memories (id, agent, status, created_at, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for memory in memories {
                stmt.execute(params![
                    memory.id,
                    memory.agent,
                    memory.status.as_str(),
                    memory.created_at.to_rfc3339(),
                    Self::memory_doc(memory)?,
                ])?;
            }
        }
        for memory in memories {
            Self::insert_links(&tx, &memory.id, &memory.links)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_archive(&self) -> Result<Vec<Memory>, StorageError> {
        self.load_docs("archive")
    }

    fn save_archive(&self, memories: &[Memory]) -> Result<(), StorageError> {
        self.save_docs(
            "archive",
            memories.iter().map(|m| (m.id.clone(), m)).collect(),
        )
    }

    fn load_episodes(&self) -> Result<Vec<Episode>, StorageError> {
        self.load_docs("episodes")
    }

    fn save_episodes(&self, episodes: &[Episode]) -> Result<(), StorageError> {
        self.save_docs(
            "episodes",
            episodes.iter().map(|e| (e.id.clone(), e)).collect(),
        )
    }

    fn load_clusters(&self) -> Result<Vec<LabeledCluster>, StorageError> {
        self.load_docs("clusters")
    }

    fn save_clusters(&self, clusters: &[LabeledCluster]) -> Result<(), StorageError> {
        self.save_docs(
            "clusters",
            clusters.iter().map(|c| (c.id.clone(), c)).collect(),
        )
    }

    fn load_pending_conflicts(&self) -> Result<Vec<PendingConflict>, StorageError> {
        self.load_docs("conflicts")
    }

    fn save_pending_conflicts(&self, conflicts: &[PendingConflict]) -> Result<(), StorageError> {
        self.save_docs(
            "conflicts",
            conflicts.iter().map(|c| (c.id.clone(), c)).collect(),
        )
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
        let conn = self.conn();
        conn.execute(
            "INSERT INTO memories (id, agent, status, created_at, doc)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 agent = excluded.agent,
                 status = excluded.status,
                 created_at = excluded.created_at,
                 doc = excluded.doc",
            params![
                memory.id,
                memory.agent,
                memory.status.as_str(),
                memory.created_at.to_rfc3339(),
                Self::memory_doc(memory)?,
            ],
        )?;
        Self::insert_links(&conn, &memory.id, &memory.links)?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), StorageError> {
        let conn = self.conn();
        conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        conn.execute(
            "DELETE FROM links WHERE source_id = ?1 OR target_id = ?1",
            params![id],
        )?;
        Ok(())
    }

    fn upsert_links(&self, source_id: &str, links: &[Link]) -> Result<(), StorageError> {
        let conn = self.conn();
        Self::insert_links(&conn, source_id, links)
    }

    fn remove_links(&self, id: &str) -> Result<(), StorageError> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM links WHERE source_id = ?1 OR target_id = ?1",
            params![id],
        )?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::LinkType;
    use chrono::Utc;

    fn mem(storage: &SqliteStorage, text: &str) -> Memory {
        Memory::new(storage.gen_id(), "agent".into(), text.into(), Utc::now())
    }

    #[test]
    fn save_then_load_preserves_order_and_links() {
        let storage = SqliteStorage::in_memory().unwrap();
        let mut a = mem(&storage, "first");
        let mut b = mem(&storage, "second");
        a.links.push(Link {
            target_id: b.id.clone(),
            similarity: 0.82,
            link_type: LinkType::Similar,
        });
        b.links.push(Link {
            target_id: a.id.clone(),
            similarity: 0.82,
            link_type: LinkType::Similar,
        });

        storage.save(&[a.clone(), b.clone()]).unwrap();
        let loaded = storage.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, a.id);
        assert_eq!(loaded[1].id, b.id);
        assert_eq!(loaded[0].links.len(), 1);
        assert_eq!(loaded[0].links[0].target_id, b.id);
        assert_eq!(loaded[0].links[0].link_type, LinkType::Similar);
    }

    #[test]
    fn upsert_and_remove_touch_single_rows() {
        let storage = SqliteStorage::in_memory().unwrap();
        let a = mem(&storage, "keep");
        let mut b = mem(&storage, "replace me");
        storage.save(&[a.clone(), b.clone()]).unwrap();

        b.text = "replaced".into();
        storage.upsert(&b).unwrap();
        let loaded = storage.load().unwrap();
        assert_eq!(loaded[1].text, "replaced");

        storage.remove(&a.id).unwrap();
        let loaded = storage.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, b.id);
    }

    #[test]
    fn remove_drops_link_rows_on_both_sides() {
        let storage = SqliteStorage::in_memory().unwrap();
        let mut a = mem(&storage, "a");
        let b = mem(&storage, "b");
        a.links.push(Link {
            target_id: b.id.clone(),
            similarity: 0.9,
            link_type: LinkType::Related,
        });
        storage.save(&[a.clone(), b.clone()]).unwrap();

        storage.remove(&b.id).unwrap();
        let loaded = storage.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].links.is_empty());
    }

    #[test]
    fn episodes_and_conflicts_roundtrip() {
        let storage = SqliteStorage::in_memory().unwrap();
        let now = Utc::now();
        let episode = Episode {
            id: storage.gen_episode_id(),
            name: "sprint review".into(),
            summary: None,
            agents: vec!["agent".into()],
            memory_ids: vec!["mem_x".into()],
            tags: vec![],
            time_range: crate::memory::TimeRange { start: now, end: now },
            metadata: None,
            created_at: now,
            updated_at: now,
        };
        storage.save_episodes(std::slice::from_ref(&episode)).unwrap();
        let loaded = storage.load_episodes().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "sprint review");
        assert!(storage.load_pending_conflicts().unwrap().is_empty());
    }

    #[test]
    fn advertises_incremental() {
        let storage = SqliteStorage::in_memory().unwrap();
        assert!(storage.capabilities().incremental);
    }
}
