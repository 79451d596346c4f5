//! SQLite-backed document store. Persistent across process restarts.
//!
//! Reference driver for the [`DocumentStore`] contract: three tables mirror
//! the logical collections, rows carry the full record as JSON text plus the
//! indexed columns (`agent_id`, `kind`, `session_id`, `user_id`, `turn`,
//! `timestamp`, `importance`). Every synchronous SQLite call runs inside
//! `spawn_blocking` on a file-backed connection.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::memory::document_store::{DocumentStore, MemoryOrder, MemoryQuery, StoreError};
use crate::memory::entry::{LearningMetrics, MemoryEntry, UserPreference};

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn storage(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// SQLite-backed [`DocumentStore`].
pub struct SqliteDocumentStore {
    db_path: std::path::PathBuf,
}

impl SqliteDocumentStore {
    /// Opens (or creates) the database file and ensures tables and indexes.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                kind TEXT,
                session_id TEXT,
                user_id TEXT,
                turn INTEGER,
                timestamp INTEGER NOT NULL,
                importance REAL NOT NULL,
                tags TEXT NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memories_agent ON memories(agent_id);
            CREATE INDEX IF NOT EXISTS idx_memories_kind ON memories(kind);
            CREATE INDEX IF NOT EXISTS idx_memories_session ON memories(session_id);
            CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id);
            CREATE INDEX IF NOT EXISTS idx_memories_timestamp ON memories(timestamp);
            CREATE INDEX IF NOT EXISTS idx_memories_importance ON memories(importance);

            CREATE TABLE IF NOT EXISTS learning_metrics (
                agent_id TEXT NOT NULL,
                task_type TEXT NOT NULL,
                doc TEXT NOT NULL,
                PRIMARY KEY (agent_id, task_type)
            );

            CREATE TABLE IF NOT EXISTS user_preferences (
                user_id TEXT NOT NULL,
                preference_type TEXT NOT NULL,
                doc TEXT NOT NULL,
                PRIMARY KEY (user_id, preference_type)
            );
            "#,
        )
        .map_err(storage)?;
        Ok(Self { db_path })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn upsert_memory(&self, entry: &MemoryEntry) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let entry = entry.clone();
        let doc = serde_json::to_string(&entry)?;
        let tags = serde_json::to_string(&entry.tags)?;

        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            let kind = entry
                .content
                .get("kind")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string);
            let session_id = entry
                .content
                .get("session_id")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string);
            let user_id = entry
                .content
                .get("user_id")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string);
            let turn = entry
                .content
                .get("conversation_turn")
                .and_then(serde_json::Value::as_i64);
            conn.execute(
                "INSERT OR REPLACE INTO memories \
                 (id, agent_id, kind, session_id, user_id, turn, timestamp, importance, tags, doc) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    entry.id,
                    entry.agent_id,
                    kind,
                    session_id,
                    user_id,
                    turn,
                    millis(entry.timestamp),
                    entry.importance,
                    tags,
                    doc,
                ],
            )
            .map_err(storage)?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(storage)?
    }

    async fn upsert_metrics(&self, metrics: &LearningMetrics) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let agent_id = metrics.agent_id.clone();
        let task_type = metrics.task_type.clone();
        let doc = serde_json::to_string(metrics)?;

        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            conn.execute(
                "INSERT OR REPLACE INTO learning_metrics (agent_id, task_type, doc) VALUES (?1, ?2, ?3)",
                params![agent_id, task_type, doc],
            )
            .map_err(storage)?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(storage)?
    }

    async fn upsert_preference(&self, preference: &UserPreference) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let user_id = preference.user_id.clone();
        let preference_type = preference.preference_type.clone();
        let doc = serde_json::to_string(preference)?;

        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            conn.execute(
                "INSERT OR REPLACE INTO user_preferences (user_id, preference_type, doc) VALUES (?1, ?2, ?3)",
                params![user_id, preference_type, doc],
            )
            .map_err(storage)?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(storage)?
    }

    async fn find_memories(&self, query: &MemoryQuery) -> Result<Vec<MemoryEntry>, StoreError> {
        let db_path = self.db_path.clone();
        let query = query.clone();

        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;

            let mut sql = String::from("SELECT doc, tags FROM memories WHERE 1=1");
            let mut args: Vec<rusqlite::types::Value> = Vec::new();
            if let Some(kind) = &query.kind {
                sql.push_str(" AND kind = ?");
                args.push(kind.clone().into());
            }
            if let Some(session_id) = &query.session_id {
                sql.push_str(" AND session_id = ?");
                args.push(session_id.clone().into());
            }
            if let Some(user_id) = &query.user_id {
                sql.push_str(" AND user_id = ?");
                args.push(user_id.clone().into());
            }
            if let Some(since) = &query.since {
                sql.push_str(" AND timestamp >= ?");
                args.push(millis(*since).into());
            }
            match query.order {
                MemoryOrder::TurnDesc => sql.push_str(" ORDER BY turn DESC"),
                MemoryOrder::TimestampDesc => sql.push_str(" ORDER BY timestamp DESC"),
            }
            sql.push_str(" LIMIT ?");
            args.push((query.limit as i64).into());

            let mut stmt = conn.prepare(&sql).map_err(storage)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(args), |row| {
                    let doc: String = row.get(0)?;
                    let tags: String = row.get(1)?;
                    Ok((doc, tags))
                })
                .map_err(storage)?;

            let mut out = Vec::new();
            for row in rows {
                let (doc, tags) = row.map_err(storage)?;
                let tags: Vec<String> = serde_json::from_str(&tags)?;
                if !query.tags_all.iter().all(|t| tags.contains(t)) {
                    continue;
                }
                let entry: MemoryEntry = serde_json::from_str(&doc)?;
                out.push(entry);
            }
            Ok::<Vec<MemoryEntry>, StoreError>(out)
        })
        .await
        .map_err(storage)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    use crate::memory::entry::MemoryKind;

    fn from_millis(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn turn_entry(id: &str, session: &str, user: &str, turn: i64) -> MemoryEntry {
        MemoryEntry {
            id: id.to_string(),
            timestamp: from_millis(1_700_000_000_000 + turn * 1000),
            agent_id: "system".to_string(),
            kind: MemoryKind::Episodic,
            content: json!({
                "kind": "conversation_turn",
                "session_id": session,
                "user_id": user,
                "user_request": format!("request {turn}"),
                "agent_response": {"summary": "ok"},
                "conversation_turn": turn,
                "timestamp": "2024-01-01T00:00:00Z",
            }),
            importance: 0.8,
            access_count: 0,
            last_accessed: Utc::now(),
            tags: vec![
                "conversation".to_string(),
                session.to_string(),
                user.to_string(),
                format!("turn_{turn}"),
            ],
            associations: vec![],
        }
    }

    /// **Scenario**: Upserted conversation turns come back newest-turn-first
    /// through the conversation query.
    #[tokio::test]
    async fn conversation_round_trip_turn_desc() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteDocumentStore::new(dir.path().join("mem.db")).unwrap();

        store.upsert_memory(&turn_entry("m1", "s1", "u1", 1)).await.unwrap();
        store.upsert_memory(&turn_entry("m2", "s1", "u1", 2)).await.unwrap();
        store.upsert_memory(&turn_entry("m3", "other", "u1", 1)).await.unwrap();

        let rows = store
            .find_memories(&MemoryQuery::conversation("s1", 10))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].content["conversation_turn"], json!(2));
        assert_eq!(rows[1].content["conversation_turn"], json!(1));
    }

    /// **Scenario**: Upsert by id replaces the row instead of duplicating it.
    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteDocumentStore::new(dir.path().join("mem.db")).unwrap();

        let mut entry = turn_entry("same", "s1", "u1", 1);
        store.upsert_memory(&entry).await.unwrap();
        entry.content["user_request"] = json!("amended");
        store.upsert_memory(&entry).await.unwrap();

        let rows = store
            .find_memories(&MemoryQuery::conversation("s1", 10))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content["user_request"], json!("amended"));
    }

    /// **Scenario**: The time-window query excludes records before `since`.
    #[tokio::test]
    async fn recent_conversations_respects_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteDocumentStore::new(dir.path().join("mem.db")).unwrap();

        store.upsert_memory(&turn_entry("old", "s1", "u1", 1)).await.unwrap();
        store.upsert_memory(&turn_entry("new", "s2", "u1", 9)).await.unwrap();

        let since = from_millis(1_700_000_000_000 + 5_000);
        let rows = store
            .find_memories(&MemoryQuery::recent_conversations("u1", since, 10))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "new");
    }
}
