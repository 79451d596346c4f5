//! Optional persistence contract for the memory subsystem.
//!
//! A document store exposes upsert for the three collections (`memories`,
//! `learning_metrics`, `user_preferences`) and an indexed find over
//! `memories`. Any driver honoring this trait can back the memory system;
//! the bundled reference implementation is [`SqliteDocumentStore`].
//!
//! [`SqliteDocumentStore`]: crate::memory::SqliteDocumentStore

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::memory::entry::{LearningMetrics, MemoryEntry, UserPreference};

/// Persistence error. Callers of the memory system never see this: every
/// persistence call is guarded and logged instead of propagated.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sort order for memory queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOrder {
    /// Conversation-turn number, newest turn first.
    TurnDesc,
    /// Record timestamp, newest first.
    TimestampDesc,
}

/// Indexed find over the `memories` collection.
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    /// Every listed tag must be present on the record.
    pub tags_all: Vec<String>,
    /// Matches `content.kind`.
    pub kind: Option<String>,
    /// Matches `content.session_id`.
    pub session_id: Option<String>,
    /// Matches `content.user_id`.
    pub user_id: Option<String>,
    /// Only records at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub order: MemoryOrder,
    pub limit: usize,
}

impl MemoryQuery {
    /// Conversation turns for one session, newest turn first.
    pub fn conversation(session_id: &str, limit: usize) -> Self {
        Self {
            tags_all: vec!["conversation".to_string(), session_id.to_string()],
            kind: Some("conversation_turn".to_string()),
            session_id: Some(session_id.to_string()),
            user_id: None,
            since: None,
            order: MemoryOrder::TurnDesc,
            limit,
        }
    }

    /// Recent conversation turns for one user inside a time window.
    pub fn recent_conversations(user_id: &str, since: DateTime<Utc>, limit: usize) -> Self {
        Self {
            tags_all: vec!["conversation".to_string(), user_id.to_string()],
            kind: Some("conversation_turn".to_string()),
            session_id: None,
            user_id: Some(user_id.to_string()),
            since: Some(since),
            order: MemoryOrder::TimestampDesc,
            limit,
        }
    }
}

/// Document persistence for the memory subsystem.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Upserts a memory record by id into `memories`.
    async fn upsert_memory(&self, entry: &MemoryEntry) -> Result<(), StoreError>;

    /// Upserts by the unique `(agent_id, task_type)` key into `learning_metrics`.
    async fn upsert_metrics(&self, metrics: &LearningMetrics) -> Result<(), StoreError>;

    /// Upserts by the unique `(user_id, preference_type)` key into `user_preferences`.
    async fn upsert_preference(&self, preference: &UserPreference) -> Result<(), StoreError>;

    /// Indexed find over `memories`.
    async fn find_memories(&self, query: &MemoryQuery) -> Result<Vec<MemoryEntry>, StoreError>;
}
