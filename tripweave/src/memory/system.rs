//! The shared memory system: partitioned stores, tag index, learning metrics,
//! user preferences, caching, and conversation history.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::memory::document_store::{DocumentStore, MemoryQuery};
use crate::memory::entry::{
    ConversationTurn, LearningMetrics, MemoryEntry, MemoryKind, UserPreference,
};

/// Stable cache fingerprint: first 24 hex chars of SHA-256 over the
/// lowercased, trimmed `user_id|task_type|user_request` triple.
pub fn make_fingerprint(user_id: &str, task_type: &str, user_request: &str) -> String {
    let key = format!(
        "{}|{}|{}",
        user_id.trim().to_lowercase(),
        task_type.trim().to_lowercase(),
        user_request.trim().to_lowercase()
    );
    let digest = Sha256::digest(key.as_bytes());
    hex_prefix(&digest, 24)
}

/// Memory-entry id: first 16 hex chars of SHA-256 over agent id, content
/// JSON, and the creation instant.
pub fn memory_id(agent_id: &str, content: &Value, at: DateTime<Utc>) -> String {
    let canonical = content.to_string();
    let input = format!("{agent_id}|{canonical}|{}", at.to_rfc3339());
    let digest = Sha256::digest(input.as_bytes());
    hex_prefix(&digest, 16)
}

fn hex_prefix(digest: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}

#[derive(Default)]
struct Inner {
    episodic: HashMap<String, MemoryEntry>,
    semantic: HashMap<String, MemoryEntry>,
    procedural: HashMap<String, MemoryEntry>,
    working: HashMap<String, MemoryEntry>,
    tag_index: HashMap<String, Vec<String>>,
    metrics: HashMap<(String, String), LearningMetrics>,
    preferences: HashMap<(String, String), UserPreference>,
}

impl Inner {
    fn partition_mut(&mut self, kind: MemoryKind) -> &mut HashMap<String, MemoryEntry> {
        match kind {
            MemoryKind::Episodic => &mut self.episodic,
            MemoryKind::Semantic => &mut self.semantic,
            MemoryKind::Procedural => &mut self.procedural,
            MemoryKind::Working => &mut self.working,
        }
    }

    fn all_entries(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.episodic
            .values()
            .chain(self.semantic.values())
            .chain(self.procedural.values())
            .chain(self.working.values())
    }

    fn index_tags(&mut self, entry: &MemoryEntry) {
        for tag in &entry.tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .push(entry.id.clone());
        }
    }
}

/// Process-wide memory system. Shared by all agents and requests; one lock
/// guards the partitions, tag index, metrics, and preferences so indexes stay
/// consistent with storage. Persistence is optional write-through: failures
/// are logged and never surface to callers.
pub struct MemorySystem {
    inner: RwLock<Inner>,
    store: Option<Arc<dyn DocumentStore>>,
}

impl MemorySystem {
    /// In-memory only.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            store: None,
        }
    }

    /// With write-through persistence.
    pub fn with_store(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            store: Some(store),
        }
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Stores a memory entry; returns its id.
    pub async fn store(
        &self,
        agent_id: &str,
        kind: MemoryKind,
        content: Value,
        importance: f64,
        tags: Vec<String>,
    ) -> String {
        let now = Utc::now();
        let entry = MemoryEntry {
            id: memory_id(agent_id, &content, now),
            timestamp: now,
            agent_id: agent_id.to_string(),
            kind,
            content,
            importance: importance.clamp(0.0, 1.0),
            access_count: 0,
            last_accessed: now,
            tags,
            associations: Vec::new(),
        };

        {
            let mut inner = self.inner.write().await;
            inner.index_tags(&entry);
            inner.partition_mut(kind).insert(entry.id.clone(), entry.clone());
        }
        self.persist_memory(&entry).await;
        entry.id
    }

    /// Retrieves memories filtered by agent, kind, and tags, sorted by
    /// `(importance, timestamp)` descending. Returned records get their
    /// access count bumped.
    pub async fn retrieve(
        &self,
        agent_id: Option<&str>,
        kind: Option<MemoryKind>,
        tags: Option<&[String]>,
        limit: usize,
    ) -> Vec<MemoryEntry> {
        let mut inner = self.inner.write().await;

        let mut matches: Vec<(MemoryKind, String)> = inner
            .all_entries()
            .filter(|m| agent_id.map_or(true, |a| m.agent_id == a))
            .filter(|m| kind.map_or(true, |k| m.kind == k))
            .filter(|m| {
                tags.map_or(true, |ts| ts.iter().any(|t| m.tags.contains(t)))
            })
            .map(|m| (m.kind, m.id.clone()))
            .collect();

        matches.sort_by(|a, b| {
            let ia = inner.partition_ref(a.0, &a.1);
            let ib = inner.partition_ref(b.0, &b.1);
            match (ia, ib) {
                (Some(x), Some(y)) => y
                    .importance
                    .partial_cmp(&x.importance)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(y.timestamp.cmp(&x.timestamp)),
                _ => std::cmp::Ordering::Equal,
            }
        });
        matches.truncate(limit);

        let now = Utc::now();
        let mut out = Vec::with_capacity(matches.len());
        for (kind, id) in matches {
            if let Some(entry) = inner.partition_mut(kind).get_mut(&id) {
                entry.access_count += 1;
                entry.last_accessed = now;
                out.push(entry.clone());
            }
        }
        out
    }

    /// Folds one task outcome into the `(agent_id, task_type)` metric and
    /// stores an episodic learning record.
    pub async fn learn_from_interaction(
        &self,
        agent_id: &str,
        task_type: &str,
        success: bool,
        response_time: f64,
        context: Value,
    ) {
        let metrics = {
            let mut inner = self.inner.write().await;
            let metrics = inner
                .metrics
                .entry((agent_id.to_string(), task_type.to_string()))
                .or_insert_with(|| LearningMetrics::new(agent_id, task_type));
            metrics.record(success, response_time);
            metrics.clone()
        };

        self.store(
            agent_id,
            MemoryKind::Episodic,
            json!({
                "task_type": task_type,
                "success": success,
                "response_time": response_time,
                "context": context,
                "metrics": {
                    "success_rate": metrics.success_rate,
                    "average_response_time": metrics.average_response_time,
                },
            }),
            0.7,
            vec![task_type.to_string(), "learning".to_string(), "performance".to_string()],
        )
        .await;

        self.persist_metrics(&metrics).await;
    }

    /// Reinforce-or-replace preference learning.
    pub async fn learn_user_preference(
        &self,
        user_id: &str,
        preference_type: &str,
        value: Value,
        confidence: f64,
        session_id: Option<&str>,
    ) {
        let preference = {
            let mut inner = self.inner.write().await;
            let key = (user_id.to_string(), preference_type.to_string());
            let pref = inner.preferences.entry(key).or_insert_with(|| UserPreference {
                user_id: user_id.to_string(),
                preference_type: preference_type.to_string(),
                value: value.clone(),
                confidence,
                learned_from_sessions: Vec::new(),
                last_reinforced: Utc::now(),
            });
            if pref.value == value {
                pref.confidence = (pref.confidence + 0.1).min(1.0);
            } else {
                pref.value = value.clone();
                pref.confidence = confidence;
            }
            if let Some(session) = session_id {
                pref.learned_from_sessions.push(session.to_string());
            }
            pref.last_reinforced = Utc::now();
            pref.clone()
        };

        self.store(
            "system",
            MemoryKind::Semantic,
            json!({
                "user_id": user_id,
                "preference_type": preference_type,
                "preference_value": value,
                "confidence": preference.confidence,
            }),
            0.8,
            vec![
                "user_preference".to_string(),
                preference_type.to_string(),
                user_id.to_string(),
            ],
        )
        .await;

        self.persist_preference(&preference).await;
    }

    /// All learned preferences for a user, keyed by preference type.
    pub async fn get_user_preferences(&self, user_id: &str) -> Map<String, Value> {
        let inner = self.inner.read().await;
        let mut out = Map::new();
        for ((uid, ptype), pref) in &inner.preferences {
            if uid == user_id {
                out.insert(
                    ptype.clone(),
                    json!({ "value": pref.value, "confidence": pref.confidence }),
                );
            }
        }
        out
    }

    /// Learning metrics, optionally filtered by agent id.
    pub async fn get_learning_metrics(&self, agent_id: Option<&str>) -> Vec<LearningMetrics> {
        let inner = self.inner.read().await;
        inner
            .metrics
            .values()
            .filter(|m| agent_id.map_or(true, |a| m.agent_id == a))
            .cloned()
            .collect()
    }

    /// Caches a result under the request fingerprint. The stored value is an
    /// independent copy.
    pub async fn save_cached_result(
        &self,
        agent_id: &str,
        user_id: &str,
        task_type: &str,
        user_request: &str,
        result: &Value,
    ) -> String {
        let fp = make_fingerprint(user_id, task_type, user_request);
        self.store(
            agent_id,
            MemoryKind::Episodic,
            json!({
                "kind": "cache",
                "fingerprint": fp,
                "user_id": user_id,
                "task_type": task_type,
                "user_request": user_request,
                "result": result.clone(),
            }),
            0.6,
            vec![
                "cache".to_string(),
                user_id.to_string(),
                task_type.to_string(),
                fp.clone(),
            ],
        )
        .await
    }

    /// Loads a cached result if present and younger than `max_age_hours`.
    /// The returned value is an independent copy.
    pub async fn load_cached_result(
        &self,
        user_id: &str,
        task_type: &str,
        user_request: &str,
        max_age_hours: i64,
    ) -> Option<Value> {
        let fp = make_fingerprint(user_id, task_type, user_request);
        let cutoff = Utc::now() - Duration::hours(max_age_hours);
        let inner = self.inner.read().await;
        for entry in inner.episodic.values() {
            if !entry.tags.iter().any(|t| t == "cache") {
                continue;
            }
            if !entry.tags.iter().any(|t| t == &fp) {
                continue;
            }
            if entry.timestamp < cutoff {
                continue;
            }
            let content = &entry.content;
            if content.get("kind").and_then(Value::as_str) == Some("cache")
                && content.get("fingerprint").and_then(Value::as_str) == Some(fp.as_str())
            {
                if let Some(result) = content.get("result").filter(|r| r.is_object()) {
                    return Some(result.clone());
                }
            }
        }
        None
    }

    /// Stores one conversation turn as an episodic record.
    pub async fn store_conversation_turn(
        &self,
        session_id: &str,
        user_id: &str,
        user_request: &str,
        agent_response: &Value,
        conversation_turn: u32,
    ) -> String {
        self.store(
            "system",
            MemoryKind::Episodic,
            json!({
                "kind": "conversation_turn",
                "session_id": session_id,
                "user_id": user_id,
                "user_request": user_request,
                "agent_response": agent_response.clone(),
                "conversation_turn": conversation_turn,
                "timestamp": Utc::now().to_rfc3339(),
            }),
            0.8,
            vec![
                "conversation".to_string(),
                session_id.to_string(),
                user_id.to_string(),
                format!("turn_{conversation_turn}"),
            ],
        )
        .await
    }

    /// Conversation history, newest turn first. Prefers the persistent store
    /// when one is attached and a session id is given (other workers may have
    /// written turns this process never saw); falls back to the in-memory
    /// partition otherwise.
    pub async fn get_conversation_history(
        &self,
        session_id: Option<&str>,
        user_id: Option<&str>,
        limit: usize,
    ) -> Vec<ConversationTurn> {
        if let (Some(store), Some(session)) = (&self.store, session_id) {
            match store.find_memories(&MemoryQuery::conversation(session, limit)).await {
                Ok(entries) => return entries.iter().map(project_turn).collect(),
                Err(e) => {
                    tracing::warn!(error = %e, "conversation query failed, using in-memory history");
                }
            }
        }

        let inner = self.inner.read().await;
        let mut turns: Vec<ConversationTurn> = inner
            .episodic
            .values()
            .filter(|m| m.tags.iter().any(|t| t == "conversation"))
            .filter(|m| m.content.get("kind").and_then(Value::as_str) == Some("conversation_turn"))
            .filter(|m| {
                session_id.map_or(true, |s| {
                    m.content.get("session_id").and_then(Value::as_str) == Some(s)
                })
            })
            .filter(|m| {
                user_id.map_or(true, |u| {
                    m.content.get("user_id").and_then(Value::as_str) == Some(u)
                })
            })
            .map(|m| project_turn(m))
            .collect();
        turns.sort_by(|a, b| b.turn.cmp(&a.turn));
        turns.truncate(limit);
        turns
    }

    /// Recent conversations for a user inside a time window, newest first.
    pub async fn get_recent_conversations(
        &self,
        user_id: &str,
        hours_back: i64,
        limit: usize,
    ) -> Vec<ConversationTurn> {
        let cutoff = Utc::now() - Duration::hours(hours_back);

        if let Some(store) = &self.store {
            match store
                .find_memories(&MemoryQuery::recent_conversations(user_id, cutoff, limit))
                .await
            {
                Ok(entries) => return entries.iter().map(project_turn).collect(),
                Err(e) => {
                    tracing::warn!(error = %e, "recent-conversation query failed, using in-memory history");
                }
            }
        }

        let inner = self.inner.read().await;
        let mut turns: Vec<(DateTime<Utc>, ConversationTurn)> = inner
            .episodic
            .values()
            .filter(|m| m.tags.iter().any(|t| t == "conversation"))
            .filter(|m| m.timestamp >= cutoff)
            .filter(|m| m.content.get("kind").and_then(Value::as_str) == Some("conversation_turn"))
            .filter(|m| m.content.get("user_id").and_then(Value::as_str) == Some(user_id))
            .map(|m| (m.timestamp, project_turn(m)))
            .collect();
        turns.sort_by(|a, b| b.0.cmp(&a.0));
        turns.truncate(limit);
        turns.into_iter().map(|(_, t)| t).collect()
    }

    /// Discards working memories older than 24 h and promotes heavily used
    /// important ones (importance > 0.8, access_count > 5) to episodic.
    pub async fn consolidate_memories(&self) {
        let cutoff = Utc::now() - Duration::hours(24);
        let mut inner = self.inner.write().await;

        inner.working.retain(|_, m| m.timestamp >= cutoff);

        let promoted: Vec<String> = inner
            .working
            .values()
            .filter(|m| m.importance > 0.8 && m.access_count > 5)
            .map(|m| m.id.clone())
            .collect();
        for id in promoted {
            if let Some(mut entry) = inner.working.remove(&id) {
                entry.kind = MemoryKind::Episodic;
                inner.episodic.insert(id, entry);
            }
        }
    }

    async fn persist_memory(&self, entry: &MemoryEntry) {
        if let Some(store) = &self.store {
            if let Err(e) = store.upsert_memory(entry).await {
                tracing::warn!(id = %entry.id, error = %e, "memory persistence failed");
            }
        }
    }

    async fn persist_metrics(&self, metrics: &LearningMetrics) {
        if let Some(store) = &self.store {
            if let Err(e) = store.upsert_metrics(metrics).await {
                tracing::warn!(agent = %metrics.agent_id, error = %e, "metrics persistence failed");
            }
        }
    }

    async fn persist_preference(&self, preference: &UserPreference) {
        if let Some(store) = &self.store {
            if let Err(e) = store.upsert_preference(preference).await {
                tracing::warn!(user = %preference.user_id, error = %e, "preference persistence failed");
            }
        }
    }
}

impl Default for MemorySystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn partition_ref(&self, kind: MemoryKind, id: &str) -> Option<&MemoryEntry> {
        match kind {
            MemoryKind::Episodic => self.episodic.get(id),
            MemoryKind::Semantic => self.semantic.get(id),
            MemoryKind::Procedural => self.procedural.get(id),
            MemoryKind::Working => self.working.get(id),
        }
    }
}

fn project_turn(entry: &MemoryEntry) -> ConversationTurn {
    let c = &entry.content;
    ConversationTurn {
        turn: c
            .get("conversation_turn")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        user_request: c
            .get("user_request")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        agent_response: c.get("agent_response").cloned().unwrap_or(Value::Null),
        timestamp: c
            .get("timestamp")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        session_id: c
            .get("session_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}
