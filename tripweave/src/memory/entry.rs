//! Memory record types: entries, learning metrics, user preferences, and the
//! conversation-turn projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which partition a memory entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Events and experiences (interactions, cache entries, conversation turns).
    Episodic,
    /// Facts and learned knowledge (user preferences).
    Semantic,
    /// How-to knowledge and procedures.
    Procedural,
    /// Temporary active memory; consolidated away after 24 h.
    Working,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
            MemoryKind::Procedural => "procedural",
            MemoryKind::Working => "working",
        }
    }
}

/// One stored memory with metadata and access tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub kind: MemoryKind,
    pub content: Value,
    /// 0.0 to 1.0.
    pub importance: f64,
    pub access_count: u32,
    pub last_accessed: DateTime<Utc>,
    pub tags: Vec<String>,
    pub associations: Vec<String>,
}

/// Learning metrics keyed by `(agent_id, task_type)`, updated with running
/// averages on each completed stage invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningMetrics {
    pub agent_id: String,
    pub task_type: String,
    pub success_rate: f64,
    pub average_response_time: f64,
    pub error_rate: f64,
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub last_updated: DateTime<Utc>,
}

impl LearningMetrics {
    pub fn new(agent_id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_type: task_type.into(),
            success_rate: 0.0,
            average_response_time: 0.0,
            error_rate: 0.0,
            total_tasks: 0,
            successful_tasks: 0,
            last_updated: Utc::now(),
        }
    }

    /// Folds one task outcome into the running averages.
    pub fn record(&mut self, success: bool, response_time: f64) {
        self.total_tasks += 1;
        if success {
            self.successful_tasks += 1;
        }
        let n = self.total_tasks as f64;
        self.success_rate = self.successful_tasks as f64 / n;
        self.average_response_time = (self.average_response_time * (n - 1.0) + response_time) / n;
        self.error_rate = 1.0 - self.success_rate;
        self.last_updated = Utc::now();
    }
}

/// Learned user preference with confidence tracking. Matching values are
/// reinforced (+0.1 capped at 1.0); differing values replace the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreference {
    pub user_id: String,
    pub preference_type: String,
    pub value: Value,
    pub confidence: f64,
    pub learned_from_sessions: Vec<String>,
    pub last_reinforced: DateTime<Utc>,
}

/// Projection of a stored conversation turn, as returned by history queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn: u32,
    pub user_request: String,
    pub agent_response: Value,
    pub timestamp: String,
    pub session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: After N records with k successes, success_rate = k/N and
    /// error_rate = 1 - k/N within floating-point tolerance.
    #[test]
    fn metrics_running_rates() {
        let mut m = LearningMetrics::new("research_agent", "research");
        m.record(true, 1.0);
        m.record(false, 3.0);
        m.record(true, 2.0);
        assert_eq!(m.total_tasks, 3);
        assert_eq!(m.successful_tasks, 2);
        assert!((m.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((m.average_response_time - 2.0).abs() < 1e-9);
    }

    /// **Scenario**: MemoryKind serializes to the lowercase wire names.
    #[test]
    fn memory_kind_wire_names() {
        assert_eq!(serde_json::to_string(&MemoryKind::Episodic).unwrap(), "\"episodic\"");
        assert_eq!(MemoryKind::Working.as_str(), "working");
    }
}
