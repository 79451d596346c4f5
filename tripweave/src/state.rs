//! Canonical per-request state shared by all agent stages.
//!
//! One `TripState` value flows through the workflow graph: every stage reads
//! any bucket but writes only its own, plus the routing counters, statuses,
//! and the message queue. The state lives for exactly one request.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::memory::ConversationTurn;

/// Inter-agent message. Immutable once enqueued; delivery appends it to the
/// history log and hands it to the recipient's `receive_message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub message_type: String,
    pub content: Value,
    pub timestamp: DateTime<Utc>,
    /// 1 = low, 2 = medium, 3 = high, 4 = urgent.
    pub priority: u8,
    pub requires_response: bool,
    pub response_timeout: Option<DateTime<Utc>>,
}

impl AgentMessage {
    /// Creates a priority-1 message that does not require a response.
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        message_type: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            recipient: recipient.into(),
            message_type: message_type.into(),
            content,
            timestamp: Utc::now(),
            priority: 1,
            requires_response: false,
            response_timeout: None,
        }
    }

    pub fn requiring_response(mut self) -> Self {
        self.requires_response = true;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 4);
        self
    }
}

/// Lifecycle status of an agent within one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Working,
    Waiting,
    Completed,
    Error,
}

/// Status record kept per agent id in the state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusInfo {
    pub agent_id: String,
    pub status: AgentStatus,
    pub current_task: Option<String>,
    pub error_message: Option<String>,
    pub last_activity: DateTime<Utc>,
}

impl AgentStatusInfo {
    pub fn idle(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: AgentStatus::Idle,
            current_task: None,
            error_message: None,
            last_activity: Utc::now(),
        }
    }
}

/// Per-agent session slot: what the agent produced this request, plus its
/// learned preferences and the execution metrics the coordinator recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMemorySlot {
    pub agent_id: String,
    pub session_data: Value,
    pub learned_preferences: Value,
    pub performance_metrics: Value,
}

impl AgentMemorySlot {
    pub fn empty(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_data: Value::Object(Map::new()),
            learned_preferences: Value::Object(Map::new()),
            performance_metrics: Value::Object(Map::new()),
        }
    }
}

/// One entry in the append-only audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStep {
    pub step: String,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Canonical state for one request. Buckets are open-schema JSON objects;
/// each stage writes only its own bucket (plus counters/status/queue).
#[derive(Debug, Clone)]
pub struct TripState {
    pub session_id: String,
    pub user_id: String,
    pub user_request: String,
    /// Monotonic start for SLA/elapsed measurement.
    pub start: Instant,
    /// Wall-clock start for records and logging context.
    pub started_at: DateTime<Utc>,
    pub sla_seconds: Option<f64>,
    pub conversation_history: Vec<ConversationTurn>,
    pub is_follow_up: bool,

    // Data buckets.
    pub planning: Value,
    pub research: Value,
    pub budget: Value,
    pub trip: Value,
    pub geocost: Value,
    pub optimized: Value,
    pub gap: Value,
    pub fx: Value,
    pub final_response: Option<Value>,

    /// Ordered tool identifiers chosen by the planning stage.
    pub tool_plan: Vec<String>,

    pub agent_statuses: HashMap<String, AgentStatusInfo>,
    pub agent_memories: HashMap<String, AgentMemorySlot>,
    pub message_queue: VecDeque<AgentMessage>,
    pub message_history: Vec<AgentMessage>,

    // Routing counters.
    pub research_retries: u32,
    pub budget_retries: u32,
    pub gap_filling_attempts: u32,
    pub gap_filling_completed: bool,

    pub next_agent: Option<String>,
    pub current_agent: String,

    pub processing_steps: Vec<ProcessingStep>,
    pub learning_insights: Value,
    pub learning_analysis: Value,
}

impl TripState {
    /// Creates the initial state for one request with empty buckets and
    /// zeroed routing counters.
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        user_request: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            user_request: user_request.into(),
            start: Instant::now(),
            started_at: Utc::now(),
            sla_seconds: None,
            conversation_history: Vec::new(),
            is_follow_up: false,
            planning: empty_object(),
            research: empty_object(),
            budget: empty_object(),
            trip: empty_object(),
            geocost: empty_object(),
            optimized: empty_object(),
            gap: empty_object(),
            fx: empty_object(),
            final_response: None,
            tool_plan: Vec::new(),
            agent_statuses: HashMap::new(),
            agent_memories: HashMap::new(),
            message_queue: VecDeque::new(),
            message_history: Vec::new(),
            research_retries: 0,
            budget_retries: 0,
            gap_filling_attempts: 0,
            gap_filling_completed: false,
            next_agent: None,
            current_agent: "planning_agent".to_string(),
            processing_steps: Vec::new(),
            learning_insights: empty_object(),
            learning_analysis: empty_object(),
        }
    }

    pub fn with_sla(mut self, sla_seconds: Option<f64>) -> Self {
        self.sla_seconds = sla_seconds;
        self
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.is_follow_up = !history.is_empty();
        self.conversation_history = history;
        self
    }

    /// Seconds since the workflow started.
    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Sets an agent's status, replacing any previous record.
    pub fn set_status(&mut self, agent_id: &str, status: AgentStatus, task: Option<&str>) {
        self.agent_statuses.insert(
            agent_id.to_string(),
            AgentStatusInfo {
                agent_id: agent_id.to_string(),
                status,
                current_task: task.map(str::to_string),
                error_message: None,
                last_activity: Utc::now(),
            },
        );
    }

    /// Marks an agent as failed with a message for the error handler.
    pub fn set_error(&mut self, agent_id: &str, message: impl Into<String>) {
        self.agent_statuses.insert(
            agent_id.to_string(),
            AgentStatusInfo {
                agent_id: agent_id.to_string(),
                status: AgentStatus::Error,
                current_task: None,
                error_message: Some(message.into()),
                last_activity: Utc::now(),
            },
        );
    }

    pub fn agent_status(&self, agent_id: &str) -> Option<AgentStatus> {
        self.agent_statuses.get(agent_id).map(|s| s.status)
    }

    /// Appends an audit-log entry.
    pub fn record_step(&mut self, step: impl Into<String>, details: Value) {
        self.processing_steps.push(ProcessingStep {
            step: step.into(),
            timestamp: Utc::now(),
            details,
        });
    }

    /// True when the given bucket holds at least one key.
    pub fn bucket_non_empty(bucket: &Value) -> bool {
        bucket.as_object().map(|m| !m.is_empty()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: A fresh state has empty buckets, zeroed counters, and no
    /// follow-up flag.
    #[test]
    fn new_state_is_primed() {
        let state = TripState::new("s1", "u1", "Plan 5 days in Paris");
        assert_eq!(state.research_retries, 0);
        assert_eq!(state.budget_retries, 0);
        assert_eq!(state.gap_filling_attempts, 0);
        assert!(!state.gap_filling_completed);
        assert!(!state.is_follow_up);
        assert!(!TripState::bucket_non_empty(&state.research));
        assert!(state.message_queue.is_empty());
    }

    /// **Scenario**: with_history flips is_follow_up only for non-empty history.
    #[test]
    fn with_history_sets_follow_up() {
        let empty = TripState::new("s1", "u1", "x").with_history(vec![]);
        assert!(!empty.is_follow_up);

        let turn = ConversationTurn {
            turn: 1,
            user_request: "Paris trip".into(),
            agent_response: json!({}),
            timestamp: String::new(),
            session_id: "s1".into(),
        };
        let follow = TripState::new("s1", "u1", "x").with_history(vec![turn]);
        assert!(follow.is_follow_up);
        assert_eq!(follow.conversation_history.len(), 1);
    }

    /// **Scenario**: set_error records the message and flips status to Error.
    #[test]
    fn set_error_records_message() {
        let mut state = TripState::new("s1", "u1", "x");
        state.set_error("budget_agent", "costing failed");
        let info = state.agent_statuses.get("budget_agent").unwrap();
        assert_eq!(info.status, AgentStatus::Error);
        assert_eq!(info.error_message.as_deref(), Some("costing failed"));
    }

    /// **Scenario**: Message priority is clamped to the 1..=4 range.
    #[test]
    fn message_priority_clamped() {
        let msg = AgentMessage::new("a", "b", "notification", json!({})).with_priority(9);
        assert_eq!(msg.priority, 4);
    }
}
