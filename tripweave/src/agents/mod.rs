//! Agent contract and the six stage agents.
//!
//! Each agent performs one stage-bounded unit of work against an
//! [`AgentContext`] snapshot of the shared state; the coordinator syncs the
//! context back after the call. Agents never transition the graph
//! themselves; routing is the coordinator's job.

mod base;
mod budget;
mod gap;
mod learning;
mod planning;
mod research;
mod response;

pub use base::AgentCore;
pub use budget::BudgetAgent;
pub use gap::{identify_missing_data, GapAgent, MissingItem, MAX_GAP_ITEMS};
pub use learning::LearningAgent;
pub use planning::PlanningAgent;
pub use research::ResearchAgent;
pub use response::ResponseAgent;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::AgentError;
use crate::memory::ConversationTurn;
use crate::state::AgentMessage;

/// Snapshot of the shared state handed to one agent invocation. Bucket
/// mutations are synced back into the state by the coordinator; an agent
/// writes only its own bucket.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub session_id: String,
    pub user_id: String,
    pub user_request: String,
    pub conversation_history: Vec<ConversationTurn>,
    pub sla_seconds: Option<f64>,
    pub tool_plan: Vec<String>,

    pub planning: Value,
    pub research: Value,
    pub budget: Value,
    pub trip: Value,
    pub geocost: Value,
    pub optimized: Value,
    pub gap: Value,
    pub fx: Value,
    pub final_response: Option<Value>,

    /// Aggregated learned preferences across agents, for personalization.
    pub learned_preferences: Value,
}

impl AgentContext {
    pub fn empty(session_id: &str, user_id: &str, user_request: &str) -> Self {
        let obj = || Value::Object(Map::new());
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            user_request: user_request.to_string(),
            conversation_history: Vec::new(),
            sla_seconds: None,
            tool_plan: Vec::new(),
            planning: obj(),
            research: obj(),
            budget: obj(),
            trip: obj(),
            geocost: obj(),
            optimized: obj(),
            gap: obj(),
            fx: obj(),
            final_response: None,
            learned_preferences: obj(),
        }
    }
}

/// Outcome class of one `execute_task` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Success,
    /// Unrecoverable for this stage; the router goes to the error handler.
    Error,
    /// The stage wants another attempt; the router enforces the retry cap.
    Retry,
}

/// What an agent reports back to its stage node.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub status: TaskStatus,
    pub error: Option<String>,
    /// Free-form agent payload (filled item counts, insights, ...).
    pub detail: Value,
}

impl TaskReport {
    pub fn success() -> Self {
        Self {
            status: TaskStatus::Success,
            error: None,
            detail: Value::Object(Map::new()),
        }
    }

    pub fn success_with(detail: Value) -> Self {
        Self {
            status: TaskStatus::Success,
            error: None,
            detail,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Error,
            error: Some(message.into()),
            detail: Value::Object(Map::new()),
        }
    }

    pub fn retry(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Retry,
            error: Some(message.into()),
            detail: Value::Object(Map::new()),
        }
    }
}

/// Contract every stage agent implements.
///
/// `execute_task` is the one unit of work per graph entry. `receive_message`
/// handles pump deliveries inline; returning a message enqueues it as a
/// reply.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Agent id; maps 1:1 to a stage in the graph.
    fn id(&self) -> &str;

    async fn execute_task(&self, ctx: &mut AgentContext) -> Result<TaskReport, AgentError>;

    async fn receive_message(&self, _msg: &AgentMessage) -> Option<AgentMessage> {
        None
    }
}
