//! Learning agent: consumes telemetry and summarizes system performance.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::agents::{Agent, AgentContext, AgentCore, TaskReport};
use crate::error::AgentError;
use crate::memory::MemorySystem;
use crate::state::AgentMessage;

/// Agent responsible for analyzing performance and learning from
/// interactions. Metric updates arrive as `performance_data` telemetry
/// messages from every stage; `execute_task` turns the accumulated metrics
/// into insights for the envelope.
pub struct LearningAgent {
    core: AgentCore,
}

impl LearningAgent {
    pub fn new(memory: Arc<MemorySystem>) -> Self {
        Self {
            core: AgentCore::new("learning_agent", memory),
        }
    }

    pub async fn learning_insights(&self) -> Value {
        let metrics = self.core.memory().get_learning_metrics(None).await;
        if metrics.is_empty() {
            return json!({ "message": "No learning data available" });
        }
        let total: u64 = metrics.iter().map(|m| m.total_tasks).sum();
        let successful: u64 = metrics.iter().map(|m| m.successful_tasks).sum();
        json!({
            "total_tasks": total,
            "success_rate": if total > 0 { successful as f64 / total as f64 } else { 0.0 },
            "task_types": metrics.len(),
            "learning_status": if total > 0 { "active" } else { "initializing" },
        })
    }

    async fn system_analysis(&self) -> Value {
        let metrics = self.core.memory().get_learning_metrics(None).await;
        let mut per_agent: Map<String, Value> = Map::new();
        for m in metrics {
            per_agent.insert(
                format!("{}:{}", m.agent_id, m.task_type),
                json!({
                    "success_rate": m.success_rate,
                    "average_response_time": m.average_response_time,
                    "error_rate": m.error_rate,
                    "total_tasks": m.total_tasks,
                }),
            );
        }
        Value::Object(per_agent)
    }
}

#[async_trait]
impl Agent for LearningAgent {
    fn id(&self) -> &str {
        self.core.agent_id()
    }

    async fn execute_task(&self, _ctx: &mut AgentContext) -> Result<TaskReport, AgentError> {
        let insights = self.learning_insights().await;
        let analysis = self.system_analysis().await;
        Ok(TaskReport::success_with(json!({
            "learning_insights": insights,
            "system_analysis": analysis,
        })))
    }

    async fn receive_message(&self, msg: &AgentMessage) -> Option<AgentMessage> {
        if msg.message_type != "performance_data" {
            return None;
        }
        let c = &msg.content;
        let agent_id = c.get("agent_id").and_then(Value::as_str)?;
        let task_type = c.get("task_type").and_then(Value::as_str)?;
        let success = c.get("success").and_then(Value::as_bool).unwrap_or(false);
        let response_time = c.get("response_time").and_then(Value::as_f64).unwrap_or(0.0);
        let context = c.get("context").cloned().unwrap_or_else(|| json!({}));

        self.core
            .memory()
            .learn_from_interaction(agent_id, task_type, success, response_time, context)
            .await;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Telemetry messages update the sender's metrics; the
    /// insights summarize them.
    #[tokio::test]
    async fn telemetry_updates_metrics_and_insights() {
        let memory = Arc::new(MemorySystem::new());
        let agent = LearningAgent::new(memory.clone());

        for success in [true, true, false] {
            let msg = AgentMessage::new(
                "research_agent",
                "learning_agent",
                "performance_data",
                json!({
                    "agent_id": "research_agent",
                    "task_type": "research",
                    "success": success,
                    "response_time": 0.5,
                    "context": {"session_id": "s1"},
                }),
            );
            assert!(agent.receive_message(&msg).await.is_none());
        }

        let metrics = memory.get_learning_metrics(Some("research_agent")).await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].total_tasks, 3);
        assert!((metrics[0].success_rate - 2.0 / 3.0).abs() < 1e-9);

        let insights = agent.learning_insights().await;
        assert_eq!(insights["total_tasks"], json!(3));
        assert_eq!(insights["learning_status"], json!("active"));
    }

    /// **Scenario**: Non-telemetry messages are ignored.
    #[tokio::test]
    async fn other_messages_ignored() {
        let agent = LearningAgent::new(Arc::new(MemorySystem::new()));
        let msg = AgentMessage::new("a", "learning_agent", "notification", json!({}));
        assert!(agent.receive_message(&msg).await.is_none());
        let insights = agent.learning_insights().await;
        assert_eq!(insights["message"], json!("No learning data available"));
    }
}
