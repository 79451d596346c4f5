//! Shared memory-enhanced behavior for stage agents.
//!
//! Wraps task outcomes with learning: metric updates, an episodic record
//! (importance 0.7 on success, 0.9 on error), and preference extraction on
//! success.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::agents::AgentContext;
use crate::memory::{MemoryKind, MemorySystem};

/// Memory handle plus identity, embedded by every concrete agent.
pub struct AgentCore {
    agent_id: String,
    memory: Arc<MemorySystem>,
}

impl AgentCore {
    pub fn new(agent_id: impl Into<String>, memory: Arc<MemorySystem>) -> Self {
        Self {
            agent_id: agent_id.into(),
            memory,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn memory(&self) -> &Arc<MemorySystem> {
        &self.memory
    }

    /// Records one task outcome: metrics, an episodic memory, and (on
    /// success) learned preferences from the planning bucket.
    pub async fn observe(
        &self,
        task_type: &str,
        success: bool,
        started: Instant,
        ctx: &AgentContext,
        result: &Value,
    ) {
        let response_time = started.elapsed().as_secs_f64();

        self.memory
            .learn_from_interaction(
                &self.agent_id,
                task_type,
                success,
                response_time,
                json!({ "session_id": ctx.session_id, "user_id": ctx.user_id }),
            )
            .await;

        let importance = if success { 0.7 } else { 0.9 };
        self.memory
            .store(
                &self.agent_id,
                MemoryKind::Episodic,
                json!({
                    "task_type": task_type,
                    "success": success,
                    "result": result,
                    "session_id": ctx.session_id,
                }),
                importance,
                vec![
                    task_type.to_string(),
                    if success { "success" } else { "error" }.to_string(),
                ],
            )
            .await;

        if success {
            self.extract_preferences(ctx).await;
        }
    }

    /// Learns user preferences visible in the planning bucket.
    async fn extract_preferences(&self, ctx: &AgentContext) {
        if ctx.user_id.is_empty() || ctx.user_id == "anonymous" {
            return;
        }
        if let Some(prefs) = ctx.planning.get("preferences").and_then(Value::as_object) {
            for (pref_type, value) in prefs {
                self.memory
                    .learn_user_preference(
                        &ctx.user_id,
                        pref_type,
                        value.clone(),
                        0.6,
                        Some(&ctx.session_id),
                    )
                    .await;
            }
        }
        if let Some(caps) = ctx.planning.get("budget_caps").filter(|c| {
            c.as_object().map(|m| !m.is_empty()).unwrap_or(false)
        }) {
            self.memory
                .learn_user_preference(
                    &ctx.user_id,
                    "budget_caps",
                    caps.clone(),
                    0.6,
                    Some(&ctx.session_id),
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: observe updates the (agent, task) metric and stores an
    /// episodic record with error importance 0.9.
    #[tokio::test]
    async fn observe_records_metric_and_memory() {
        let memory = Arc::new(MemorySystem::new());
        let core = AgentCore::new("research_agent", memory.clone());
        let ctx = AgentContext::empty("s1", "u1", "plan");

        core.observe("research", false, Instant::now(), &ctx, &json!({})).await;

        let metrics = memory.get_learning_metrics(Some("research_agent")).await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].total_tasks, 1);
        assert_eq!(metrics[0].successful_tasks, 0);

        let episodic = memory
            .retrieve(Some("research_agent"), Some(MemoryKind::Episodic), None, 10)
            .await;
        assert!(episodic.iter().any(|m| (m.importance - 0.9).abs() < 1e-9));
    }

    /// **Scenario**: Successful observation learns preferences from the
    /// planning bucket.
    #[tokio::test]
    async fn observe_learns_preferences_on_success() {
        let memory = Arc::new(MemorySystem::new());
        let core = AgentCore::new("planning_agent", memory.clone());
        let mut ctx = AgentContext::empty("s1", "u1", "plan");
        ctx.planning = json!({ "preferences": { "pace": "relaxed" } });

        core.observe("planning", true, Instant::now(), &ctx, &json!({})).await;

        let prefs = memory.get_user_preferences("u1").await;
        assert_eq!(prefs["pace"]["value"], json!("relaxed"));
    }
}
