//! Research agent: runs the discovery portion of the tool plan and merges
//! results into the research bucket.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agents::{Agent, AgentContext, AgentCore, TaskReport};
use crate::bridge::ToolBridge;
use crate::error::AgentError;
use crate::memory::MemorySystem;
use crate::state::AgentMessage;

/// Discovery tools this agent may run, with the research-bucket key each
/// one's result lands under.
const DISCOVERY_TOOLS: &[(&str, &str)] = &[
    ("city_recommender", "cities"),
    ("poi_discovery", "poi"),
    ("restaurants_discovery", "restaurants"),
    ("city_fare", "city_fares"),
    ("intercity_fare", "intercity"),
    ("currency", "fx"),
];

/// Agent responsible for gathering data using external discovery tools.
pub struct ResearchAgent {
    core: AgentCore,
    bridge: Arc<ToolBridge>,
}

impl ResearchAgent {
    pub fn new(memory: Arc<MemorySystem>, bridge: Arc<ToolBridge>) -> Self {
        Self {
            core: AgentCore::new("research_agent", memory),
            bridge,
        }
    }

    /// Shared argument payload for discovery tools, drawn from planning data.
    fn discovery_args(ctx: &AgentContext) -> Value {
        json!({
            "cities": ctx.planning.get("cities").cloned().unwrap_or_else(|| json!([])),
            "countries": ctx.planning.get("countries").cloned().unwrap_or_else(|| json!([])),
            "city_country_map": ctx.planning.get("city_country_map").cloned().unwrap_or_else(|| json!({})),
            "dates": ctx.planning.get("dates").cloned().unwrap_or_else(|| json!({})),
            "travelers": ctx.planning.get("travelers").cloned().unwrap_or_else(|| json!({"adults": 1, "children": 0})),
            "preferences": ctx.planning.get("preferences").cloned().unwrap_or_else(|| json!({})),
            "musts": ctx.planning.get("musts").cloned().unwrap_or_else(|| json!([])),
            "target_currency": ctx.planning.get("target_currency").cloned().unwrap_or(Value::Null),
        })
    }

    /// Merges one tool result into the research bucket under its key.
    /// `city_recommender` contributes the flat city-name list; everything
    /// else lands as its whole payload.
    fn merge_result(research: &mut Value, bucket_key: &str, result: Value) {
        let Some(obj) = research.as_object_mut() else {
            return;
        };
        if bucket_key == "cities" {
            let cities = result
                .get("cities")
                .cloned()
                .unwrap_or_else(|| result.clone());
            obj.insert("cities".to_string(), cities);
        } else {
            obj.insert(bucket_key.to_string(), result);
        }
    }
}

#[async_trait]
impl Agent for ResearchAgent {
    fn id(&self) -> &str {
        self.core.agent_id()
    }

    async fn execute_task(&self, ctx: &mut AgentContext) -> Result<TaskReport, AgentError> {
        let started = Instant::now();
        let args = Self::discovery_args(ctx);

        // Fan the planned discovery tools out onto the bridge's worker pool.
        let planned: Vec<(&str, &str)> = DISCOVERY_TOOLS
            .iter()
            .filter(|(tool, _)| ctx.tool_plan.iter().any(|t| t == tool))
            .copied()
            .collect();
        let calls: Vec<(String, Option<Value>)> = planned
            .iter()
            .map(|(tool, _)| (tool.to_string(), Some(args.clone())))
            .collect();
        let responses = self.bridge.execute_many(calls).await;

        let executed = planned.len();
        let mut merged = 0usize;
        let mut errors: Vec<Value> = Vec::new();

        for ((tool, bucket_key), res) in planned.into_iter().zip(responses) {
            if res.is_success() {
                if let Some(result) = res.result {
                    Self::merge_result(&mut ctx.research, bucket_key, result);
                    merged += 1;
                }
            } else {
                let err = res.error.unwrap_or_else(|| "tool_error".to_string());
                tracing::debug!(tool, error = %err, "discovery tool failed");
                errors.push(json!({ "tool": tool, "error": err }));
            }
        }

        if !errors.is_empty() {
            if let Some(obj) = ctx.research.as_object_mut() {
                obj.insert("errors".to_string(), Value::Array(errors.clone()));
            }
        }

        // Mirror fx into its own bucket for downstream currency handling.
        if let Some(fx) = ctx.research.get("fx").cloned() {
            ctx.fx = fx;
        }

        let gathered_any = merged > 0;
        let detail = json!({
            "tools_executed": executed,
            "tools_merged": merged,
            "errors": errors.len(),
        });
        self.core
            .observe("research", gathered_any, started, ctx, &detail)
            .await;

        if executed > 0 && !gathered_any {
            return Ok(TaskReport::retry("no research data gathered"));
        }
        Ok(TaskReport::success_with(detail))
    }

    async fn receive_message(&self, msg: &AgentMessage) -> Option<AgentMessage> {
        // Acknowledge research requests so the requester can proceed; data
        // flows through the shared state, not the reply.
        if msg.message_type == "research_request" && msg.requires_response {
            return Some(AgentMessage::new(
                self.id(),
                msg.sender.clone(),
                "response",
                json!({ "ack": "research_request" }),
            ));
        }
        None
    }
}
