//! Response agent: assembles the final structured response.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agents::{Agent, AgentContext, AgentCore, TaskReport};
use crate::bridge::ToolBridge;
use crate::error::AgentError;
use crate::memory::MemorySystem;

/// Agent responsible for generating the final user-facing response.
///
/// Prefers the `writer_report` tool when the plan asked for it and it is
/// registered; otherwise assembles a structured fallback from the buckets.
pub struct ResponseAgent {
    core: AgentCore,
    bridge: Arc<ToolBridge>,
}

impl ResponseAgent {
    pub fn new(memory: Arc<MemorySystem>, bridge: Arc<ToolBridge>) -> Self {
        Self {
            core: AgentCore::new("response_agent", memory),
            bridge,
        }
    }

    fn cities(ctx: &AgentContext) -> Value {
        ctx.planning
            .get("cities")
            .filter(|c| c.as_array().map(|a| !a.is_empty()).unwrap_or(false))
            .or_else(|| ctx.research.get("cities"))
            .cloned()
            .unwrap_or_else(|| json!([]))
    }

    fn pull(bucket: &Value, key: &str) -> Value {
        bucket.get(key).cloned().unwrap_or_else(|| json!({}))
    }

    /// Structured fallback response. Carries the interpreted trip facts at
    /// the top level so logging and preference learning can read them.
    fn fallback_response(ctx: &AgentContext) -> Value {
        let cities = Self::cities(ctx);
        let itinerary_days = ctx
            .trip
            .get("request")
            .and_then(|r| r.get("trip"))
            .and_then(|t| t.get("days"))
            .and_then(Value::as_array)
            .map(|d| d.len())
            .unwrap_or(0);

        let summary = match cities.as_array() {
            Some(list) if !list.is_empty() => {
                let names: Vec<&str> = list.iter().filter_map(Value::as_str).collect();
                format!("Trip plan for {}", names.join(", "))
            }
            _ => "Trip plan assembled from gathered data".to_string(),
        };

        json!({
            "status": "success",
            "summary": summary,
            "countries": ctx.planning.get("countries").cloned().unwrap_or_else(|| json!([])),
            "cities": cities,
            "dates": Self::pull(&ctx.planning, "dates"),
            "travelers": Self::pull(&ctx.planning, "travelers"),
            "preferences": Self::pull(&ctx.planning, "preferences"),
            "budget_caps": Self::pull(&ctx.planning, "budget_caps"),
            "itinerary_days": itinerary_days,
            "planning": ctx.planning,
            "research": ctx.research,
            "budget": ctx.budget,
        })
    }
}

#[async_trait]
impl Agent for ResponseAgent {
    fn id(&self) -> &str {
        self.core.agent_id()
    }

    async fn execute_task(&self, ctx: &mut AgentContext) -> Result<TaskReport, AgentError> {
        let started = Instant::now();

        let mut response = None;
        if ctx.tool_plan.iter().any(|t| t == "writer_report")
            && self.bridge.has_tool("writer_report")
        {
            let args = json!({
                "planning_data": ctx.planning,
                "research_data": ctx.research,
                "budget_data": ctx.budget,
                "trip_data": ctx.trip,
                "geocost_data": ctx.geocost,
                "optimized_data": ctx.optimized,
            });
            let res = self.bridge.execute_tool("writer_report", Some(args), None).await;
            if res.is_success() {
                // Graft the structured trip facts onto the written report so
                // downstream consumers see one shape.
                let mut report = res.result.unwrap_or_else(|| json!({}));
                if let (Some(obj), Some(fallback)) =
                    (report.as_object_mut(), Self::fallback_response(ctx).as_object())
                {
                    for key in ["countries", "cities", "dates", "travelers", "preferences", "budget_caps"] {
                        obj.entry(key.to_string())
                            .or_insert_with(|| fallback[key].clone());
                    }
                    obj.entry("status".to_string()).or_insert(json!("success"));
                }
                response = Some(report);
            } else if let Some(err) = res.error {
                tracing::debug!(error = %err, "writer_report failed, using fallback assembler");
            }
        }

        let response = response.unwrap_or_else(|| Self::fallback_response(ctx));
        ctx.final_response = Some(response.clone());

        self.core
            .observe("response_generation", true, started, ctx, &json!({"assembled": true}))
            .await;
        Ok(TaskReport::success())
    }
}
