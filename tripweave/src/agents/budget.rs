//! Budget agent: cost aggregation, geographic assembly, optimization, and
//! trip construction.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agents::{Agent, AgentContext, AgentCore, TaskReport};
use crate::bridge::ToolBridge;
use crate::error::AgentError;
use crate::memory::MemorySystem;
use crate::state::AgentMessage;

/// Agent responsible for optimizing costs and creating detailed itineraries.
///
/// Runs the post-processing chain `discoveries_costs` -> `city_graph` ->
/// `optimizer` -> `trip_maker`. The first stage is critical: its failure
/// requests a stage retry. Later stages degrade gracefully; whatever they
/// produce lands in their buckets.
pub struct BudgetAgent {
    core: AgentCore,
    bridge: Arc<ToolBridge>,
}

impl BudgetAgent {
    pub fn new(memory: Arc<MemorySystem>, bridge: Arc<ToolBridge>) -> Self {
        Self {
            core: AgentCore::new("budget_agent", memory),
            bridge,
        }
    }

    fn chain_args(ctx: &AgentContext, budget: &Value, geocost: &Value, optimized: &Value) -> Value {
        json!({
            "planning_data": ctx.planning,
            "research_data": ctx.research,
            "budget_data": budget,
            "geocost": geocost,
            "optimized_data": optimized,
            "fx_data": ctx.fx,
        })
    }
}

#[async_trait]
impl Agent for BudgetAgent {
    fn id(&self) -> &str {
        self.core.agent_id()
    }

    async fn execute_task(&self, ctx: &mut AgentContext) -> Result<TaskReport, AgentError> {
        let started = Instant::now();
        let mut errors: Vec<Value> = Vec::new();

        // Critical first stage: aggregate discovery into costs.
        let cost_res = self
            .bridge
            .execute_tool(
                "discoveries_costs",
                Some(Self::chain_args(ctx, &json!({}), &json!({}), &json!({}))),
                None,
            )
            .await;
        if !cost_res.is_success() {
            let err = cost_res
                .error
                .unwrap_or_else(|| "discoveries_costs failed".to_string());
            self.core
                .observe("budget", false, started, ctx, &json!({"error": err}))
                .await;
            return Ok(TaskReport::retry(format!("discoveries_costs: {err}")));
        }
        if let Some(result) = cost_res.result {
            ctx.budget = result;
        }

        // Geographic day-graph assembly.
        let graph_res = self
            .bridge
            .execute_tool(
                "city_graph",
                Some(Self::chain_args(ctx, &ctx.budget.clone(), &json!({}), &json!({}))),
                None,
            )
            .await;
        if graph_res.is_success() {
            if let Some(result) = graph_res.result {
                // The assembler nests its payload under request.geocost.
                ctx.geocost = result
                    .get("request")
                    .and_then(|r| r.get("geocost"))
                    .cloned()
                    .unwrap_or(result);
            }
        } else if let Some(err) = graph_res.error {
            errors.push(json!({"tool": "city_graph", "error": err}));
        }

        // Itinerary optimization.
        let opt_res = self
            .bridge
            .execute_tool(
                "optimizer",
                Some(Self::chain_args(ctx, &ctx.budget.clone(), &ctx.geocost.clone(), &json!({}))),
                None,
            )
            .await;
        if opt_res.is_success() {
            if let Some(result) = opt_res.result {
                ctx.optimized = result;
            }
        } else if let Some(err) = opt_res.error {
            errors.push(json!({"tool": "optimizer", "error": err}));
        }

        // Day-by-day trip construction.
        let trip_res = self
            .bridge
            .execute_tool(
                "trip_maker",
                Some(Self::chain_args(
                    ctx,
                    &ctx.budget.clone(),
                    &ctx.geocost.clone(),
                    &ctx.optimized.clone(),
                )),
                None,
            )
            .await;
        if trip_res.is_success() {
            if let Some(result) = trip_res.result {
                ctx.trip = result;
            }
        } else if let Some(err) = trip_res.error {
            errors.push(json!({"tool": "trip_maker", "error": err}));
        }

        if !errors.is_empty() {
            if let Some(obj) = ctx.budget.as_object_mut() {
                obj.insert("errors".to_string(), Value::Array(errors.clone()));
            }
        }

        let detail = json!({
            "trip_created": ctx.trip.as_object().map(|m| !m.is_empty()).unwrap_or(false),
            "optimization_success": ctx.optimized.as_object().map(|m| !m.is_empty()).unwrap_or(false),
            "errors": errors.len(),
        });
        self.core.observe("budget", true, started, ctx, &detail).await;
        Ok(TaskReport::success_with(detail))
    }

    async fn receive_message(&self, msg: &AgentMessage) -> Option<AgentMessage> {
        if msg.message_type == "budget_request" && msg.requires_response {
            return Some(AgentMessage::new(
                self.id(),
                msg.sender.clone(),
                "response",
                json!({ "ack": "budget_request" }),
            ));
        }
        None
    }
}
