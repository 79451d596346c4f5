//! Stage node implementations.
//!
//! Each node wraps one agent invocation with the stage contract: set status,
//! pump pending messages, execute, sync the context back, record the session
//! slot, enqueue the follow-up message, set `next_agent`, and emit telemetry.
//! Nodes return `Next::Continue`; the routers decide the transition.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use crate::agents::TaskStatus;
use crate::coordinator::Coordinator;
use crate::error::AgentError;
use crate::graph::{Next, Node};
use crate::state::{AgentMemorySlot, AgentMessage, AgentStatus, AgentStatusInfo, TripState};

fn mark_waiting(state: &mut TripState, agent_id: &str, task: &str, error: Option<String>) {
    state.set_status(agent_id, AgentStatus::Waiting, Some(task));
    if let Some(info) = state.agent_statuses.get_mut(agent_id) {
        info.error_message = error;
    }
}

/// Entry node: primes statuses, memory slots, and counters, and seeds the
/// user request message for planning.
pub(super) struct CoordinatorNode {
    pub co: Arc<Coordinator>,
}

#[async_trait]
impl Node<TripState> for CoordinatorNode {
    fn id(&self) -> &str {
        "coordinator"
    }

    async fn run(&self, mut state: TripState) -> Result<(TripState, Next), AgentError> {
        for agent_id in self.co.agent_ids() {
            state
                .agent_statuses
                .insert(agent_id.clone(), AgentStatusInfo::idle(&agent_id));
            state
                .agent_memories
                .insert(agent_id.clone(), AgentMemorySlot::empty(&agent_id));
        }
        state.research_retries = 0;
        state.budget_retries = 0;
        state.record_step("coordination_start", json!({ "strategy": "sequential" }));

        let seed = AgentMessage::new(
            "user",
            "planning_agent",
            "user_request",
            json!({ "text": state.user_request }),
        );
        Coordinator::enqueue(&mut state, seed);
        Ok((state, Next::Continue))
    }
}

/// Planning stage: interpret the request and produce the tool plan.
pub(super) struct PlanningNode {
    pub co: Arc<Coordinator>,
}

#[async_trait]
impl Node<TripState> for PlanningNode {
    fn id(&self) -> &str {
        "planning_agent"
    }

    async fn run(&self, mut state: TripState) -> Result<(TripState, Next), AgentError> {
        let t0 = Instant::now();
        state.current_agent = "planning_agent".to_string();
        state.set_status("planning_agent", AgentStatus::Working, Some("interpret_user_request"));

        let agent = self
            .co
            .agent("planning_agent")
            .ok_or_else(|| AgentError::AgentNotRegistered("planning_agent".to_string()))?;

        let task = AgentMessage::new(
            "coordinator",
            "planning_agent",
            "task_request",
            json!({ "user_request": state.user_request }),
        );
        Coordinator::enqueue(&mut state, task);
        self.co.drain_queue(&mut state, 4).await;

        let mut ctx = self.co.context_from_state(&state);
        match agent.execute_task(&mut ctx).await {
            Ok(report) => {
                Coordinator::sync_context(&mut state, ctx);
                let elapsed = t0.elapsed().as_secs_f64();
                match report.status {
                    TaskStatus::Success => {
                        let planning = state.planning.clone();
                        Coordinator::record_slot(&mut state, "planning_agent", planning, elapsed, true);
                        state.set_status("planning_agent", AgentStatus::Completed, None);

                        let notify = AgentMessage::new(
                            "planning_agent",
                            "research_agent",
                            "research_request",
                            state.planning.clone(),
                        )
                        .requiring_response();
                        Coordinator::enqueue(&mut state, notify);
                        self.co.drain_queue(&mut state, 4).await;

                        state.next_agent = Some("research_agent".to_string());
                        self.co
                            .telemetry(&mut state, "planning_agent", "planning", true, elapsed)
                            .await;
                    }
                    TaskStatus::Error | TaskStatus::Retry => {
                        let msg = report.error.unwrap_or_else(|| "planning failed".to_string());
                        state.set_error("planning_agent", msg);
                        state.next_agent = Some("error_handler".to_string());
                        self.co
                            .telemetry(&mut state, "planning_agent", "planning", false, elapsed)
                            .await;
                    }
                }
            }
            Err(e) => {
                state.set_error("planning_agent", e.to_string());
                state.next_agent = Some("error_handler".to_string());
                let elapsed = t0.elapsed().as_secs_f64();
                self.co
                    .telemetry(&mut state, "planning_agent", "planning", false, elapsed)
                    .await;
            }
        }
        Ok((state, Next::Continue))
    }
}

/// Research stage: run discovery tools and merge their results.
pub(super) struct ResearchNode {
    pub co: Arc<Coordinator>,
}

#[async_trait]
impl Node<TripState> for ResearchNode {
    fn id(&self) -> &str {
        "research_agent"
    }

    async fn run(&self, mut state: TripState) -> Result<(TripState, Next), AgentError> {
        let t0 = Instant::now();
        state.current_agent = "research_agent".to_string();
        state.set_status("research_agent", AgentStatus::Working, Some("gather_research_data"));

        let agent = self
            .co
            .agent("research_agent")
            .ok_or_else(|| AgentError::AgentNotRegistered("research_agent".to_string()))?;

        // Deliver any pending research_request first.
        self.co.drain_queue(&mut state, 8).await;

        let mut ctx = self.co.context_from_state(&state);
        match agent.execute_task(&mut ctx).await {
            Ok(report) => {
                Coordinator::sync_context(&mut state, ctx);
                let elapsed = t0.elapsed().as_secs_f64();
                match report.status {
                    TaskStatus::Success => {
                        let research = state.research.clone();
                        Coordinator::record_slot(&mut state, "research_agent", research, elapsed, true);
                        state.set_status("research_agent", AgentStatus::Completed, None);

                        let notify = AgentMessage::new(
                            "research_agent",
                            "budget_agent",
                            "budget_request",
                            state.research.clone(),
                        )
                        .requiring_response();
                        Coordinator::enqueue(&mut state, notify);
                        self.co.drain_queue(&mut state, 8).await;

                        state.next_agent = Some("budget_agent".to_string());
                        self.co
                            .telemetry(&mut state, "research_agent", "research", true, elapsed)
                            .await;
                    }
                    TaskStatus::Retry => {
                        mark_waiting(&mut state, "research_agent", "retry_research", report.error);
                        state.next_agent = Some("research_agent".to_string());
                        self.co
                            .telemetry(&mut state, "research_agent", "research", false, elapsed)
                            .await;
                    }
                    TaskStatus::Error => {
                        let msg = report.error.unwrap_or_else(|| "research failed".to_string());
                        state.set_error("research_agent", msg);
                        state.next_agent = Some("error_handler".to_string());
                        self.co
                            .telemetry(&mut state, "research_agent", "research", false, elapsed)
                            .await;
                    }
                }
            }
            Err(e) => {
                state.set_error("research_agent", e.to_string());
                state.next_agent = Some("error_handler".to_string());
                let elapsed = t0.elapsed().as_secs_f64();
                self.co
                    .telemetry(&mut state, "research_agent", "research", false, elapsed)
                    .await;
            }
        }
        Ok((state, Next::Continue))
    }
}

/// Budget stage: costing, assembly, optimization, trip construction.
pub(super) struct BudgetNode {
    pub co: Arc<Coordinator>,
}

#[async_trait]
impl Node<TripState> for BudgetNode {
    fn id(&self) -> &str {
        "budget_agent"
    }

    async fn run(&self, mut state: TripState) -> Result<(TripState, Next), AgentError> {
        let t0 = Instant::now();
        state.current_agent = "budget_agent".to_string();
        state.set_status("budget_agent", AgentStatus::Working, Some("optimize_budget"));

        let agent = self
            .co
            .agent("budget_agent")
            .ok_or_else(|| AgentError::AgentNotRegistered("budget_agent".to_string()))?;

        // Deliver any pending budget_request first.
        self.co.drain_queue(&mut state, 8).await;

        let mut ctx = self.co.context_from_state(&state);
        match agent.execute_task(&mut ctx).await {
            Ok(report) => {
                Coordinator::sync_context(&mut state, ctx);
                let elapsed = t0.elapsed().as_secs_f64();
                match report.status {
                    TaskStatus::Success => {
                        let budget = state.budget.clone();
                        Coordinator::record_slot(&mut state, "budget_agent", budget, elapsed, true);
                        state.set_status("budget_agent", AgentStatus::Completed, None);

                        let notify = AgentMessage::new(
                            "budget_agent",
                            "response_agent",
                            "response_request",
                            state.budget.clone(),
                        );
                        Coordinator::enqueue(&mut state, notify);
                        self.co.drain_queue(&mut state, 4).await;

                        state.next_agent = Some("response_agent".to_string());
                        self.co
                            .telemetry(&mut state, "budget_agent", "budget", true, elapsed)
                            .await;
                    }
                    TaskStatus::Retry => {
                        mark_waiting(&mut state, "budget_agent", "retry_budget", report.error);
                        state.next_agent = Some("budget_agent".to_string());
                        self.co
                            .telemetry(&mut state, "budget_agent", "budget", false, elapsed)
                            .await;
                    }
                    TaskStatus::Error => {
                        let msg = report.error.unwrap_or_else(|| "budget failed".to_string());
                        state.set_error("budget_agent", msg);
                        state.next_agent = Some("error_handler".to_string());
                        self.co
                            .telemetry(&mut state, "budget_agent", "budget", false, elapsed)
                            .await;
                    }
                }
            }
            Err(e) => {
                state.set_error("budget_agent", e.to_string());
                state.next_agent = Some("error_handler".to_string());
                let elapsed = t0.elapsed().as_secs_f64();
                self.co
                    .telemetry(&mut state, "budget_agent", "budget", false, elapsed)
                    .await;
            }
        }
        Ok((state, Next::Continue))
    }
}

/// Gap stage: one pass of detection and patching, then back to budget.
pub(super) struct GapNode {
    pub co: Arc<Coordinator>,
}

#[async_trait]
impl Node<TripState> for GapNode {
    fn id(&self) -> &str {
        "gap_agent"
    }

    async fn run(&self, mut state: TripState) -> Result<(TripState, Next), AgentError> {
        let t0 = Instant::now();
        state.current_agent = "gap_agent".to_string();

        let Some(agent) = self.co.agent("gap_agent") else {
            state.next_agent = Some("budget_agent".to_string());
            return Ok((state, Next::Continue));
        };
        if state.gap_filling_completed {
            state.next_agent = Some("budget_agent".to_string());
            return Ok((state, Next::Continue));
        }

        state.set_status("gap_agent", AgentStatus::Working, Some("fill_missing_data"));
        let mut ctx = self.co.context_from_state(&state);
        match agent.execute_task(&mut ctx).await {
            Ok(report) => {
                Coordinator::sync_context(&mut state, ctx);
                // One pass per request, whatever the tool did.
                state.gap_filling_completed = true;
                state.set_status("gap_agent", AgentStatus::Completed, None);
                state.next_agent = Some("budget_agent".to_string());
                let elapsed = t0.elapsed().as_secs_f64();
                let success = report.status == TaskStatus::Success;
                self.co
                    .telemetry(&mut state, "gap_agent", "gap_filling", success, elapsed)
                    .await;
                Ok((state, Next::Continue))
            }
            Err(e) => {
                state.set_error("gap_agent", e.to_string());
                state.next_agent = Some("error_handler".to_string());
                Ok((state, Next::Node("error_handler".to_string())))
            }
        }
    }
}

/// Response stage: assemble the final response. Failures here still flow to
/// learning; the facade falls back to a default message.
pub(super) struct ResponseNode {
    pub co: Arc<Coordinator>,
}

#[async_trait]
impl Node<TripState> for ResponseNode {
    fn id(&self) -> &str {
        "response_agent"
    }

    async fn run(&self, mut state: TripState) -> Result<(TripState, Next), AgentError> {
        let t0 = Instant::now();
        state.current_agent = "response_agent".to_string();
        state.set_status("response_agent", AgentStatus::Working, Some("generate_final_response"));

        let Some(agent) = self.co.agent("response_agent") else {
            state.set_error("response_agent", "response_agent not registered");
            return Ok((state, Next::Continue));
        };

        let mut ctx = self.co.context_from_state(&state);
        match agent.execute_task(&mut ctx).await {
            Ok(_) => {
                Coordinator::sync_context(&mut state, ctx);
                state.set_status("response_agent", AgentStatus::Completed, None);
                let elapsed = t0.elapsed().as_secs_f64();
                self.co
                    .telemetry(&mut state, "response_agent", "response_generation", true, elapsed)
                    .await;
            }
            Err(e) => {
                state.set_error("response_agent", e.to_string());
                let elapsed = t0.elapsed().as_secs_f64();
                self.co
                    .telemetry(&mut state, "response_agent", "response_generation", false, elapsed)
                    .await;
            }
        }
        Ok((state, Next::Continue))
    }
}

/// Learning stage: drain remaining telemetry, then summarize metrics into
/// the state for the envelope.
pub(super) struct LearningNode {
    pub co: Arc<Coordinator>,
}

#[async_trait]
impl Node<TripState> for LearningNode {
    fn id(&self) -> &str {
        "learning_agent"
    }

    async fn run(&self, mut state: TripState) -> Result<(TripState, Next), AgentError> {
        let Some(agent) = self.co.agent("learning_agent") else {
            return Ok((state, Next::Continue));
        };

        state.current_agent = "learning_agent".to_string();
        self.co.drain_queue(&mut state, 8).await;

        let mut ctx = self.co.context_from_state(&state);
        match agent.execute_task(&mut ctx).await {
            Ok(report) if report.status == TaskStatus::Success => {
                state.learning_insights = report
                    .detail
                    .get("learning_insights")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                state.learning_analysis = report
                    .detail
                    .get("system_analysis")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                state.set_status("learning_agent", AgentStatus::Completed, None);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "learning agent failed; insights skipped");
            }
        }
        Ok((state, Next::Continue))
    }
}

/// Terminal error stage: compose a structured error response naming the
/// failed agents.
pub(super) struct ErrorHandlerNode;

#[async_trait]
impl Node<TripState> for ErrorHandlerNode {
    fn id(&self) -> &str {
        "error_handler"
    }

    async fn run(&self, mut state: TripState) -> Result<(TripState, Next), AgentError> {
        let mut failed: Vec<(String, String)> = state
            .agent_statuses
            .values()
            .filter(|s| s.status == AgentStatus::Error)
            .map(|s| {
                (
                    s.agent_id.clone(),
                    s.error_message.clone().unwrap_or_default(),
                )
            })
            .collect();
        failed.sort();

        if !failed.is_empty() {
            let (agents, messages): (Vec<String>, Vec<String>) = failed.into_iter().unzip();
            state.final_response = Some(json!({
                "status": "error",
                "message": "Error processing request",
                "details": {
                    "failed_agents": agents,
                    "error_messages": messages,
                    "session_id": state.session_id,
                },
            }));
        }
        Ok((state, Next::Continue))
    }
}
