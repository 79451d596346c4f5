//! Coordinator: stage wiring, message pump, routers, and graph assembly.
//!
//! The coordinator owns the agent registry and builds the fixed trip graph:
//!
//! ```text
//! coordinator → planning_agent
//! planning_agent → {research_agent | error_handler}
//! research_agent → {budget_agent | gap_agent | research_agent | response_agent | error_handler}
//! gap_agent → budget_agent
//! budget_agent → {response_agent | gap_agent | budget_agent | error_handler}
//! response_agent → learning_agent → END
//! error_handler → END
//! ```
//!
//! Stages never transition themselves; the router predicates decide, with
//! bounded retries and the post-research SLA shortcut.

mod nodes;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::agents::{identify_missing_data, Agent, AgentContext};
use crate::graph::{CompilationError, CompiledStateGraph, StateGraph, END, START};
use crate::memory::MemorySystem;
use crate::state::{AgentMemorySlot, AgentMessage, AgentStatus, TripState};

use nodes::{
    BudgetNode, CoordinatorNode, ErrorHandlerNode, GapNode, LearningNode, PlanningNode,
    ResearchNode, ResponseNode,
};

pub const MAX_RESEARCH_RETRIES: u32 = 2;
pub const MAX_BUDGET_RETRIES: u32 = 2;

/// Agent/stage registry plus the shared memory handle.
pub struct Coordinator {
    agents: HashMap<String, Arc<dyn Agent>>,
    memory: Arc<MemorySystem>,
}

impl Coordinator {
    pub fn new(memory: Arc<MemorySystem>) -> Self {
        Self {
            agents: HashMap::new(),
            memory,
        }
    }

    /// Registers an agent under its own id.
    pub fn register_agent(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.id().to_string(), agent);
    }

    pub fn agent(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(agent_id).cloned()
    }

    pub fn has_agent(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn memory(&self) -> &Arc<MemorySystem> {
        &self.memory
    }

    // ---------- Message pump ----------

    /// Appends a message to the queue and the history log.
    pub fn enqueue(state: &mut TripState, msg: AgentMessage) {
        state.message_history.push(msg.clone());
        state.message_queue.push_back(msg);
    }

    /// Delivers one message to its recipient; a reply goes back onto the
    /// queue and into the history. Unknown recipients are a no-op.
    pub async fn deliver(&self, state: &mut TripState, msg: AgentMessage) {
        let Some(agent) = self.agents.get(&msg.recipient).cloned() else {
            return;
        };
        if let Some(reply) = agent.receive_message(&msg).await {
            state.message_history.push(reply.clone());
            state.message_queue.push_back(reply);
        }
    }

    /// Pops and delivers up to `max_steps` messages. The bound is the
    /// pipeline's backpressure: no stage can spin the pump indefinitely.
    pub async fn drain_queue(&self, state: &mut TripState, max_steps: usize) {
        let mut steps = 0;
        while steps < max_steps {
            let Some(msg) = state.message_queue.pop_front() else {
                break;
            };
            self.deliver(state, msg).await;
            steps += 1;
        }
    }

    // ---------- Context bridging ----------

    /// Builds an agent context snapshot from the state.
    pub fn context_from_state(&self, state: &TripState) -> AgentContext {
        let mut prefs = Map::new();
        for slot in state.agent_memories.values() {
            if let Some(learned) = slot.learned_preferences.as_object() {
                for (k, v) in learned {
                    prefs.insert(k.clone(), v.clone());
                }
            }
        }

        AgentContext {
            session_id: state.session_id.clone(),
            user_id: state.user_id.clone(),
            user_request: state.user_request.clone(),
            conversation_history: state.conversation_history.clone(),
            sla_seconds: state.sla_seconds,
            tool_plan: state.tool_plan.clone(),
            planning: state.planning.clone(),
            research: state.research.clone(),
            budget: state.budget.clone(),
            trip: state.trip.clone(),
            geocost: state.geocost.clone(),
            optimized: state.optimized.clone(),
            gap: state.gap.clone(),
            fx: state.fx.clone(),
            final_response: state.final_response.clone(),
            learned_preferences: Value::Object(prefs),
        }
    }

    /// Writes the context's buckets back into the state after a stage ran.
    pub fn sync_context(state: &mut TripState, ctx: AgentContext) {
        state.planning = ctx.planning;
        state.research = ctx.research;
        state.budget = ctx.budget;
        state.trip = ctx.trip;
        state.geocost = ctx.geocost;
        state.optimized = ctx.optimized;
        state.gap = ctx.gap;
        state.fx = ctx.fx;
        state.tool_plan = ctx.tool_plan;
        if ctx.final_response.is_some() {
            state.final_response = ctx.final_response;
        }
    }

    /// Records the per-agent session slot after a stage completes.
    pub(crate) fn record_slot(
        state: &mut TripState,
        agent_id: &str,
        session_data: Value,
        execution_time: f64,
        success: bool,
    ) {
        let data_quality = session_data.as_object().map(Map::len).unwrap_or(0);
        state.agent_memories.insert(
            agent_id.to_string(),
            AgentMemorySlot {
                agent_id: agent_id.to_string(),
                session_data,
                learned_preferences: Value::Object(Map::new()),
                performance_metrics: json!({
                    "execution_time": execution_time,
                    "success": success,
                    "data_quality": data_quality,
                }),
            },
        );
    }

    /// Emits one telemetry message for the learning agent and pumps briefly
    /// so metrics stay current.
    pub(crate) async fn telemetry(
        &self,
        state: &mut TripState,
        agent_id: &str,
        task_type: &str,
        success: bool,
        response_time: f64,
    ) {
        if !self.has_agent("learning_agent") {
            return;
        }
        let msg = AgentMessage::new(
            agent_id,
            "learning_agent",
            "performance_data",
            json!({
                "agent_id": agent_id,
                "task_type": task_type,
                "success": success,
                "response_time": response_time,
                "context": { "session_id": state.session_id },
            }),
        );
        Self::enqueue(state, msg);
        self.drain_queue(state, 2).await;
    }

    // ---------- Gap check ----------

    /// True when the single gap pass should run. Increments
    /// `gap_filling_attempts` when it finds missing data, so the pass can
    /// never re-trigger.
    pub fn needs_gap(&self, state: &mut TripState) -> bool {
        if state.gap_filling_completed {
            return false;
        }
        if !TripState::bucket_non_empty(&state.research) {
            return false;
        }
        if state.gap_filling_attempts >= 1 {
            return false;
        }
        if !self.has_agent("gap_agent") {
            return false;
        }
        let missing = identify_missing_data(&state.research);
        if missing.is_empty() {
            false
        } else {
            state.gap_filling_attempts += 1;
            true
        }
    }

    // ---------- Routers ----------

    pub fn route_after_planning(state: &mut TripState) -> String {
        if state.agent_status("planning_agent") == Some(AgentStatus::Error) {
            return "error_handler".to_string();
        }
        // Always research first; gap checks before research would flag
        // everything as missing.
        "research_agent".to_string()
    }

    pub fn route_after_research(&self, state: &mut TripState) -> String {
        if state.agent_status("research_agent") == Some(AgentStatus::Error) {
            return "error_handler".to_string();
        }

        if self.needs_gap(state) {
            return "gap_agent".to_string();
        }

        // SLA shortcut: basics ready and the deadline nearly exhausted.
        if let Some(sla) = state.sla_seconds {
            if sla > 0.0 && state.elapsed_seconds() > 5.0_f64.max(sla * 0.9) {
                let rs = &state.research;
                let has_cities = rs
                    .get("cities")
                    .and_then(Value::as_array)
                    .map(|a| !a.is_empty())
                    .unwrap_or(false);
                let has_basics = rs.get("poi").is_some()
                    || rs.get("city_fares").is_some()
                    || rs.get("restaurants").is_some();
                if has_cities && has_basics {
                    tracing::debug!(sla, elapsed = state.elapsed_seconds(), "SLA shortcut to response");
                    state.next_agent = Some("response_agent".to_string());
                    return "response_agent".to_string();
                }
            }
        }

        match state.next_agent.as_deref() {
            Some("research_agent") => {
                state.research_retries += 1;
                if state.research_retries <= MAX_RESEARCH_RETRIES {
                    "research_agent".to_string()
                } else {
                    let last = state
                        .agent_statuses
                        .get("research_agent")
                        .and_then(|s| s.error_message.clone())
                        .unwrap_or_else(|| "no research data gathered".to_string());
                    state.set_error("research_agent", format!("research retries exhausted: {last}"));
                    "error_handler".to_string()
                }
            }
            Some("budget_agent") => "budget_agent".to_string(),
            Some("response_agent") => "response_agent".to_string(),
            _ => "budget_agent".to_string(),
        }
    }

    pub fn route_after_budget(&self, state: &mut TripState) -> String {
        if state.agent_status("budget_agent") == Some(AgentStatus::Error) {
            return "error_handler".to_string();
        }

        // A produced plan closes the request; no new gap cycle.
        if TripState::bucket_non_empty(&state.trip) || TripState::bucket_non_empty(&state.optimized)
        {
            return "response_agent".to_string();
        }

        if self.needs_gap(state) {
            return "gap_agent".to_string();
        }

        match state.next_agent.as_deref() {
            Some("budget_agent") => {
                state.budget_retries += 1;
                if state.budget_retries <= MAX_BUDGET_RETRIES {
                    "budget_agent".to_string()
                } else {
                    let last = state
                        .agent_statuses
                        .get("budget_agent")
                        .and_then(|s| s.error_message.clone())
                        .unwrap_or_else(|| "budget processing failed".to_string());
                    state.set_error("budget_agent", format!("budget retries exhausted: {last}"));
                    "error_handler".to_string()
                }
            }
            _ => "response_agent".to_string(),
        }
    }

    // ---------- Graph assembly ----------

    /// Builds and compiles the trip workflow graph.
    pub fn build_graph(self: &Arc<Self>) -> Result<CompiledStateGraph<TripState>, CompilationError> {
        let mut g = StateGraph::<TripState>::new();

        g.add_node("coordinator", Arc::new(CoordinatorNode { co: self.clone() }));
        g.add_node("planning_agent", Arc::new(PlanningNode { co: self.clone() }));
        g.add_node("research_agent", Arc::new(ResearchNode { co: self.clone() }));
        g.add_node("budget_agent", Arc::new(BudgetNode { co: self.clone() }));
        g.add_node("gap_agent", Arc::new(GapNode { co: self.clone() }));
        g.add_node("response_agent", Arc::new(ResponseNode { co: self.clone() }));
        g.add_node("learning_agent", Arc::new(LearningNode { co: self.clone() }));
        g.add_node("error_handler", Arc::new(ErrorHandlerNode));

        g.add_edge(START, "coordinator");
        g.add_edge("coordinator", "planning_agent");

        let identity = |targets: &[&str]| -> HashMap<String, String> {
            targets
                .iter()
                .map(|t| (t.to_string(), t.to_string()))
                .collect()
        };

        g.add_conditional_edges(
            "planning_agent",
            Arc::new(|state: &mut TripState| Coordinator::route_after_planning(state)),
            Some(identity(&["research_agent", "error_handler"])),
        );

        let co = self.clone();
        g.add_conditional_edges(
            "research_agent",
            Arc::new(move |state: &mut TripState| co.route_after_research(state)),
            Some(identity(&[
                "budget_agent",
                "gap_agent",
                "research_agent",
                "response_agent",
                "error_handler",
            ])),
        );

        let co = self.clone();
        g.add_conditional_edges(
            "budget_agent",
            Arc::new(move |state: &mut TripState| co.route_after_budget(state)),
            Some(identity(&[
                "budget_agent",
                "gap_agent",
                "response_agent",
                "error_handler",
            ])),
        );

        g.add_edge("gap_agent", "budget_agent");
        g.add_edge("response_agent", "learning_agent");
        g.add_edge("learning_agent", END);
        g.add_edge("error_handler", END);

        g.compile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coordinator() -> Coordinator {
        Coordinator::new(Arc::new(MemorySystem::new()))
    }

    fn state() -> TripState {
        TripState::new("s1", "u1", "Plan Paris")
    }

    /// **Scenario**: Planning error routes to the error handler; otherwise
    /// always research.
    #[test]
    fn route_after_planning_paths() {
        let mut s = state();
        assert_eq!(Coordinator::route_after_planning(&mut s), "research_agent");
        s.set_error("planning_agent", "boom");
        assert_eq!(Coordinator::route_after_planning(&mut s), "error_handler");
    }

    /// **Scenario**: Without an SLA the shortcut is never taken, even with
    /// minimal data present.
    #[test]
    fn no_sla_means_no_shortcut() {
        let co = coordinator();
        let mut s = state();
        s.research = json!({"cities": ["Tokyo"], "poi": {}});
        s.next_agent = Some("budget_agent".to_string());
        assert_eq!(co.route_after_research(&mut s), "budget_agent");
    }

    /// **Scenario**: Research retries are bounded at 2; the third request for
    /// a retry records an error and routes to the error handler.
    #[test]
    fn research_retries_are_bounded() {
        let co = coordinator();
        let mut s = state();
        s.next_agent = Some("research_agent".to_string());

        assert_eq!(co.route_after_research(&mut s), "research_agent");
        assert_eq!(co.route_after_research(&mut s), "research_agent");
        assert_eq!(co.route_after_research(&mut s), "error_handler");
        assert_eq!(s.research_retries, 3);
        assert_eq!(s.agent_status("research_agent"), Some(AgentStatus::Error));
    }

    /// **Scenario**: Budget routing prefers a produced plan over everything
    /// except errors.
    #[test]
    fn budget_with_trip_goes_to_response() {
        let co = coordinator();
        let mut s = state();
        s.trip = json!({"request": {"trip": {"days": []}}});
        s.next_agent = Some("budget_agent".to_string());
        assert_eq!(co.route_after_budget(&mut s), "response_agent");
        assert_eq!(s.budget_retries, 0);
    }

    /// **Scenario**: Empty research means needs_gap is false and the attempt
    /// counter is untouched.
    #[test]
    fn needs_gap_short_circuits_on_empty_research() {
        let co = coordinator();
        let mut s = state();
        assert!(!co.needs_gap(&mut s));
        assert_eq!(s.gap_filling_attempts, 0);
    }

    /// **Scenario**: gap_filling_completed permanently disables the gap pass.
    #[test]
    fn completed_gap_never_reenters() {
        let co = coordinator();
        let mut s = state();
        s.research = json!({"cities": ["Paris", "Lyon"], "poi": {"poi_by_city": {}}});
        s.gap_filling_completed = true;
        assert!(!co.needs_gap(&mut s));
    }

    /// **Scenario**: enqueue appends to both queue and history; drain is
    /// bounded by max_steps.
    #[tokio::test]
    async fn pump_is_fifo_and_bounded() {
        let co = coordinator();
        let mut s = state();
        for i in 0..5 {
            Coordinator::enqueue(
                &mut s,
                AgentMessage::new("a", "nobody", "notification", json!({"i": i})),
            );
        }
        assert_eq!(s.message_queue.len(), 5);
        assert_eq!(s.message_history.len(), 5);

        co.drain_queue(&mut s, 3).await;
        assert_eq!(s.message_queue.len(), 2);
        // FIFO: the remaining messages are the last two enqueued.
        assert_eq!(s.message_queue[0].content["i"], json!(3));
    }

    /// **Scenario**: The graph compiles with all eight nodes wired.
    #[test]
    fn trip_graph_compiles() {
        let co = Arc::new(coordinator());
        assert!(co.build_graph().is_ok());
    }
}
