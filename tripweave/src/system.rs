//! Orchestrator facade: the single entry point for processing requests.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::agents::{
    BudgetAgent, GapAgent, LearningAgent, PlanningAgent, ResearchAgent, ResponseAgent,
};
use crate::bridge::ToolBridge;
use crate::config::TripweaveConfig;
use crate::coordinator::Coordinator;
use crate::error::AgentError;
use crate::graph::{CompilationError, CompiledStateGraph, DEFAULT_RECURSION_LIMIT};
use crate::memory::{MemoryKind, MemorySystem, SqliteDocumentStore};
use crate::state::TripState;

/// One user request for the facade.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub user_request: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub sla_seconds: Option<f64>,
    /// Free-form request context, scanned last when building the logging
    /// context.
    pub context: Value,
}

impl PlanRequest {
    pub fn new(user_request: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            user_request: user_request.into(),
            user_id: user_id.into(),
            session_id: None,
            sla_seconds: None,
            context: Value::Object(Map::new()),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_sla(mut self, sla_seconds: f64) -> Self {
        self.sla_seconds = Some(sla_seconds);
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// Logging block returned with every envelope.
#[derive(Debug, Clone, Serialize)]
pub struct LoggingInfo {
    pub context: Value,
    pub agents: Value,
}

/// Response envelope for one processed request.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub session_id: String,
    pub agents_used: Vec<String>,
    pub learning_insights: Value,
    pub logging: LoggingInfo,
}

/// The trip-planning orchestrator.
///
/// Owns the compiled workflow graph, the shared memory system, and the tool
/// bridge. Tools are registered on [`TripPlanner::bridge`]; the planner
/// itself stays registry-driven and tool-agnostic.
pub struct TripPlanner {
    coordinator: Arc<Coordinator>,
    graph: CompiledStateGraph<TripState>,
    memory: Arc<MemorySystem>,
    bridge: Arc<ToolBridge>,
    sla_seconds: Option<f64>,
}

impl TripPlanner {
    /// Builds the planner with the default six-agent set.
    pub fn new(config: TripweaveConfig) -> Result<Self, CompilationError> {
        let memory = Arc::new(match &config.store_path {
            Some(path) => match SqliteDocumentStore::new(path) {
                Ok(store) => MemorySystem::with_store(Arc::new(store)),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "document store unavailable, running in-memory");
                    MemorySystem::new()
                }
            },
            None => MemorySystem::new(),
        });
        let bridge = Arc::new(ToolBridge::with_config(
            config.max_workers,
            config.default_policy.clone(),
        ));

        let mut coordinator = Coordinator::new(memory.clone());
        coordinator.register_agent(Arc::new(PlanningAgent::new(memory.clone(), bridge.clone())));
        coordinator.register_agent(Arc::new(ResearchAgent::new(memory.clone(), bridge.clone())));
        coordinator.register_agent(Arc::new(BudgetAgent::new(memory.clone(), bridge.clone())));
        coordinator.register_agent(Arc::new(GapAgent::new(memory.clone(), bridge.clone())));
        coordinator.register_agent(Arc::new(ResponseAgent::new(memory.clone(), bridge.clone())));
        coordinator.register_agent(Arc::new(LearningAgent::new(memory.clone())));

        let coordinator = Arc::new(coordinator);
        let graph = coordinator.build_graph()?;

        Ok(Self {
            coordinator,
            graph,
            memory,
            bridge,
            sla_seconds: config.sla_seconds,
        })
    }

    /// The shared tool bridge; register tools here.
    pub fn bridge(&self) -> &Arc<ToolBridge> {
        &self.bridge
    }

    /// The shared memory system.
    pub fn memory(&self) -> &Arc<MemorySystem> {
        &self.memory
    }

    /// Processes one request through the workflow graph.
    pub async fn process_request(&self, request: PlanRequest) -> Envelope {
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| format!("session_{}", Uuid::new_v4().simple()));
        let user_id = request.user_id.clone();

        // Conversation context: session history first, recent-by-user fallback.
        let mut history = self
            .memory
            .get_conversation_history(Some(&session_id), Some(&user_id), 5)
            .await;
        if history.is_empty() && user_id != "anonymous" {
            history = self.memory.get_recent_conversations(&user_id, 24, 3).await;
        }
        let prior_turns = history.len();

        let state = TripState::new(&session_id, &user_id, &request.user_request)
            .with_sla(request.sla_seconds.or(self.sla_seconds))
            .with_history(history);
        let is_follow_up = state.is_follow_up;
        let started_at = state.started_at;

        let final_state = match self.graph.invoke(state, DEFAULT_RECURSION_LIMIT).await {
            Ok(s) => s,
            Err(AgentError::RecursionLimit(limit)) => {
                let msg = format!(
                    "Processing took too many steps (recursion limit {limit}). \
                     Try breaking the request into smaller parts."
                );
                return self.error_envelope(&session_id, &user_id, msg);
            }
            Err(e) => {
                return self.error_envelope(&session_id, &user_id, e.to_string());
            }
        };

        let final_response = final_state
            .final_response
            .clone()
            .unwrap_or_else(|| json!({ "message": "No response generated" }));

        // Persist the turn for follow-ups.
        let turn = (prior_turns + 1) as u32;
        self.memory
            .store_conversation_turn(&session_id, &user_id, &request.user_request, &final_response, turn)
            .await;

        // Session episodic memory plus any preferences the response surfaced.
        self.memory
            .store(
                "system",
                MemoryKind::Episodic,
                json!({
                    "user_id": user_id,
                    "user_request": request.user_request,
                    "response": final_response,
                    "session_id": session_id,
                }),
                0.8,
                vec![
                    "session".to_string(),
                    "user_interaction".to_string(),
                    user_id.clone(),
                ],
            )
            .await;
        if let Some(prefs) = final_response.get("preferences").and_then(Value::as_object) {
            for (pref_type, value) in prefs {
                self.memory
                    .learn_user_preference(&user_id, pref_type, value.clone(), 0.7, Some(&session_id))
                    .await;
            }
        }

        let status = final_response
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("success")
            .to_string();

        let context = build_logging_context(
            &session_id,
            &user_id,
            is_follow_up,
            &started_at.to_rfc3339(),
            &[&final_response, &final_state.planning, &request.context],
        );

        Envelope {
            status,
            response: Some(final_response),
            error: None,
            session_id,
            agents_used: self.coordinator.agent_ids(),
            learning_insights: final_state.learning_insights.clone(),
            logging: LoggingInfo {
                context,
                agents: Value::Object(Map::new()),
            },
        }
    }

    fn error_envelope(&self, session_id: &str, user_id: &str, message: String) -> Envelope {
        Envelope {
            status: "error".to_string(),
            response: None,
            error: Some(message.clone()),
            session_id: session_id.to_string(),
            agents_used: self.coordinator.agent_ids(),
            learning_insights: Value::Object(Map::new()),
            logging: LoggingInfo {
                context: json!({
                    "session_id": session_id,
                    "user_id": user_id,
                    "error": message,
                }),
                agents: Value::Object(Map::new()),
            },
        }
    }
}

/// Builds the logging context by scanning candidate objects in priority
/// order, taking the first value found per key, with documented defaults.
fn build_logging_context(
    session_id: &str,
    user_id: &str,
    is_follow_up: bool,
    timestamp: &str,
    candidates: &[&Value],
) -> Value {
    let target_currency = candidates
        .iter()
        .find_map(|c| c.get("target_currency").and_then(Value::as_str))
        .unwrap_or("USD");

    let mut ctx = json!({
        "session_id": session_id,
        "user_id": user_id,
        "is_follow_up": is_follow_up,
        "timestamp": timestamp,
        "target_currency": target_currency,
    });

    let keys: [(&str, Value); 6] = [
        ("countries", json!([])),
        ("cities", json!([])),
        ("dates", json!({})),
        ("travelers", json!({})),
        ("preferences", json!({})),
        ("budget_caps", json!({})),
    ];
    if let Some(obj) = ctx.as_object_mut() {
        for (key, default) in keys {
            let found = candidates
                .iter()
                .filter_map(|c| c.as_object())
                .find_map(|c| c.get(key).cloned());
            obj.insert(key.to_string(), found.unwrap_or(default));
        }
    }
    ctx
}
