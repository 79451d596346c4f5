//! # Tripweave
//!
//! A multi-agent trip-planning orchestrator with a **state-in, state-out**
//! design: one canonical [`TripState`] flows through a fixed graph of agent
//! stages, with conditional routing, bounded retries, an SLA-aware shortcut,
//! and a single-pass gap-filling subroutine.
//!
//! ## Design principles
//!
//! - **Single state type**: every stage reads any bucket of the shared state
//!   but writes only its own, plus routing counters, statuses, and the
//!   message queue.
//! - **One step per entry**: each agent performs one stage-bounded unit of
//!   work; router predicates decide every transition, never the stage.
//! - **Registry-driven tools**: agents call external tools through the
//!   [`ToolBridge`], which enforces timeouts, retries with exponential
//!   backoff and jitter, and per-tool circuit breakers.
//! - **Best-effort persistence**: the [`MemorySystem`] works fully in-memory;
//!   an attached [`DocumentStore`] is write-through and may fail without ever
//!   failing a request.
//!
//! ## Main modules
//!
//! - [`graph`]: [`StateGraph`], [`CompiledStateGraph`], [`Node`], [`Next`] —
//!   build and run state graphs with conditional edges and a recursion limit.
//! - [`state`]: [`TripState`], [`AgentMessage`], statuses and audit records.
//! - [`agents`]: the [`Agent`] contract, [`AgentContext`], and the six stage
//!   agents (planning, research, budget, gap, response, learning).
//! - [`coordinator`]: stage nodes, message pump, routers, graph assembly.
//! - [`bridge`]: [`ToolBridge`], [`ToolPolicy`], [`Breaker`].
//! - [`memory`]: [`MemorySystem`], typed records, caching, conversation
//!   history, learning metrics, optional SQLite persistence.
//! - [`patch`]: the gap-filling path mini-language.
//! - [`system`]: [`TripPlanner`] facade and the response [`Envelope`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use tripweave::bridge::tool_success;
//! use tripweave::{PlanRequest, TripPlanner, TripweaveConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let planner = TripPlanner::new(TripweaveConfig::default()).expect("graph compiles");
//! planner.bridge().register_fn("interpreter", |args| {
//!     tool_success(json!({
//!         "cities": ["Paris"],
//!         "tool_plan": ["poi.discovery"],
//!         "user_request": args["user_request"],
//!     }))
//! });
//!
//! let envelope = planner
//!     .process_request(PlanRequest::new("Plan 5 days in Paris", "u1"))
//!     .await;
//! println!("{}", envelope.status);
//! # }
//! ```

pub mod agents;
pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod graph;
pub mod memory;
pub mod patch;
pub mod state;
pub mod system;

pub use agents::{
    Agent, AgentContext, AgentCore, BudgetAgent, GapAgent, LearningAgent, MissingItem,
    PlanningAgent, ResearchAgent, ResponseAgent, TaskReport, TaskStatus,
};
pub use bridge::{
    tool_error, tool_success, Breaker, Tool, ToolBridge, ToolPolicy, ToolPolicyOverride,
    ToolResponse, ToolStatus, DEFAULT_MAX_WORKERS,
};
pub use config::TripweaveConfig;
pub use coordinator::{Coordinator, MAX_BUDGET_RETRIES, MAX_RESEARCH_RETRIES};
pub use error::AgentError;
pub use graph::{
    CompilationError, CompiledStateGraph, Next, Node, StateGraph, DEFAULT_RECURSION_LIMIT, END,
    START,
};
pub use memory::{
    make_fingerprint, ConversationTurn, DocumentStore, LearningMetrics, MemoryEntry, MemoryKind,
    MemoryQuery, MemorySystem, SqliteDocumentStore, StoreError, UserPreference,
};
pub use patch::{apply_patch, apply_patches, parse_path, PatchError, PathToken};
pub use state::{
    AgentMemorySlot, AgentMessage, AgentStatus, AgentStatusInfo, ProcessingStep, TripState,
};
pub use system::{Envelope, LoggingInfo, PlanRequest, TripPlanner};
