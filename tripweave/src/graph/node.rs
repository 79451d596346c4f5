//! Graph node trait: one step in a StateGraph.
//!
//! Receives state `S`, returns updated `S` and `Next` (continue, jump, or
//! end). Conditional edges, when present on the source node, override `Next`.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::AgentError;

/// Routing hint returned by a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    /// Follow the node's unconditional edge (or end if none).
    Continue,
    /// Jump directly to the node with this id.
    Node(String),
    /// Stop and return the current state.
    End,
}

/// One step in a graph: state in, (state out, next step).
///
/// The runner uses the returned `Next` to choose the next node unless the
/// source node has conditional edges, in which case the router decides.
#[async_trait]
pub trait Node<S>: Send + Sync
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Node id (e.g. `"planning_agent"`). Must be unique within a graph.
    fn id(&self) -> &str;

    /// One step: state in, (state out, next step).
    async fn run(&self, state: S) -> Result<(S, Next), AgentError>;
}
