//! Graph compilation error.
//!
//! Returned by `StateGraph::compile` when edges reference unknown nodes or
//! the edge set is structurally invalid.

use thiserror::Error;

/// Error when compiling a state graph.
#[derive(Debug, Error)]
pub enum CompilationError {
    /// A node id in an edge was not registered via `add_node` (and is not START/END).
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// No edge has from_id == START, or more than one such edge.
    #[error("graph must have exactly one edge from START")]
    MissingStart,

    /// Neither an edge nor a conditional path reaches END.
    #[error("graph must have at least one path to END")]
    MissingEnd,

    /// A node has more than one unconditional outgoing edge.
    #[error("node has duplicate outgoing edges: {0}")]
    DuplicateEdge(String),

    /// A node has both an unconditional edge and conditional edges.
    #[error("node has both edge and conditional edges: {0}")]
    NodeHasBothEdgeAndConditional(String),

    /// A value in a conditional path_map is not a valid node id or END.
    #[error("conditional path_map invalid target: {0}")]
    InvalidConditionalPathMap(String),
}
