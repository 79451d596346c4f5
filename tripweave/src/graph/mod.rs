//! State graph: nodes + explicit edges and conditional routers.
//!
//! Build with `StateGraph::add_node` / `add_edge` (using `START` and `END`)
//! plus `add_conditional_edges` for state-based routing, then `compile()` and
//! `invoke(state, recursion_limit)`.

mod compile_error;
mod compiled;
mod conditional;
mod node;
mod state_graph;

pub use compile_error::CompilationError;
pub use compiled::{CompiledStateGraph, DEFAULT_RECURSION_LIMIT};
pub use conditional::{ConditionalRouter, ConditionalRouterFn, NextEntry};
pub use node::{Next, Node};
pub use state_graph::{StateGraph, END, START};
