//! Compiled state graph: immutable, supports invoke only.
//!
//! Built by `StateGraph::compile`. Runs from the first node; after each node,
//! a conditional router (when present on the source) or the node's returned
//! `Next` chooses the next node. Every node entry counts against the
//! recursion limit; exceeding it aborts the run with a structured error.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::AgentError;
use crate::graph::conditional::NextEntry;
use crate::graph::node::{Next, Node};
use crate::graph::state_graph::END;

/// Default budget of node entries for one request.
pub const DEFAULT_RECURSION_LIMIT: usize = 200;

/// Compiled graph: immutable structure, supports invoke only.
#[derive(Clone)]
pub struct CompiledStateGraph<S> {
    pub(super) nodes: HashMap<String, Arc<dyn Node<S>>>,
    /// First node to run (from START).
    pub(super) first_node_id: String,
    /// Map from node id to how to get next: Unconditional(to_id) or Conditional(router).
    pub(super) next_map: HashMap<String, NextEntry<S>>,
}

impl<S> CompiledStateGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Runs the graph with the given state, bounded by `recursion_limit` node
    /// entries.
    ///
    /// - Conditional edges on the current node always win over the node's
    ///   returned `Next`.
    /// - `Next::Continue`: follow the unconditional edge, or end if none.
    /// - `Next::Node(id)`: run the node with that id next.
    /// - `Next::End`: stop and return the current state.
    pub async fn invoke(&self, state: S, recursion_limit: usize) -> Result<S, AgentError> {
        if self.nodes.is_empty() || !self.nodes.contains_key(&self.first_node_id) {
            return Err(AgentError::ExecutionFailed("empty graph".into()));
        }

        let mut state = state;
        let mut current_id = self.first_node_id.clone();
        let mut entries = 0usize;

        tracing::debug!("graph run started");
        loop {
            entries += 1;
            if entries > recursion_limit {
                tracing::warn!(limit = recursion_limit, "graph recursion limit exceeded");
                return Err(AgentError::RecursionLimit(recursion_limit));
            }

            let node = self
                .nodes
                .get(&current_id)
                .expect("compiled graph has all nodes")
                .clone();

            tracing::debug!(node = %current_id, entry = entries, "node start");
            let (new_state, next) = node.run(state).await?;
            state = new_state;
            tracing::debug!(node = %current_id, "node complete");

            let next_id: Option<String> =
                if let Some(NextEntry::Conditional(router)) = self.next_map.get(&current_id) {
                    let target = router.resolve_next(&mut state);
                    tracing::debug!(from = %current_id, to = %target, "conditional routing");
                    Some(target)
                } else {
                    match next {
                        Next::End => None,
                        Next::Node(id) => Some(id),
                        Next::Continue => self.next_map.get(&current_id).and_then(|e| {
                            if let NextEntry::Unconditional(id) = e {
                                Some(id.clone())
                            } else {
                                None
                            }
                        }),
                    }
                };

            match next_id {
                None => {
                    tracing::debug!(entries, "graph run complete");
                    return Ok(state);
                }
                Some(id) if id == END => {
                    tracing::debug!(entries, "graph run complete");
                    return Ok(state);
                }
                Some(id) => current_id = id,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::graph::{CompilationError, Next, Node, StateGraph, END, START};

    #[derive(Clone)]
    struct AddNode {
        id: &'static str,
        delta: i32,
    }

    #[async_trait]
    impl Node<i32> for AddNode {
        fn id(&self) -> &str {
            self.id
        }
        async fn run(&self, state: i32) -> Result<(i32, Next), AgentError> {
            Ok((state + self.delta, Next::Continue))
        }
    }

    /// Node that from "first" returns Next::Node("third") to skip "second".
    #[derive(Clone)]
    struct JumpToThirdNode {
        id: &'static str,
        delta: i32,
    }

    #[async_trait]
    impl Node<i32> for JumpToThirdNode {
        fn id(&self) -> &str {
            self.id
        }
        async fn run(&self, state: i32) -> Result<(i32, Next), AgentError> {
            let next = if self.id == "first" {
                Next::Node("third".to_string())
            } else {
                Next::Continue
            };
            Ok((state + self.delta, next))
        }
    }

    fn build_two_step_graph() -> CompiledStateGraph<i32> {
        let mut graph = StateGraph::<i32>::new();
        graph.add_node("first", Arc::new(AddNode { id: "first", delta: 1 }));
        graph.add_node("second", Arc::new(AddNode { id: "second", delta: 2 }));
        graph.add_edge(START, "first");
        graph.add_edge("first", "second");
        graph.add_edge("second", END);
        graph.compile().expect("graph compiles")
    }

    /// **Scenario**: An empty graph returns ExecutionFailed("empty graph").
    #[tokio::test]
    async fn invoke_empty_graph_returns_execution_failed() {
        let graph = CompiledStateGraph::<i32> {
            nodes: HashMap::new(),
            first_node_id: String::new(),
            next_map: HashMap::new(),
        };
        match graph.invoke(0, 10).await {
            Err(AgentError::ExecutionFailed(msg)) => assert!(msg.contains("empty graph")),
            other => panic!("expected ExecutionFailed, got {:?}", other),
        }
    }

    /// **Scenario**: A two-step linear graph runs both nodes in edge order.
    #[tokio::test]
    async fn invoke_linear_chain_runs_in_order() {
        let graph = build_two_step_graph();
        let out = graph.invoke(0, 10).await.unwrap();
        assert_eq!(out, 3, "0 -> first(+1) -> second(+2)");
    }

    /// **Scenario**: Conditional edges route by state via the path map.
    #[tokio::test]
    async fn invoke_conditional_edges_routes_by_state() {
        let mut graph = StateGraph::<i32>::new();
        graph.add_node("decide", Arc::new(AddNode { id: "decide", delta: 0 }));
        graph.add_node("even_node", Arc::new(AddNode { id: "even_node", delta: 10 }));
        graph.add_node("odd_node", Arc::new(AddNode { id: "odd_node", delta: 100 }));
        graph.add_edge(START, "decide");
        graph.add_edge("even_node", END);
        graph.add_edge("odd_node", END);
        let path_map: HashMap<String, String> = [
            ("even".to_string(), "even_node".to_string()),
            ("odd".to_string(), "odd_node".to_string()),
        ]
        .into_iter()
        .collect();
        graph.add_conditional_edges(
            "decide",
            Arc::new(|s: &mut i32| if *s % 2 == 0 { "even".into() } else { "odd".into() }),
            Some(path_map),
        );
        let compiled = graph.compile().expect("graph compiles");
        assert_eq!(compiled.invoke(2, 10).await.unwrap(), 12);
        assert_eq!(compiled.invoke(1, 10).await.unwrap(), 101);
    }

    /// **Scenario**: Next::Node(id) jumps over the linear order.
    #[tokio::test]
    async fn invoke_next_node_jumps_to_specified_node() {
        let mut graph = StateGraph::<i32>::new();
        graph.add_node("first", Arc::new(JumpToThirdNode { id: "first", delta: 1 }));
        graph.add_node("second", Arc::new(AddNode { id: "second", delta: 10 }));
        graph.add_node("third", Arc::new(AddNode { id: "third", delta: 100 }));
        graph.add_edge(START, "first");
        graph.add_edge("first", "second");
        graph.add_edge("second", "third");
        graph.add_edge("third", END);
        let compiled = graph.compile().expect("graph compiles");
        // first: 0+1=1, jumps to third: 1+100=101 (second skipped).
        assert_eq!(compiled.invoke(0, 10).await.unwrap(), 101);
    }

    /// **Scenario**: A self-looping conditional graph is cut off by the
    /// recursion limit with a structured error.
    #[tokio::test]
    async fn invoke_recursion_limit_stops_cycles() {
        let mut graph = StateGraph::<i32>::new();
        graph.add_node("spin", Arc::new(AddNode { id: "spin", delta: 1 }));
        // No path map: the router may name END at runtime, it just never does.
        graph.add_conditional_edges("spin", Arc::new(|_: &mut i32| "spin".to_string()), None);
        graph.add_edge(START, "spin");
        let compiled = graph.compile().expect("graph compiles");
        match compiled.invoke(0, 5).await {
            Err(AgentError::RecursionLimit(limit)) => assert_eq!(limit, 5),
            other => panic!("expected RecursionLimit, got {:?}", other),
        }
    }

    /// **Scenario**: A conditional router returning END stops the run.
    #[tokio::test]
    async fn invoke_conditional_to_end_stops() {
        let mut graph = StateGraph::<i32>::new();
        graph.add_node("only", Arc::new(AddNode { id: "only", delta: 7 }));
        graph.add_edge(START, "only");
        graph.add_conditional_edges("only", Arc::new(|_: &mut i32| END.to_string()), None);
        let compiled = graph.compile().expect("graph compiles");
        assert_eq!(compiled.invoke(0, 10).await.unwrap(), 7);
    }

    /// **Scenario**: compile surfaces CompilationError for an invalid graph and
    /// invoke is never reached.
    #[test]
    fn compile_error_propagates() {
        let mut graph = StateGraph::<i32>::new();
        graph.add_edge(START, "missing");
        let err = graph.compile().err().expect("compile should fail");
        assert!(matches!(err, CompilationError::NodeNotFound(_)));
    }
}
