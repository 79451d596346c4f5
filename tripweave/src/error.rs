//! Errors for agent and graph execution.
//!
//! `AgentError` is the single error type flowing through stage nodes, the
//! tool bridge, and the compiled graph. Graph construction errors live in
//! `graph::CompilationError`; persistence errors in `memory::StoreError`.

use thiserror::Error;

/// Error raised by agents, stage nodes, and graph execution.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A stage or agent failed in a way the router cannot recover from.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A stage referenced an agent id that was never registered.
    #[error("agent not registered: {0}")]
    AgentNotRegistered(String),

    /// A tool invocation failed inside an agent (wrapped bridge error).
    #[error("tool call failed: {0}")]
    ToolFailed(String),

    /// The graph exceeded its node-entry budget for one request.
    #[error("recursion limit of {0} node entries exceeded")]
    RecursionLimit(usize),

    /// Payload (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Display of RecursionLimit names the limit that was hit.
    #[test]
    fn recursion_limit_display_contains_limit() {
        let err = AgentError::RecursionLimit(200);
        let s = err.to_string();
        assert!(s.contains("200"), "Display should contain the limit: {}", s);
        assert!(
            s.contains("recursion limit"),
            "Display should mention the recursion limit: {}",
            s
        );
    }

    /// **Scenario**: Display of AgentNotRegistered contains the agent id.
    #[test]
    fn agent_not_registered_display_contains_id() {
        let err = AgentError::AgentNotRegistered("budget_agent".to_string());
        assert!(err.to_string().contains("budget_agent"));
    }
}
