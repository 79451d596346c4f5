//! Tool-execution bridge: registry-driven tool calls with timeout, retry
//! with exponential backoff and jitter, and a per-tool circuit breaker.
//!
//! Tools are opaque callables returning open-schema JSON; the bridge enforces
//! the `{"status": "success"|"error", ...}` return contract, never the tool.
//! Calls fan out onto a bounded worker pool; queueing for a worker counts
//! against the call's timeout.

mod breaker;
mod policy;

pub use breaker::Breaker;
pub use policy::{ToolPolicy, ToolPolicyOverride};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;

use crate::error::AgentError;

/// Default size of the shared worker pool.
pub const DEFAULT_MAX_WORKERS: usize = 12;

/// A callable registered with the bridge.
///
/// The returned value must be a JSON object with a string `status` of
/// `"success"` or `"error"`; optional keys are `result`, `error`,
/// `partial_result`, and `timestamp`. Shape violations are treated as
/// failures by the bridge (`tool_return_shape_invalid`). Tools are expected
/// to be idempotent modulo external side effects; the bridge retries freely.
#[async_trait]
pub trait Tool: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, AgentError>;
}

struct FnTool<F>(F);

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(Value) -> Value + Send + Sync,
{
    async fn call(&self, args: Value) -> Result<Value, AgentError> {
        Ok((self.0)(args))
    }
}

/// Outcome status of a bridge execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
    /// Returned without calling the tool when its circuit is open.
    Skipped,
}

/// Normalized result of `execute_tool`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_result: Option<Value>,
}

impl ToolResponse {
    pub fn success(result: Option<Value>) -> Self {
        Self {
            status: ToolStatus::Success,
            result,
            error: None,
            partial_result: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            result: None,
            error: Some(message.into()),
            partial_result: None,
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Skipped,
            result: None,
            error: Some(message.into()),
            partial_result: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// Builds a conforming success payload for a tool implementation.
pub fn tool_success(result: Value) -> Value {
    json!({ "status": "success", "result": result })
}

/// Builds a conforming error payload for a tool implementation.
pub fn tool_error(message: impl Into<String>) -> Value {
    json!({
        "status": "error",
        "error": message.into(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

/// Exponential backoff with uniform jitter, clamped to at least 50 ms.
fn backoff_delay(base: f64, jitter: f64, attempt: u32) -> Duration {
    let exp = base * 2f64.powi(attempt.saturating_sub(1) as i32);
    let noise = if jitter > 0.0 {
        rand::thread_rng().gen_range(-jitter..jitter)
    } else {
        0.0
    };
    Duration::from_secs_f64((exp + noise).max(0.05))
}

/// Shared tool bridge.
///
/// Process-wide: the registry, per-tool policies, and breakers are safe for
/// concurrent use from multiple requests. Execution:
///
/// 1. Unknown tool -> `{status: error, error: "unknown_tool:<name>"}`.
/// 2. Open breaker -> `{status: skipped, error: "circuit_open"}`.
/// 3. Up to `retries + 1` attempts, each bounded by `timeout_sec` (queueing
///    for a worker included); failures back off exponentially with jitter.
/// 4. The breaker records the final outcome; non-final failures only sleep.
pub struct ToolBridge {
    registry: DashMap<String, Arc<dyn Tool>>,
    policies: DashMap<String, ToolPolicy>,
    breakers: DashMap<String, Breaker>,
    default_policy: ToolPolicy,
    pool: Arc<Semaphore>,
}

impl ToolBridge {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_WORKERS, ToolPolicy::default())
    }

    pub fn with_config(max_workers: usize, default_policy: ToolPolicy) -> Self {
        Self {
            registry: DashMap::new(),
            policies: DashMap::new(),
            breakers: DashMap::new(),
            default_policy,
            pool: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// Registers a tool under `name`, creating its breaker. Replaces any
    /// previous registration with the same name.
    pub fn register_tool(&self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        let name = name.into();
        self.breakers.entry(name.clone()).or_default();
        self.registry.insert(name, tool);
    }

    /// Registers a plain synchronous closure as a tool.
    pub fn register_fn<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.register_tool(name, Arc::new(FnTool(f)));
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.registry.contains_key(name)
    }

    /// Overrides the per-tool policy (merged over the bridge default).
    pub fn set_policy(&self, name: impl Into<String>, policy: ToolPolicy) {
        self.policies.insert(name.into(), policy);
    }

    fn policy_for(&self, name: &str, over: Option<&ToolPolicyOverride>) -> ToolPolicy {
        let base = self
            .policies
            .get(name)
            .map(|p| p.value().clone())
            .unwrap_or_else(|| self.default_policy.clone());
        match over {
            Some(o) => base.merged(o),
            None => base,
        }
    }

    fn breaker_is_open(&self, name: &str) -> bool {
        self.breakers.get(name).map(|b| b.is_open()).unwrap_or(false)
    }

    fn breaker_success(&self, name: &str) {
        if let Some(mut b) = self.breakers.get_mut(name) {
            b.record_success();
        }
    }

    fn breaker_failure(&self, name: &str, policy: &ToolPolicy) {
        let mut entry = self.breakers.entry(name.to_string()).or_default();
        entry.record_failure(policy.circuit_fail_threshold, policy.circuit_open());
    }

    /// One attempt: wait for a worker slot and run the tool, all inside the
    /// policy timeout.
    async fn attempt(&self, tool: Arc<dyn Tool>, args: Value, timeout: Duration) -> AttemptOutcome {
        let pool = self.pool.clone();
        let fut = async move {
            let _permit = match pool.acquire_owned().await {
                Ok(p) => p,
                Err(e) => return Err(AgentError::ExecutionFailed(format!("worker pool closed: {e}"))),
            };
            tool.call(args).await
        };
        match tokio::time::timeout(timeout, fut).await {
            Err(_) => AttemptOutcome::TimedOut,
            Ok(Err(e)) => AttemptOutcome::Raised(e.to_string()),
            Ok(Ok(raw)) => AttemptOutcome::Returned(raw),
        }
    }

    /// Executes a registered tool under its effective policy.
    pub async fn execute_tool(
        &self,
        name: &str,
        args: Option<Value>,
        policy_override: Option<ToolPolicyOverride>,
    ) -> ToolResponse {
        let Some(tool) = self.registry.get(name).map(|t| Arc::clone(t.value())) else {
            return ToolResponse::error(format!("unknown_tool:{name}"));
        };

        let policy = self.policy_for(name, policy_override.as_ref());
        if self.breaker_is_open(name) {
            tracing::debug!(tool = name, "circuit open, skipping call");
            return ToolResponse::skipped("circuit_open");
        }

        let args = args.unwrap_or_else(|| Value::Object(Map::new()));
        let tries = policy.retries + 1;
        let mut last_err = String::from("unknown_error");

        for attempt in 1..=tries {
            match self.attempt(tool.clone(), args.clone(), policy.timeout()).await {
                AttemptOutcome::Returned(raw) => {
                    let status = raw
                        .as_object()
                        .and_then(|o| o.get("status"))
                        .and_then(Value::as_str);
                    match status {
                        Some("success") => {
                            self.breaker_success(name);
                            let obj = raw.as_object();
                            return ToolResponse {
                                status: ToolStatus::Success,
                                result: obj.and_then(|o| o.get("result")).cloned(),
                                error: None,
                                partial_result: obj.and_then(|o| o.get("partial_result")).cloned(),
                            };
                        }
                        Some(_) => {
                            last_err = raw
                                .get("error")
                                .and_then(Value::as_str)
                                .unwrap_or("tool_error")
                                .to_string();
                            if attempt >= tries {
                                self.breaker_failure(name, &policy);
                                return ToolResponse {
                                    status: ToolStatus::Error,
                                    result: raw.get("result").cloned(),
                                    error: Some(last_err),
                                    partial_result: raw.get("partial_result").cloned(),
                                };
                            }
                        }
                        None => {
                            last_err = "tool_return_shape_invalid".to_string();
                            if attempt >= tries {
                                self.breaker_failure(name, &policy);
                                return ToolResponse::error(last_err);
                            }
                        }
                    }
                }
                AttemptOutcome::TimedOut => {
                    last_err = "timeout".to_string();
                    if attempt >= tries {
                        self.breaker_failure(name, &policy);
                        return ToolResponse::error(last_err);
                    }
                }
                AttemptOutcome::Raised(msg) => {
                    last_err = format!("runtime:{msg}");
                    if attempt >= tries {
                        self.breaker_failure(name, &policy);
                        return ToolResponse::error(last_err);
                    }
                }
            }

            let delay = backoff_delay(policy.base_backoff_sec, policy.backoff_jitter_sec, attempt);
            tracing::debug!(tool = name, attempt, last_err = %last_err, delay_ms = delay.as_millis() as u64, "tool attempt failed, backing off");
            tokio::time::sleep(delay).await;
        }

        self.breaker_failure(name, &policy);
        ToolResponse::error(last_err)
    }

    /// Executes several tools concurrently on the shared worker pool,
    /// returning responses in call order. Each call runs under its own
    /// tool's policy and breaker.
    pub async fn execute_many(&self, calls: Vec<(String, Option<Value>)>) -> Vec<ToolResponse> {
        let futures = calls
            .into_iter()
            .map(|(name, args)| async move { self.execute_tool(&name, args, None).await });
        futures::future::join_all(futures).await
    }
}

impl Default for ToolBridge {
    fn default() -> Self {
        Self::new()
    }
}

enum AttemptOutcome {
    Returned(Value),
    TimedOut,
    Raised(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Backoff doubles per attempt and never drops below 50 ms.
    #[test]
    fn backoff_delay_doubles_and_clamps() {
        assert_eq!(backoff_delay(1.0, 0.0, 1), Duration::from_secs_f64(1.0));
        assert_eq!(backoff_delay(1.0, 0.0, 2), Duration::from_secs_f64(2.0));
        assert_eq!(backoff_delay(1.0, 0.0, 3), Duration::from_secs_f64(4.0));
        // A negative effective delay clamps to the floor.
        assert_eq!(backoff_delay(0.0, 0.0, 1), Duration::from_millis(50));
    }

    /// **Scenario**: Executing an unregistered tool yields unknown_tool.
    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let bridge = ToolBridge::new();
        let res = bridge.execute_tool("nope", None, None).await;
        assert_eq!(res.status, ToolStatus::Error);
        assert_eq!(res.error.as_deref(), Some("unknown_tool:nope"));
    }

    /// **Scenario**: A tool returning a map without a status key is treated as
    /// a failure with last_err = tool_return_shape_invalid.
    #[tokio::test]
    async fn shapeless_return_is_invalid() {
        let bridge = ToolBridge::new();
        bridge.register_fn("bad_shape", |_| json!({"data": 1}));
        let over = ToolPolicyOverride::default()
            .retries(0)
            .base_backoff_sec(0.0)
            .backoff_jitter_sec(0.0);
        let res = bridge.execute_tool("bad_shape", None, Some(over)).await;
        assert_eq!(res.status, ToolStatus::Error);
        assert_eq!(res.error.as_deref(), Some("tool_return_shape_invalid"));
    }

    /// **Scenario**: A successful call passes the result through untouched.
    #[tokio::test]
    async fn success_passthrough() {
        let bridge = ToolBridge::new();
        bridge.register_fn("echo", |args| tool_success(args));
        let res = bridge
            .execute_tool("echo", Some(json!({"x": 1})), None)
            .await;
        assert!(res.is_success());
        assert_eq!(res.result, Some(json!({"x": 1})));
    }

    /// **Scenario**: The final failing attempt passes the tool's partial
    /// result through with status error.
    #[tokio::test]
    async fn final_failure_passes_result_through() {
        let bridge = ToolBridge::new();
        bridge.register_fn("flaky", |_| {
            json!({"status": "error", "error": "fx_errors", "result": {"partial": true}})
        });
        let over = ToolPolicyOverride::default()
            .retries(0)
            .base_backoff_sec(0.0)
            .backoff_jitter_sec(0.0);
        let res = bridge.execute_tool("flaky", None, Some(over)).await;
        assert_eq!(res.status, ToolStatus::Error);
        assert_eq!(res.error.as_deref(), Some("fx_errors"));
        assert_eq!(res.result, Some(json!({"partial": true})));
    }
}
