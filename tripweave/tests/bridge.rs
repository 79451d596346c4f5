//! Tool bridge behavior: retries, backoff, timeouts, and the circuit breaker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use tripweave::bridge::{tool_error, tool_success, Tool, ToolBridge, ToolPolicy, ToolPolicyOverride};
use tripweave::{AgentError, ToolStatus};

/// Tool failing the first `failures` calls, then succeeding.
struct FlakyTool {
    calls: Arc<AtomicUsize>,
    failures: usize,
}

#[async_trait]
impl Tool for FlakyTool {
    async fn call(&self, _args: Value) -> Result<Value, AgentError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Ok(tool_error(format!("transient failure {}", n + 1)))
        } else {
            Ok(tool_success(json!({"attempt": n + 1})))
        }
    }
}

/// Tool that sleeps longer than any reasonable timeout.
struct HangingTool;

#[async_trait]
impl Tool for HangingTool {
    async fn call(&self, _args: Value) -> Result<Value, AgentError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(tool_success(json!({})))
    }
}

/// **Scenario 3a**: A tool failing twice then succeeding completes on the
/// third attempt with two visible backoffs (>= 50 ms each) and the breaker
/// stays closed.
#[tokio::test]
async fn retry_succeeds_on_third_attempt_with_backoff() {
    let bridge = ToolBridge::new();
    let calls = Arc::new(AtomicUsize::new(0));
    bridge.register_tool(
        "flaky",
        Arc::new(FlakyTool {
            calls: calls.clone(),
            failures: 2,
        }),
    );
    bridge.set_policy(
        "flaky",
        ToolPolicy {
            retries: 2,
            base_backoff_sec: 0.0,
            backoff_jitter_sec: 0.0,
            ..Default::default()
        },
    );

    let t0 = Instant::now();
    let res = bridge.execute_tool("flaky", None, None).await;
    let elapsed = t0.elapsed();

    assert_eq!(res.status, ToolStatus::Success);
    assert_eq!(res.result, Some(json!({"attempt": 3})));
    assert_eq!(calls.load(Ordering::SeqCst), 3, "total attempts = retries + 1");
    assert!(
        elapsed >= Duration::from_millis(100),
        "two backoffs of at least 50 ms each, got {elapsed:?}"
    );

    // Breaker stayed closed: an immediate call goes straight through.
    let res = bridge.execute_tool("flaky", None, None).await;
    assert_eq!(res.status, ToolStatus::Success);
}

/// **Scenario 3b**: Three consecutive failures open the circuit; calls are
/// skipped while open and resume after the window elapses.
#[tokio::test]
async fn breaker_opens_after_threshold_and_reenables() {
    let bridge = ToolBridge::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    bridge.register_fn("down", move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        tool_error("backend down")
    });
    bridge.set_policy(
        "down",
        ToolPolicy {
            retries: 0,
            base_backoff_sec: 0.0,
            backoff_jitter_sec: 0.0,
            circuit_fail_threshold: 3,
            circuit_open_sec: 0.3,
            ..Default::default()
        },
    );

    for _ in 0..3 {
        let res = bridge.execute_tool("down", None, None).await;
        assert_eq!(res.status, ToolStatus::Error);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Circuit is open: the tool is not called at all.
    let res = bridge.execute_tool("down", None, None).await;
    assert_eq!(res.status, ToolStatus::Skipped);
    assert_eq!(res.error.as_deref(), Some("circuit_open"));
    assert_eq!(calls.load(Ordering::SeqCst), 3, "skipped call never reached the tool");

    // After the open window, calls flow again.
    tokio::time::sleep(Duration::from_millis(350)).await;
    let res = bridge.execute_tool("down", None, None).await;
    assert_eq!(res.status, ToolStatus::Error);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

/// **Scenario**: A hanging tool is cut off by the per-call timeout and
/// reported as "timeout" after the final attempt.
#[tokio::test]
async fn timeout_counts_as_failure() {
    let bridge = ToolBridge::new();
    bridge.register_tool("hang", Arc::new(HangingTool));

    let over = ToolPolicyOverride::default()
        .timeout_sec(0.1)
        .retries(1)
        .base_backoff_sec(0.0)
        .backoff_jitter_sec(0.0);

    let t0 = Instant::now();
    let res = bridge.execute_tool("hang", None, Some(over)).await;
    let elapsed = t0.elapsed();

    assert_eq!(res.status, ToolStatus::Error);
    assert_eq!(res.error.as_deref(), Some("timeout"));
    // Two attempts of ~100 ms each plus one clamped backoff.
    assert!(elapsed < Duration::from_secs(2), "timeout bounded the wait: {elapsed:?}");
}

/// **Scenario**: A success resets the breaker's consecutive-failure count,
/// so interleaved failures never open the circuit.
#[tokio::test]
async fn success_between_failures_keeps_circuit_closed() {
    let bridge = ToolBridge::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    // Fails on every odd call, succeeds on every even call.
    bridge.register_fn("alternating", move |_| {
        let n = seen.fetch_add(1, Ordering::SeqCst);
        if n % 2 == 0 {
            tool_error("odd call fails")
        } else {
            tool_success(json!({"n": n}))
        }
    });
    bridge.set_policy(
        "alternating",
        ToolPolicy {
            retries: 0,
            base_backoff_sec: 0.0,
            backoff_jitter_sec: 0.0,
            circuit_fail_threshold: 3,
            ..Default::default()
        },
    );

    for _ in 0..4 {
        let _ = bridge.execute_tool("alternating", None, None).await;
    }
    // Five calls in: the circuit must still be closed.
    let res = bridge.execute_tool("alternating", None, None).await;
    assert_ne!(res.status, ToolStatus::Skipped);
}

/// **Scenario**: Per-call policy overrides merge over the tool's policy
/// without mutating it.
#[tokio::test]
async fn override_is_per_call_only() {
    let bridge = ToolBridge::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    bridge.register_fn("flaky", move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        tool_error("always")
    });
    bridge.set_policy(
        "flaky",
        ToolPolicy {
            retries: 2,
            base_backoff_sec: 0.0,
            backoff_jitter_sec: 0.0,
            ..Default::default()
        },
    );

    // Override to zero retries: exactly one attempt.
    let over = ToolPolicyOverride::default().retries(0);
    let _ = bridge.execute_tool("flaky", None, Some(over)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Without the override the tool's own policy applies again.
    let _ = bridge.execute_tool("flaky", None, None).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

/// **Scenario**: Concurrent fan-out returns responses in call order.
#[tokio::test]
async fn execute_many_preserves_call_order() {
    let bridge = ToolBridge::new();
    bridge.register_fn("a", |_| tool_success(json!("a")));
    bridge.register_fn("b", |_| tool_success(json!("b")));

    let responses = bridge
        .execute_many(vec![
            ("a".to_string(), None),
            ("missing".to_string(), None),
            ("b".to_string(), None),
        ])
        .await;

    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0].result, Some(json!("a")));
    assert_eq!(responses[1].status, ToolStatus::Error);
    assert_eq!(responses[2].result, Some(json!("b")));
}
