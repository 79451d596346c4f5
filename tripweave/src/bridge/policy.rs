//! Per-tool execution policy: timeout, retries, backoff, breaker thresholds.

use std::time::Duration;

/// Execution policy applied to one tool. Total attempts = `retries + 1`.
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    /// Hard wall for any single tool call, including queueing for a worker.
    pub timeout_sec: f64,
    /// Retry count after the first attempt.
    pub retries: u32,
    /// First backoff delay; doubles each attempt.
    pub base_backoff_sec: f64,
    /// Uniform +/- jitter added to each backoff delay.
    pub backoff_jitter_sec: f64,
    /// Consecutive failures before the circuit opens.
    pub circuit_fail_threshold: u32,
    /// How long an opened circuit stays open.
    pub circuit_open_sec: f64,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            timeout_sec: 45.0,
            retries: 2,
            base_backoff_sec: 1.0,
            backoff_jitter_sec: 0.3,
            circuit_fail_threshold: 3,
            circuit_open_sec: 60.0,
        }
    }
}

impl ToolPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_sec.max(0.0))
    }

    pub fn circuit_open(&self) -> Duration {
        Duration::from_secs_f64(self.circuit_open_sec.max(0.0))
    }

    /// Returns a copy with the override's set fields applied on top.
    pub fn merged(&self, over: &ToolPolicyOverride) -> ToolPolicy {
        ToolPolicy {
            timeout_sec: over.timeout_sec.unwrap_or(self.timeout_sec),
            retries: over.retries.unwrap_or(self.retries),
            base_backoff_sec: over.base_backoff_sec.unwrap_or(self.base_backoff_sec),
            backoff_jitter_sec: over.backoff_jitter_sec.unwrap_or(self.backoff_jitter_sec),
            circuit_fail_threshold: over
                .circuit_fail_threshold
                .unwrap_or(self.circuit_fail_threshold),
            circuit_open_sec: over.circuit_open_sec.unwrap_or(self.circuit_open_sec),
        }
    }
}

/// Partial policy: only the set fields override the tool's effective policy.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicyOverride {
    pub timeout_sec: Option<f64>,
    pub retries: Option<u32>,
    pub base_backoff_sec: Option<f64>,
    pub backoff_jitter_sec: Option<f64>,
    pub circuit_fail_threshold: Option<u32>,
    pub circuit_open_sec: Option<f64>,
}

impl ToolPolicyOverride {
    pub fn timeout_sec(mut self, v: f64) -> Self {
        self.timeout_sec = Some(v);
        self
    }

    pub fn retries(mut self, v: u32) -> Self {
        self.retries = Some(v);
        self
    }

    pub fn base_backoff_sec(mut self, v: f64) -> Self {
        self.base_backoff_sec = Some(v);
        self
    }

    pub fn backoff_jitter_sec(mut self, v: f64) -> Self {
        self.backoff_jitter_sec = Some(v);
        self
    }

    pub fn circuit_fail_threshold(mut self, v: u32) -> Self {
        self.circuit_fail_threshold = Some(v);
        self
    }

    pub fn circuit_open_sec(mut self, v: f64) -> Self {
        self.circuit_open_sec = Some(v);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Defaults match the documented policy.
    #[test]
    fn default_policy_values() {
        let p = ToolPolicy::default();
        assert_eq!(p.timeout_sec, 45.0);
        assert_eq!(p.retries, 2);
        assert_eq!(p.base_backoff_sec, 1.0);
        assert_eq!(p.backoff_jitter_sec, 0.3);
        assert_eq!(p.circuit_fail_threshold, 3);
        assert_eq!(p.circuit_open_sec, 60.0);
    }

    /// **Scenario**: merged applies only the fields set on the override.
    #[test]
    fn merged_applies_only_set_fields() {
        let base = ToolPolicy::default();
        let merged = base.merged(&ToolPolicyOverride::default().retries(0).timeout_sec(1.5));
        assert_eq!(merged.retries, 0);
        assert_eq!(merged.timeout_sec, 1.5);
        assert_eq!(merged.base_backoff_sec, base.base_backoff_sec);
        assert_eq!(merged.circuit_fail_threshold, base.circuit_fail_threshold);
    }
}
