//! Environment-driven configuration.
//!
//! Resolution per value: explicit setter on the builder, then environment
//! variable, then default. A missing document store is never an error; the
//! system runs in-memory only.

use crate::bridge::{ToolPolicy, DEFAULT_MAX_WORKERS};

/// Runtime configuration for [`TripPlanner`](crate::TripPlanner).
#[derive(Debug, Clone)]
pub struct TripweaveConfig {
    /// Path of the SQLite document store file. `None` disables persistence.
    pub store_path: Option<String>,
    /// Shared worker-pool size for the tool bridge.
    pub max_workers: usize,
    /// Default per-tool policy; individual tools can still override.
    pub default_policy: ToolPolicy,
    /// Advisory request deadline applied to every request unless the request
    /// carries its own.
    pub sla_seconds: Option<f64>,
}

impl Default for TripweaveConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            max_workers: DEFAULT_MAX_WORKERS,
            default_policy: ToolPolicy::default(),
            sla_seconds: None,
        }
    }
}

impl TripweaveConfig {
    /// Loads configuration from the environment (`.env` honored):
    /// `TRIPWEAVE_STORE_PATH`, `TRIPWEAVE_MAX_WORKERS`,
    /// `TRIPWEAVE_TOOL_TIMEOUT_SEC`, `TRIPWEAVE_TOOL_RETRIES`,
    /// `TRIPWEAVE_SLA_SECONDS`.
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        let mut config = Self::default();

        if let Ok(path) = std::env::var("TRIPWEAVE_STORE_PATH") {
            if !path.is_empty() {
                config.store_path = Some(path);
            }
        }
        if let Some(workers) = read_env("TRIPWEAVE_MAX_WORKERS") {
            config.max_workers = workers;
        }
        if let Some(timeout) = read_env("TRIPWEAVE_TOOL_TIMEOUT_SEC") {
            config.default_policy.timeout_sec = timeout;
        }
        if let Some(retries) = read_env("TRIPWEAVE_TOOL_RETRIES") {
            config.default_policy.retries = retries;
        }
        if let Some(sla) = read_env("TRIPWEAVE_SLA_SECONDS") {
            config.sla_seconds = Some(sla);
        }
        config
    }

    pub fn with_store_path(mut self, path: impl Into<String>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn with_sla_seconds(mut self, sla: f64) -> Self {
        self.sla_seconds = Some(sla);
        self
    }
}

fn read_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
