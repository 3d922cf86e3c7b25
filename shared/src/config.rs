//! Configuration types loaded from `orchestrator.toml` (§4.2, §4.3, §4.5, §4.7)
//!
//! Mirrors the grounding project's split between a small top-level config
//! struct and nested per-concern structs, validated once at load time rather
//! than scattered through the code that consumes them.

use crate::defaults::*;
use crate::model::{Priority, TaskCategory};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-model fixed-window rate limit, seeded into the store on first run if
/// the `rate_limits` table is empty (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// Opaque provider-qualified key, e.g. `anthropic/claude-sonnet`.
    pub key: String,
    pub max_requests: u32,
    #[serde(default = "default_window_duration_ms")]
    pub window_duration_ms: u64,
    /// HTTP endpoint for this model. `None` falls back to
    /// `backend.local_fallback_url`; if that is also absent the backend
    /// invoker reports `NotConfigured` (§4.6).
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Scheduler priority weights (§4.5). Defaults match the spec's defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriorityWeights {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl PriorityWeights {
    pub fn weight(&self, priority: Priority) -> u32 {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

/// Backend invocation settings (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Loopback endpoint used as the last-resort local fallback target.
    #[serde(default)]
    pub local_fallback_url: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_backend_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            local_fallback_url: None,
        }
    }
}

/// Executor daemon lifecycle settings (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_graceful_shutdown_timeout_ms")]
    pub graceful_shutdown_timeout_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Base delay for a retried task's exponential backoff (§4.8).
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,
    /// Cap on a retried task's exponential backoff (§4.8).
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            graceful_shutdown_timeout_ms: default_graceful_shutdown_timeout_ms(),
            max_concurrent: default_max_concurrent(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
        }
    }
}

/// Store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

/// Gateway / secure-action boundary settings (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    #[serde(default = "default_secure_action_port")]
    pub secure_action_port: u16,
}

fn default_gateway_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_gateway_bind(),
            secure_action_port: default_secure_action_port(),
        }
    }
}

/// Top-level configuration, loaded from `orchestrator.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Rate-limited model endpoints, keyed by model key on load.
    pub models: Vec<ModelConfig>,
    /// Ordered candidate model list per category.
    pub routing: HashMap<TaskCategory, Vec<String>>,
    #[serde(default)]
    pub priority_weights: Option<PriorityWeightsConfig>,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Raw form of `PriorityWeights` as it appears in TOML, kept separate so
/// `Default` for the resolved weights can live in `defaults.rs`.
pub type PriorityWeightsConfig = PriorityWeights;

impl OrchestratorConfig {
    pub fn priority_weights(&self) -> PriorityWeights {
        self.priority_weights
            .clone()
            .unwrap_or_else(default_priority_weights)
    }

    /// Validates the loaded config, matching the grounding project's
    /// "validation error" startup failure mode: duplicate model keys,
    /// non-positive windows, and empty category tables are all rejected
    /// before the orchestrator does any work.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for model in &self.models {
            if !seen.insert(model.key.clone()) {
                return Err(format!("duplicate model key in config: {}", model.key));
            }
            if model.window_duration_ms == 0 {
                return Err(format!(
                    "model '{}' has a zero-length rate window",
                    model.key
                ));
            }
        }

        for category in TaskCategory::ALL {
            let Some(candidates) = self.routing.get(&category) else {
                return Err(format!("no routing entry for category '{category}'"));
            };
            if candidates.is_empty() {
                return Err(format!("empty candidate list for category '{category}'"));
            }
            for model_key in candidates {
                if !self.models.iter().any(|m| &m.key == model_key) {
                    return Err(format!(
                        "routing table references unknown model '{model_key}' for category '{category}'"
                    ));
                }
            }
        }

        Ok(())
    }
}
