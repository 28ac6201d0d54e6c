//! Configuration management infrastructure.
//!
//! Hierarchical configuration using figment: programmatic defaults -> project
//! YAML -> environment variables. See `loader` for the merge order.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: ".redgreen/state.db".to_string(), max_connections: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub max_workers: u32,
    pub invocation_budget: u64,
    pub claim_timeout_secs: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { max_workers: 4, invocation_budget: 500, claim_timeout_secs: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub stage_failure_threshold: u32,
    pub stage_success_threshold: u32,
    pub worker_failure_threshold: u32,
    pub worker_success_threshold: u32,
    pub system_failure_threshold: u32,
    pub system_success_threshold: u32,
    pub base_open_duration_secs: u64,
    pub max_open_duration_secs: u64,
    pub flap_window_secs: u64,
    pub flap_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            stage_failure_threshold: 5,
            stage_success_threshold: 2,
            worker_failure_threshold: 3,
            worker_success_threshold: 2,
            system_failure_threshold: 10,
            system_success_threshold: 3,
            base_open_duration_secs: 30,
            max_open_duration_secs: 600,
            flap_window_secs: 300,
            flap_threshold: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_secs: 15, timeout_secs: 90 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LmStageRunnerConfig {
    pub executable: String,
    pub red_green_max_turns: u32,
    pub verify_max_turns: u32,
    pub default_timeout_secs: u64,
}

impl Default for LmStageRunnerConfig {
    fn default() -> Self {
        Self {
            executable: "claude".to_string(),
            red_green_max_turns: 25,
            verify_max_turns: 10,
            default_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerifierToolConfig {
    pub venv_dir: String,
}

impl Default for VerifierToolConfig {
    fn default() -> Self {
        Self { venv_dir: ".venv".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecompositionConfig {
    pub enforce_integration_boundaries: bool,
    pub integration_keywords: Vec<String>,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            enforce_integration_boundaries: true,
            integration_keywords: vec![
                "/api/".to_string(),
                "/routes/".to_string(),
                "database".to_string(),
                "db_".to_string(),
                "_db".to_string(),
                "repository".to_string(),
                "handler".to_string(),
                "endpoint".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub retention_days: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string(), retention_days: 14 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub worker_pool: WorkerPoolConfig,
    pub circuit_breakers: CircuitBreakerConfig,
    pub heartbeat: HeartbeatConfig,
    pub lm_stage_runner: LmStageRunnerConfig,
    pub verifier_tools: VerifierToolConfig,
    pub decomposition: DecompositionConfig,
    pub logging: LoggingConfig,
}
