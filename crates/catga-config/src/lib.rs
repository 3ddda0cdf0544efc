//! Configuration system (spec §6), grounded on `fc-config`'s TOML file
//! + environment-variable-override loading, trimmed to the option set
//! the spec actually names: `serializer`, `idempotency`, `outbox`,
//! `circuit`, `retry`, `bulkhead`, `flow`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Root Catga configuration (spec §6 "Configuration knobs").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatgaConfig {
    /// Which serializer the mediator/transport/outbox use for message
    /// bodies. The core only consumes an abstract serializer interface
    /// (spec §1 Non-goals); this is just the name the composition root
    /// picks a concrete implementation from.
    pub serializer: String,
    pub idempotency: IdempotencyConfig,
    pub outbox: OutboxConfig,
    pub circuit: CircuitConfig,
    pub retry: RetryConfig,
    pub bulkhead: BulkheadConfig,
    pub flow: FlowConfig,
}

impl Default for CatgaConfig {
    fn default() -> Self {
        Self {
            serializer: "json".to_string(),
            idempotency: IdempotencyConfig::default(),
            outbox: OutboxConfig::default(),
            circuit: CircuitConfig::default(),
            retry: RetryConfig::default(),
            bulkhead: BulkheadConfig::default(),
            flow: FlowConfig::default(),
        }
    }
}

/// spec §6 `idempotency.ttl`, `idempotency.shardCount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub ttl_secs: u64,
    pub shard_count: u32,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self { ttl_secs: 86400, shard_count: 16 }
    }
}

/// spec §6 `outbox.batchSize`, `outbox.leaseDuration`, `outbox.publishInterval`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub batch_size: u32,
    pub lease_duration_secs: u64,
    pub publish_interval_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self { batch_size: 50, lease_duration_secs: 30, publish_interval_ms: 100 }
    }
}

/// spec §6 `circuit.failureThreshold`, `circuit.openDuration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub open_duration_secs: u64,
    pub half_open_trial_permits: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, open_duration_secs: 30, half_open_trial_permits: 1 }
    }
}

/// spec §6 `retry.maxAttempts`, `retry.baseDelay`, `retry.maxDelay`, `retry.jitter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 100, max_delay_ms: 5000, jitter: true }
    }
}

/// spec §6 `bulkhead.maxConcurrency`, `bulkhead.queueLimit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadConfig {
    pub max_concurrency: u32,
    pub queue_limit: u32,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrency: 100, queue_limit: 50 }
    }
}

/// spec §6 `flow.timeoutSweepInterval`, `flow.maxForeachConcurrency`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub timeout_sweep_interval_secs: u64,
    pub max_foreach_concurrency: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self { timeout_sweep_interval_secs: 10, max_foreach_concurrency: 4 }
    }
}

impl CatgaConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration with environment variable overrides (spec §6).
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    pub fn example_toml() -> String {
        r#"# Catga configuration.
# Environment variables prefixed CATGA_ override these settings.

serializer = "json"

[idempotency]
ttl_secs = 86400
shard_count = 16

[outbox]
batch_size = 50
lease_duration_secs = 30
publish_interval_ms = 100

[circuit]
failure_threshold = 5
open_duration_secs = 30
half_open_trial_permits = 1

[retry]
max_attempts = 3
base_delay_ms = 100
max_delay_ms = 5000
jitter = true

[bulkhead]
max_concurrency = 100
queue_limit = 50

[flow]
timeout_sweep_interval_secs = 10
max_foreach_concurrency = 4
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_example_values() {
        let config = CatgaConfig::default();
        assert_eq!(config.serializer, "json");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.flow.max_foreach_concurrency, 4);
    }

    #[test]
    fn example_toml_round_trips_into_identical_config() {
        let toml_str = CatgaConfig::example_toml();
        let parsed: CatgaConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.outbox.batch_size, 50);
        assert_eq!(parsed.circuit.open_duration_secs, 30);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults_for_missing_sections() {
        let parsed: CatgaConfig = toml::from_str(r#"serializer = "protobuf""#).unwrap();
        assert_eq!(parsed.serializer, "protobuf");
        assert_eq!(parsed.retry.max_attempts, 3);
    }
}
