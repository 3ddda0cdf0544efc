//! File + environment-variable loading, mirroring `fc-config::loader`'s
//! search-path-then-env-override shape.

use crate::{CatgaConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &["catga.toml", "config/catga.toml", "/etc/catga/catga.toml"];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self { config_path: Some(path.into()) }
    }

    pub fn load(&self) -> Result<CatgaConfig, ConfigError> {
        let mut config = CatgaConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "loading configuration from file");
            config = CatgaConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("CATGA_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut CatgaConfig) {
        if let Ok(val) = env::var("CATGA_SERIALIZER") {
            config.serializer = val;
        }

        if let Ok(val) = env::var("CATGA_IDEMPOTENCY_TTL_SECS") {
            if let Ok(v) = val.parse() {
                config.idempotency.ttl_secs = v;
            }
        }
        if let Ok(val) = env::var("CATGA_IDEMPOTENCY_SHARD_COUNT") {
            if let Ok(v) = val.parse() {
                config.idempotency.shard_count = v;
            }
        }

        if let Ok(val) = env::var("CATGA_OUTBOX_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                config.outbox.batch_size = v;
            }
        }
        if let Ok(val) = env::var("CATGA_OUTBOX_LEASE_DURATION_SECS") {
            if let Ok(v) = val.parse() {
                config.outbox.lease_duration_secs = v;
            }
        }
        if let Ok(val) = env::var("CATGA_OUTBOX_PUBLISH_INTERVAL_MS") {
            if let Ok(v) = val.parse() {
                config.outbox.publish_interval_ms = v;
            }
        }

        if let Ok(val) = env::var("CATGA_CIRCUIT_FAILURE_THRESHOLD") {
            if let Ok(v) = val.parse() {
                config.circuit.failure_threshold = v;
            }
        }
        if let Ok(val) = env::var("CATGA_CIRCUIT_OPEN_DURATION_SECS") {
            if let Ok(v) = val.parse() {
                config.circuit.open_duration_secs = v;
            }
        }

        if let Ok(val) = env::var("CATGA_RETRY_MAX_ATTEMPTS") {
            if let Ok(v) = val.parse() {
                config.retry.max_attempts = v;
            }
        }
        if let Ok(val) = env::var("CATGA_RETRY_BASE_DELAY_MS") {
            if let Ok(v) = val.parse() {
                config.retry.base_delay_ms = v;
            }
        }
        if let Ok(val) = env::var("CATGA_RETRY_MAX_DELAY_MS") {
            if let Ok(v) = val.parse() {
                config.retry.max_delay_ms = v;
            }
        }
        if let Ok(val) = env::var("CATGA_RETRY_JITTER") {
            config.retry.jitter = val.parse().unwrap_or(true);
        }

        if let Ok(val) = env::var("CATGA_BULKHEAD_MAX_CONCURRENCY") {
            if let Ok(v) = val.parse() {
                config.bulkhead.max_concurrency = v;
            }
        }
        if let Ok(val) = env::var("CATGA_BULKHEAD_QUEUE_LIMIT") {
            if let Ok(v) = val.parse() {
                config.bulkhead.queue_limit = v;
            }
        }

        if let Ok(val) = env::var("CATGA_FLOW_TIMEOUT_SWEEP_INTERVAL_SECS") {
            if let Ok(v) = val.parse() {
                config.flow.timeout_sweep_interval_secs = v;
            }
        }
        if let Ok(val) = env::var("CATGA_FLOW_MAX_FOREACH_CONCURRENCY") {
            if let Ok(v) = val.parse() {
                config.flow.max_foreach_concurrency = v;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn with_path_loads_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "serializer = \"protobuf\"").unwrap();
        let config = ConfigLoader::with_path(file.path()).load().unwrap();
        assert_eq!(config.serializer, "protobuf");
    }

    #[test]
    fn env_override_wins_over_file_value() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "serializer = \"protobuf\"").unwrap();
        env::set_var("CATGA_SERIALIZER", "json");
        let config = ConfigLoader::with_path(file.path()).load().unwrap();
        env::remove_var("CATGA_SERIALIZER");
        assert_eq!(config.serializer, "json");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ConfigLoader::with_path("/nonexistent/catga.toml").load().unwrap();
        assert_eq!(config.serializer, "json");
    }
}
