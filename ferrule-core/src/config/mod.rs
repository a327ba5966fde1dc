pub mod constants;
pub mod types;

pub use constants::*;
pub use types::*;

use ::config::{Config as ConfigLoader, Environment, File};
use anyhow::{Context, Result};
use std::path::Path;

impl Config {
    /// Load configuration from file with environment variable overrides
    ///
    /// The format follows the file extension (JSON, TOML, YAML, ...).
    /// Variables named `FERRULE__<SECTION>__<FIELD>` override file values.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_path = path.as_ref();

        let config = ConfigLoader::builder()
            .add_source(File::from(config_path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load config file {}", config_path.display()))?;

        let cfg: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Parse configuration from a JSON string; omitted fields take defaults
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let cfg: Config =
            serde_json::from_str(raw).context("Failed to deserialize configuration")?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.worker_pool.validate()?;
        self.monitor.validate()?;

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}', must be one of: {:?}",
                self.logging.log_level,
                valid_log_levels
            );
        }

        Ok(())
    }
}

impl WorkerPoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            anyhow::bail!("num_workers must be at least 1");
        }

        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be positive");
        }

        // next_power_of_two would overflow past this
        if self.queue_capacity > (usize::MAX >> 1) + 1 {
            anyhow::bail!("queue_capacity {} is too large", self.queue_capacity);
        }

        if self.thread_name_prefix.is_empty() {
            anyhow::bail!("thread_name_prefix must not be empty");
        }

        Ok(())
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_samples < 2 {
            anyhow::bail!("max_samples must be at least 2, got {}", self.max_samples);
        }

        if !(0.0..=1.0).contains(&self.tail_percentile) {
            anyhow::bail!(
                "tail_percentile must be within [0.0, 1.0], got {}",
                self.tail_percentile
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_pool.num_workers, DEFAULT_NUM_WORKERS);
        assert_eq!(config.worker_pool.shutdown_policy, ShutdownPolicy::Drain);
        assert_eq!(config.monitor.max_samples, DEFAULT_MAX_LATENCY_SAMPLES);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config = Config::from_json_str(
            r#"{
                "worker_pool": { "num_workers": 2, "shutdown_policy": "abandon" },
                "logging": { "log_level": "debug", "json_logs": true }
            }"#,
        )
        .unwrap();

        assert_eq!(config.worker_pool.num_workers, 2);
        assert_eq!(config.worker_pool.shutdown_policy, ShutdownPolicy::Abandon);
        assert_eq!(
            config.worker_pool.queue_capacity,
            DEFAULT_TASK_QUEUE_CAPACITY
        );
        assert_eq!(config.logging.log_level, "debug");
        assert!(config.logging.json_logs);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.worker_pool.num_workers = 0;
        assert!(config.validate().is_err());
        config.worker_pool.num_workers = 4;

        config.worker_pool.queue_capacity = 0;
        assert!(config.validate().is_err());
        config.worker_pool.queue_capacity = 1024;

        config.monitor.tail_percentile = 1.5;
        assert!(config.validate().is_err());
        config.monitor.tail_percentile = 0.99;

        config.monitor.max_samples = 1;
        assert!(config.validate().is_err());
        config.monitor.max_samples = 1000;

        config.logging.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
        config.logging.log_level = "warn".to_string();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_shutdown_policy_rejected() {
        let result = Config::from_json_str(r#"{ "worker_pool": { "shutdown_policy": "later" } }"#);
        assert!(result.is_err());
    }
}
