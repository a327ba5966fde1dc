use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize tracing logger
///
/// `RUST_LOG` overrides `log_level` when set. Fails if a global subscriber
/// is already installed.
pub fn init_logger(log_level: &str, json_logs: bool) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let installed = if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_thread_names(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()
    };

    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

/// Initialize tracing from the `logging` section of a [`Config`](crate::config::Config)
pub fn init_from_config(config: &LoggingConfig) -> anyhow::Result<()> {
    init_logger(&config.log_level, config.json_logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails_cleanly() {
        // Whichever call wins, the other must report instead of panicking
        let first = init_logger("warn", false);
        let second = init_from_config(&LoggingConfig::default());
        assert!(first.is_err() || second.is_err());
    }
}
