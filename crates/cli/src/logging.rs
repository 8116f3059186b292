//! Log output for the command-line front end
//!
//! Logs go to stderr so command output on stdout stays machine-readable.

use std::io;

use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the CLI
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    /// Enable JSON structured logging (vs plain text)
    pub json_format: bool,
    /// Environment filter (supports directives like "taskflow_migrate=debug,sqlx=warn")
    pub env_filter: Option<String>,
}

impl LoggingConfig {
    pub fn new(level: &str) -> Self {
        Self {
            level: level.to_string(),
            json_format: false,
            env_filter: Some(format!("taskflow_migrate={},sqlx=warn", level)),
        }
    }

    pub fn json(mut self, json_format: bool) -> Self {
        self.json_format = json_format;
        self
    }
}

/// Install the global subscriber; `RUST_LOG` takes precedence over the config
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let directives = config.env_filter.as_deref().unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(directives))?;

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).with_target(false))
            .try_init()?;
    }

    tracing::debug!(
        "Logging initialized (level: {}, format: {})",
        config.level,
        if config.json_format { "JSON" } else { "text" }
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_targets_engine_crate() {
        let config = LoggingConfig::new("debug").json(true);
        assert!(config.json_format);
        assert_eq!(
            config.env_filter.as_deref(),
            Some("taskflow_migrate=debug,sqlx=warn")
        );
        assert!(EnvFilter::try_new(config.env_filter.unwrap()).is_ok());
    }
}
