//! Logging initialisation.
//!
//! Structured logging goes through `tracing`; the format and filter come
//! from the environment. Metrics are emitted through the `metrics` facade;
//! attaching an exporter is the embedding application's concern.

use tracing_subscriber::EnvFilter;

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format: "pretty" or "json".
    pub format: String,
    /// Filter directive; falls back to `RUST_LOG`, then "info".
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "pretty".to_string(),
            filter: None,
        }
    }
}

impl LoggingConfig {
    /// Builds logging configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("ONTOLOOM_LOG_FORMAT") {
            config.format = v;
        }
        if let Ok(v) = std::env::var("ONTOLOOM_LOG_FILTER") {
            config.filter = Some(v);
        }
        config
    }
}

/// Initialises the global tracing subscriber.
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init(config: &LoggingConfig) {
    let filter = config.filter.as_ref().map_or_else(
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        |directive| EnvFilter::new(directive.clone()),
    );

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init(&config);
        init(&config);
    }

    #[test]
    fn test_from_env_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.format, "pretty");
        assert!(config.filter.is_none());
    }
}
