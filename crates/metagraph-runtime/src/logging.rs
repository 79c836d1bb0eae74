//! Logging setup.
//!
//! Installs a `tracing-subscriber` fmt subscriber filtered by an
//! [`EnvFilter`]. The first successful [`init`] wins; later calls are
//! no-ops, so tests and embedders can call it freely.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::RuntimeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `info,metagraph_compiler=debug`.
    pub filter: String,
    /// One JSON object per event instead of human-readable lines.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Read `METAGRAPH_LOG` and `METAGRAPH_LOG_JSON`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = LogConfig::default();
        if let Some(filter) = lookup("METAGRAPH_LOG").filter(|f| !f.trim().is_empty()) {
            config.filter = filter;
        }
        if let Some(json) = lookup("METAGRAPH_LOG_JSON") {
            config.json = matches!(json.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        config
    }
}

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber once.
///
/// A subscriber installed by someone else is left in place.
pub fn init(config: &LogConfig) -> Result<(), RuntimeError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| RuntimeError::config("METAGRAPH_LOG", e.to_string()))?;
    let builder = fmt().with_env_filter(filter);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "global subscriber already set");
    }
    let _ = INSTALLED.set(());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_filter_and_format() {
        let config = LogConfig::from_lookup(|key| match key {
            "METAGRAPH_LOG" => Some("debug".to_string()),
            "METAGRAPH_LOG_JSON" => Some("TRUE".to_string()),
            _ => None,
        });
        assert_eq!(config.filter, "debug");
        assert!(config.json);
    }

    #[test]
    fn blank_filter_keeps_default() {
        let config = LogConfig::from_lookup(|key| (key == "METAGRAPH_LOG").then(|| " ".to_string()));
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn init_is_idempotent() {
        let config = LogConfig::default();
        init(&config).unwrap();
        init(&config).unwrap();
        init(&LogConfig {
            json: true,
            ..LogConfig::default()
        })
        .unwrap();
    }
}
