//! Common configuration types for mesh components.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default log directives when neither `RUST_LOG` nor `MESH_LOG_LEVEL` is set.
pub const DEFAULT_LOG_LEVEL: &str = "mesh_peer=debug,common=info";

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log directives (trace, debug, info, warn, error, or `target=level` lists)
    pub log_level: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
        }
    }
}

/// Errors raised while installing the tracing subscriber.
#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("Invalid log directives: {0}")]
    InvalidDirectives(String),

    #[error("Tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

impl ObservabilityConfig {
    /// Load from a variable map (`MESH_LOG_LEVEL`, `MESH_JSON_LOGS`).
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let log_level = vars
            .get("MESH_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let json_logs = vars
            .get("MESH_JSON_LOGS")
            .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"));

        Self {
            log_level,
            json_logs,
        }
    }

    /// Build the filter: `RUST_LOG` wins, otherwise the configured directives.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured directives do not parse.
    pub fn build_filter(&self) -> Result<EnvFilter, ObservabilityError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.log_level)
                .map_err(|e| ObservabilityError::InvalidDirectives(e.to_string())),
        }
    }

    /// Install the global tracing subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if the directives are invalid or a subscriber is
    /// already installed.
    pub fn init_tracing(&self) -> Result<(), ObservabilityError> {
        let filter = self.build_filter()?;
        let registry = tracing_subscriber::registry().with(filter);

        let result = if self.json_logs {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
        } else {
            registry.with(tracing_subscriber::fmt::layer()).try_init()
        };

        result.map_err(|e| ObservabilityError::AlreadyInstalled(e.to_string()))?;

        tracing::info!(
            target: "mesh.observability",
            json_logs = self.json_logs,
            "Tracing initialized"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_defaults() {
        let config = ObservabilityConfig::from_vars(&HashMap::new());
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_from_vars_custom() {
        let vars = HashMap::from([
            ("MESH_LOG_LEVEL".to_string(), "warn".to_string()),
            ("MESH_JSON_LOGS".to_string(), "true".to_string()),
        ]);
        let config = ObservabilityConfig::from_vars(&vars);
        assert_eq!(config.log_level, "warn");
        assert!(config.json_logs);
    }

    #[test]
    fn test_invalid_directives_rejected() {
        let config = ObservabilityConfig {
            log_level: "mesh_peer=notalevel".to_string(),
            json_logs: false,
        };
        // RUST_LOG may be set in CI; only assert when it is not.
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(
                config.build_filter(),
                Err(ObservabilityError::InvalidDirectives(_))
            ));
        }
    }
}
