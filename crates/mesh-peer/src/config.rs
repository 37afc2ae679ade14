//! Mesh peer configuration.
//!
//! Configuration is loaded from environment variables; `from_vars` takes an
//! explicit map so tests never touch the process environment.

use common::config::ObservabilityConfig;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default ICE server used for negotiation and address discovery.
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Default address probe timeout in milliseconds.
pub const DEFAULT_ADDRESS_PROBE_TIMEOUT_MS: u64 = 5000;

/// Default negotiation timeout in seconds (0 disables).
pub const DEFAULT_NEGOTIATION_TIMEOUT_SECONDS: u64 = 30;

/// Default inbound relay buffer (messages).
pub const DEFAULT_RELAY_BUFFER: usize = 256;

/// Mesh peer configuration.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Address of the coordinating process's relay endpoint.
    pub relay_address: String,

    /// ICE server URLs handed to the negotiation engine.
    pub ice_servers: Vec<String>,

    /// Upper bound on address discovery. On expiry the address is empty.
    pub address_probe_timeout: Duration,

    /// Upper bound for a connection to reach `Connected`; `None` disables.
    pub negotiation_timeout: Option<Duration>,

    /// Capacity of the inbound relay channel.
    pub relay_buffer: usize,

    /// Logging configuration.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl PeerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let relay_address = vars
            .get("MESH_RELAY_ADDRESS")
            .ok_or_else(|| ConfigError::MissingEnvVar("MESH_RELAY_ADDRESS".to_string()))?
            .clone();

        let ice_servers: Vec<String> = vars
            .get("MESH_ICE_SERVERS")
            .map_or_else(
                || vec![DEFAULT_ICE_SERVER.to_string()],
                |raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(with_ice_scheme)
                        .collect()
                },
            );

        if ice_servers.is_empty() {
            return Err(ConfigError::InvalidValue(
                "MESH_ICE_SERVERS must list at least one server".to_string(),
            ));
        }

        let address_probe_timeout = Duration::from_millis(
            vars.get("MESH_ADDRESS_PROBE_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_ADDRESS_PROBE_TIMEOUT_MS),
        );

        let negotiation_timeout_seconds = vars
            .get("MESH_NEGOTIATION_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_NEGOTIATION_TIMEOUT_SECONDS);
        let negotiation_timeout =
            (negotiation_timeout_seconds > 0).then(|| Duration::from_secs(negotiation_timeout_seconds));

        let relay_buffer = vars
            .get("MESH_RELAY_BUFFER")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RELAY_BUFFER);

        // tokio channels panic on zero capacity
        if relay_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "MESH_RELAY_BUFFER must be greater than zero".to_string(),
            ));
        }

        Ok(PeerConfig {
            relay_address,
            ice_servers,
            address_probe_timeout,
            negotiation_timeout,
            relay_buffer,
            observability: ObservabilityConfig::from_vars(vars),
        })
    }
}

/// Prefix a bare `host:port` with `stun:` unless it already names a scheme.
fn with_ice_scheme(url: &str) -> String {
    if url.starts_with("stun:") || url.starts_with("stuns:") || url.starts_with("turn:") || url.starts_with("turns:") {
        url.to_string()
    } else {
        format!("stun:{url}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "MESH_RELAY_ADDRESS".to_string(),
            "127.0.0.1:8080".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = PeerConfig::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.relay_address, "127.0.0.1:8080");
        assert_eq!(config.ice_servers, vec![DEFAULT_ICE_SERVER.to_string()]);
        assert_eq!(
            config.address_probe_timeout,
            Duration::from_millis(DEFAULT_ADDRESS_PROBE_TIMEOUT_MS)
        );
        assert_eq!(
            config.negotiation_timeout,
            Some(Duration::from_secs(DEFAULT_NEGOTIATION_TIMEOUT_SECONDS))
        );
        assert_eq!(config.relay_buffer, DEFAULT_RELAY_BUFFER);
        assert!(!config.observability.json_logs);
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert(
            "MESH_ICE_SERVERS".to_string(),
            "stun.example.org:3478, turn:turn.example.org:3478".to_string(),
        );
        vars.insert("MESH_ADDRESS_PROBE_TIMEOUT_MS".to_string(), "250".to_string());
        vars.insert("MESH_NEGOTIATION_TIMEOUT_SECONDS".to_string(), "0".to_string());
        vars.insert("MESH_RELAY_BUFFER".to_string(), "16".to_string());
        vars.insert("MESH_JSON_LOGS".to_string(), "1".to_string());

        let config = PeerConfig::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(
            config.ice_servers,
            vec![
                "stun:stun.example.org:3478".to_string(),
                "turn:turn.example.org:3478".to_string()
            ]
        );
        assert_eq!(config.address_probe_timeout, Duration::from_millis(250));
        assert_eq!(config.negotiation_timeout, None);
        assert_eq!(config.relay_buffer, 16);
        assert!(config.observability.json_logs);
    }

    #[test]
    fn test_from_vars_missing_relay_address() {
        let result = PeerConfig::from_vars(&HashMap::new());
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "MESH_RELAY_ADDRESS"));
    }

    #[test]
    fn test_from_vars_rejects_empty_ice_servers() {
        let mut vars = base_vars();
        vars.insert("MESH_ICE_SERVERS".to_string(), " , ".to_string());

        let result = PeerConfig::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_from_vars_rejects_zero_relay_buffer() {
        let mut vars = base_vars();
        vars.insert("MESH_RELAY_BUFFER".to_string(), "0".to_string());

        let result = PeerConfig::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_unparseable_numbers_fall_back_to_defaults() {
        let mut vars = base_vars();
        vars.insert("MESH_ADDRESS_PROBE_TIMEOUT_MS".to_string(), "soon".to_string());

        let config = PeerConfig::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(
            config.address_probe_timeout,
            Duration::from_millis(DEFAULT_ADDRESS_PROBE_TIMEOUT_MS)
        );
    }
}
