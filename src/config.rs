use std::time::Duration;

use crate::event_sourcing::core::EventSigner;

// ============================================================================
// Configuration - read from TALLY_* environment variables
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { name, reason: reason.into() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Scylla,
}

#[derive(Debug, Clone)]
pub struct TallyConfig {
    pub store: StoreBackend,
    pub scylla_node: String,
    pub keyspace: String,
    /// `None` disables the metrics server
    pub metrics_port: Option<u16>,
    pub signing_key: Option<String>,
    pub command_max_attempts: u32,
    pub projection_poll_interval: Duration,
    pub log_filter: String,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::Memory,
            scylla_node: "127.0.0.1:9042".to_string(),
            keyspace: "tally_ks".to_string(),
            metrics_port: Some(9090),
            signing_key: None,
            command_max_attempts: 5,
            projection_poll_interval: Duration::from_millis(500),
            log_filter: "info,ballot_tally=debug".to_string(),
        }
    }
}

impl TallyConfig {
    /// Load configuration, falling back to the defaults for unset variables
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env` over an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(name).and_then(|v| {
                let trimmed = v.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
        };

        let mut config = Self::default();

        if let Some(store) = get("TALLY_STORE") {
            config.store = match store.to_ascii_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                "scylla" | "scylladb" => StoreBackend::Scylla,
                other => return Err(invalid("TALLY_STORE", format!("unknown backend {other:?}"))),
            };
        }
        if let Some(node) = get("TALLY_SCYLLA_NODE") {
            config.scylla_node = node;
        }
        if let Some(keyspace) = get("TALLY_KEYSPACE") {
            if !keyspace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(invalid("TALLY_KEYSPACE", "only letters, digits and '_' are allowed"));
            }
            config.keyspace = keyspace;
        }
        if let Some(port) = get("TALLY_METRICS_PORT") {
            config.metrics_port = match port.as_str() {
                "off" | "0" => None,
                value => Some(
                    value
                        .parse::<u16>()
                        .map_err(|e| invalid("TALLY_METRICS_PORT", format!("must be a u16: {e}")))?,
                ),
            };
        }
        if let Some(key) = get("TALLY_SIGNING_KEY") {
            EventSigner::from_hex(&key).map_err(|e| invalid("TALLY_SIGNING_KEY", e.to_string()))?;
            config.signing_key = Some(key);
        }
        if let Some(attempts) = get("TALLY_COMMAND_MAX_ATTEMPTS") {
            config.command_max_attempts = match attempts.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(invalid("TALLY_COMMAND_MAX_ATTEMPTS", "must be a positive integer")),
            };
        }
        if let Some(ms) = get("TALLY_PROJECTION_POLL_MS") {
            let ms = ms
                .parse::<u64>()
                .map_err(|e| invalid("TALLY_PROJECTION_POLL_MS", format!("must be a u64: {e}")))?;
            config.projection_poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(filter) = get("TALLY_LOG") {
            config.log_filter = filter;
        }

        Ok(config)
    }

    pub fn signer(&self) -> Option<EventSigner> {
        self.signing_key
            .as_deref()
            .and_then(|key| EventSigner::from_hex(key).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<TallyConfig, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        TallyConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.command_max_attempts, 5);
        assert_eq!(config.metrics_port, Some(9090));
        assert!(config.signer().is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("TALLY_STORE", "scylla"),
            ("TALLY_KEYSPACE", "tally_test"),
            ("TALLY_METRICS_PORT", "off"),
            ("TALLY_SIGNING_KEY", "00ff10"),
            ("TALLY_COMMAND_MAX_ATTEMPTS", "9"),
            ("TALLY_PROJECTION_POLL_MS", "50"),
        ])
        .unwrap();

        assert_eq!(config.store, StoreBackend::Scylla);
        assert_eq!(config.keyspace, "tally_test");
        assert_eq!(config.metrics_port, None);
        assert!(config.signer().is_some());
        assert_eq!(config.command_max_attempts, 9);
        assert_eq!(config.projection_poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        assert_eq!(load(&[("TALLY_STORE", "  ")]).unwrap().store, StoreBackend::Memory);
    }

    #[test]
    fn test_invalid_values() {
        for (name, value) in [
            ("TALLY_STORE", "postgres"),
            ("TALLY_METRICS_PORT", "99999"),
            ("TALLY_SIGNING_KEY", "not-hex"),
            ("TALLY_COMMAND_MAX_ATTEMPTS", "0"),
            ("TALLY_KEYSPACE", "drop table"),
        ] {
            let err = load(&[(name, value)]).unwrap_err();
            assert!(err.to_string().starts_with(name), "{err}");
        }
    }
}
