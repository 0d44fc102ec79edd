//! Server configuration types and defaults.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use skirmish_runtime::RecoveryPolicy;
use std::time::Duration;

/// Configuration structure for the dispatch server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Number of event loops, each on its own thread
    pub shard_count: usize,

    /// Wall-clock budget of one session tick, in milliseconds
    pub quantum_ms: u64,

    /// Whether routed messages are checked by the `Auth.Strategy` authorizer
    pub enable_auth: bool,

    /// How failed commands are recovered when no specific handler is registered
    pub recovery: RecoveryPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shard_count: num_cpus::get().max(1),
            quantum_ms: 50,
            enable_auth: false,
            recovery: RecoveryPolicy::default(),
        }
    }
}

impl ServerConfig {
    pub fn quantum(&self) -> Duration {
        Duration::from_millis(self.quantum_ms)
    }

    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.shard_count == 0 {
            return Err(ServerError::InvalidConfig(
                "shard_count must be at least 1".to_string(),
            ));
        }
        if self.quantum_ms == 0 {
            return Err(ServerError::InvalidConfig(
                "quantum_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(config.shard_count >= 1);
        assert_eq!(config.quantum_ms, 50);
        assert_eq!(config.quantum(), Duration::from_millis(50));
        assert!(!config.enable_auth);
        assert_eq!(config.recovery, RecoveryPolicy::RetryTwiceThenLog);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ServerConfig {
            shard_count: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ServerError::InvalidConfig(_))));

        config.shard_count = 2;
        config.quantum_ms = 0;
        assert!(matches!(config.validate(), Err(ServerError::InvalidConfig(_))));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ServerConfig = serde_json::from_str(r#"{"shard_count": 3}"#).unwrap();
        assert_eq!(config.shard_count, 3);
        assert_eq!(config.quantum_ms, 50);
    }
}
