//! Configuration management for the Skirmish server.
//!
//! This module handles loading, validation, and CLI overrides of the TOML
//! configuration file.

use crate::cli::CliArgs;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use skirmish_server::ServerConfig;
use std::fs;
use std::path::Path;
use tracing::info;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Shards, quantum, auth and recovery
    pub server: ServerConfig,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Logging configuration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the specified path
    /// and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading/creation failed.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)
                .context("failed to serialize default configuration")?;
            fs::write(path, toml_content)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file settings.
    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(shards) = args.shards {
            self.server.shard_count = shards;
        }
        if let Some(quantum_ms) = args.quantum_ms {
            self.server.quantum_ms = quantum_ms;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if args.auth {
            self.server.enable_auth = true;
        }
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.server.validate()?;
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            bail!(
                "invalid log level '{}', expected one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skirmish_runtime::RecoveryPolicy;
    use tempfile::tempdir;

    #[test]
    fn test_load_from_nonexistent_file_creates_it() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = AppConfig::load_from_file(&path).unwrap();

        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
        let reloaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_load_from_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[server]
shard_count = 3
quantum_ms = 10
enable_auth = true
recovery = "retry_then_log"

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_file(&path).unwrap();

        assert_eq!(config.server.shard_count, 3);
        assert_eq!(config.server.quantum_ms, 10);
        assert!(config.server.enable_auth);
        assert_eq!(config.server.recovery, RecoveryPolicy::RetryThenLog);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json_format);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server]\nshard_count = \"two\"\n").unwrap();
        assert!(AppConfig::load_from_file(&path).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = AppConfig::default();
        let args = CliArgs::try_parse_from([
            "skirmish",
            "--shards",
            "2",
            "-q",
            "5",
            "--json-logs",
            "--auth",
        ])
        .unwrap();

        config.apply_overrides(&args);

        assert_eq!(config.server.shard_count, 2);
        assert_eq!(config.server.quantum_ms, 5);
        assert!(config.server.enable_auth);
        assert!(config.logging.json_format);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validation() {
        assert!(AppConfig::default().validate().is_ok());

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.shard_count = 0;
        assert!(config.validate().is_err());
    }
}
