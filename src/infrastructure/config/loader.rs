use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use super::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_workers: {0}. Must be between 1 and 64")]
    InvalidMaxWorkers(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Store path cannot be empty")]
    EmptyStorePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error(
        "Invalid circuit breaker durations: base_open_duration_secs ({0}) must be less than max_open_duration_secs ({1})"
    )]
    InvalidOpenDuration(u64, u64),

    #[error("Invalid stage runner max_turns: {0}. Must be at least 1")]
    InvalidMaxTurns(u32),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. `.redgreen/config.yaml` (project config)
    /// 3. `.redgreen/local.yaml` (project local overrides, optional)
    /// 4. Environment variables (`REDGREEN_*` prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".redgreen/config.yaml"))
            .merge(Yaml::file(".redgreen/local.yaml"))
            .merge(Env::prefixed("REDGREEN_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file (no env/project-dir merging).
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.worker_pool.max_workers == 0 || config.worker_pool.max_workers > 64 {
            return Err(ConfigError::InvalidMaxWorkers(config.worker_pool.max_workers));
        }

        if config.store.path.is_empty() {
            return Err(ConfigError::EmptyStorePath);
        }
        if config.store.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.store.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.circuit_breakers.base_open_duration_secs >= config.circuit_breakers.max_open_duration_secs {
            return Err(ConfigError::InvalidOpenDuration(
                config.circuit_breakers.base_open_duration_secs,
                config.circuit_breakers.max_open_duration_secs,
            ));
        }

        if config.lm_stage_runner.red_green_max_turns == 0 || config.lm_stage_runner.verify_max_turns == 0 {
            return Err(ConfigError::InvalidMaxTurns(0));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.worker_pool.max_workers, 4);
        assert_eq!(config.store.path, ".redgreen/state.db");
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn yaml_parsing_merges_over_defaults() {
        let yaml = r"
worker_pool:
  max_workers: 8
store:
  path: /custom/path.db
  max_connections: 5
logging:
  level: debug
  format: pretty
  retention_days: 7
";
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::string(yaml))
            .extract()
            .expect("yaml should merge over defaults");

        assert_eq!(config.worker_pool.max_workers, 8);
        assert_eq!(config.store.path, "/custom/path.db");
        assert_eq!(config.store.max_connections, 5);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.logging.retention_days, 7);
        ConfigLoader::validate(&config).expect("parsed config should be valid");
    }

    #[test]
    fn validate_rejects_zero_max_workers() {
        let mut config = Config::default();
        config.worker_pool.max_workers = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMaxWorkers(0))));
    }

    #[test]
    fn validate_rejects_max_workers_above_64() {
        let mut config = Config::default();
        config.worker_pool.max_workers = 65;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMaxWorkers(65))));
    }

    #[test]
    fn validate_rejects_empty_store_path() {
        let mut config = Config::default();
        config.store.path = String::new();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyStorePath)));
    }

    #[test]
    fn validate_rejects_zero_max_connections() {
        let mut config = Config::default();
        config.store.max_connections = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMaxConnections(0))));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogLevel(level)) => assert_eq!(level, "invalid"),
            other => panic!("expected InvalidLogLevel, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogFormat(format)) => assert_eq!(format, "xml"),
            other => panic!("expected InvalidLogFormat, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_base_duration_not_less_than_max() {
        let mut config = Config::default();
        config.circuit_breakers.base_open_duration_secs = 600;
        config.circuit_breakers.max_open_duration_secs = 600;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidOpenDuration(600, 600))
        ));
    }

    #[test]
    fn validate_rejects_zero_max_turns() {
        let mut config = Config::default();
        config.lm_stage_runner.red_green_max_turns = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMaxTurns(0))));
    }

    #[test]
    fn hierarchical_merging_lets_override_file_win() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(base_file, "worker_pool:\n  max_workers: 2\nlogging:\n  level: info\n  format: json").unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "worker_pool:\n  max_workers: 6\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.worker_pool.max_workers, 6, "override file should win");
        assert_eq!(config.logging.level, "debug", "override should win for nested fields");
        assert_eq!(config.logging.format, "json", "base value should persist when not overridden");
    }

    #[test]
    fn env_prefix_overrides_nested_fields() {
        use figment::Jail;

        Jail::expect_with(|jail| {
            jail.set_env("REDGREEN_WORKER_POOL__MAX_WORKERS", "12");
            jail.set_env("REDGREEN_LOGGING__LEVEL", "debug");

            let config: Config = Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Env::prefixed("REDGREEN_").split("__"))
                .extract()
                .unwrap();

            assert_eq!(config.worker_pool.max_workers, 12);
            assert_eq!(config.logging.level, "debug");
            Ok(())
        });
    }
}
