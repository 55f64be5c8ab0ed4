use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

// Import logging macros
use crate::{log_system_event, log_validation};

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub study: StudyConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Where the catalog and its images live
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Study session defaults
#[derive(Debug, Clone, Deserialize)]
pub struct StudyConfig {
    pub shuffle: bool,
    /// Live sessions untouched for this long are dropped when a new one starts
    pub session_idle_minutes: u64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Logging system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("Invalid {} value: '{}'. Expected true or false", key, raw)),
        },
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        log_system_event!(config, "Loading application configuration");

        let config = Config {
            storage: StorageConfig::from_lookup(&lookup)?,
            study: StudyConfig::from_lookup(&lookup)?,
            server: ServerConfig::from_lookup(&lookup)?,
            logging: LoggingConfig::from_lookup(&lookup)?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    fn log_configuration_summary(&self) {
        info!(
            data_dir = %self.storage.data_dir.display(),
            shuffle = self.study.shuffle,
            session_idle_minutes = self.study.session_idle_minutes,
            server_address = %self.server.address(),
            log_level = %self.logging.level,
            "Configuration summary"
        );
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.storage.data_dir.as_os_str().is_empty() {
            let error = anyhow!("DATA_DIR cannot be empty");
            log_validation!(failure, "configuration", error = error);
            return Err(error);
        }

        if self.server.port == 0 {
            let error = anyhow!("Server port must be greater than 0");
            log_validation!(failure, "configuration", error = error);
            return Err(error);
        }

        let base_level = self.logging.level.split(',').next().unwrap_or_default();
        if !["trace", "debug", "info", "warn", "error"].contains(&base_level.to_lowercase().as_str()) {
            warn!("Invalid log level '{}', using 'info' as fallback", self.logging.level);
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl StorageConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = lookup("DATA_DIR").unwrap_or_else(|| "flashcard_data".to_string());
        Ok(StorageConfig {
            data_dir: PathBuf::from(data_dir.trim()),
        })
    }
}

impl StudyConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let idle_str = lookup("SESSION_IDLE_MINUTES").unwrap_or_else(|| "120".to_string());
        let session_idle_minutes = idle_str.trim().parse::<u64>().map_err(|_| {
            anyhow!("Invalid SESSION_IDLE_MINUTES value: '{}'. Must be a whole number", idle_str)
        })?;

        Ok(StudyConfig {
            shuffle: parse_flag(lookup, "STUDY_SHUFFLE", false)?,
            session_idle_minutes,
        })
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_minutes.saturating_mul(60))
    }
}

impl ServerConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port_str = lookup("PORT").unwrap_or_else(|| "3000".to_string());

        let port = port_str.parse::<u16>().map_err(|_| {
            anyhow!("Invalid PORT value: '{}'. Must be a number between 1-65535", port_str)
        })?;

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        Ok(ServerConfig { port, host })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl LoggingConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let level = lookup("RUST_LOG").unwrap_or_else(|| "info,flashcard_studio=debug".to_string());

        let file_enabled = parse_flag(lookup, "LOG_FILE_ENABLED", true).unwrap_or(true);
        let console_enabled = parse_flag(lookup, "LOG_CONSOLE_ENABLED", true).unwrap_or(true);

        let log_directory = lookup("LOG_DIRECTORY").unwrap_or_else(|| "logs".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("flashcard_data"));
        assert!(!config.study.shuffle);
        assert_eq!(config.study.session_idle(), Duration::from_secs(2 * 60 * 60));
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.logging.level, "info,flashcard_studio=debug");
        assert!(config.logging.file_enabled);
        assert!(config.logging.console_enabled);
        assert_eq!(config.logging.log_directory, "logs");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATA_DIR", "/tmp/cards"),
            ("STUDY_SHUFFLE", "yes"),
            ("SESSION_IDLE_MINUTES", "15"),
            ("PORT", "8080"),
            ("HOST", "127.0.0.1"),
            ("LOG_FILE_ENABLED", "false"),
        ]))
        .unwrap();

        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/cards"));
        assert!(config.study.shuffle);
        assert_eq!(config.study.session_idle_minutes, 15);
        assert_eq!(config.server.address(), "127.0.0.1:8080");
        assert!(!config.logging.file_enabled);
    }

    #[test]
    fn test_invalid_values() {
        assert!(Config::from_lookup(lookup_from(&[("PORT", "not-a-number")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("STUDY_SHUFFLE", "sometimes")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("SESSION_IDLE_MINUTES", "-5")])).is_err());
    }

    #[test]
    fn test_config_validation() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();

        let mut invalid_config = config.clone();
        invalid_config.server.port = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.storage.data_dir = PathBuf::new();
        assert!(invalid_config.validate().is_err());

        let mut odd_level = config;
        odd_level.logging.level = "verbose".to_string();
        assert!(odd_level.validate().is_ok());
    }
}
