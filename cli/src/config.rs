use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::env;

/// Application configuration: store location, logging, command deadline.
/// The workflow definition is separate (`.sharkconfig.toml`); this covers
/// the tool's own knobs.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub command: CommandConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DatabaseConfig {
    /// Optional store URL. Defaults to `.shark/shark.sqlite` in the working
    /// directory.
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json, compact)
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CommandConfig {
    /// Per-command deadline in seconds
    pub deadline_secs: u64,
}

impl Config {
    /// Load configuration: compiled defaults, then an optional `shark.toml`
    /// (or `SHARK_CONFIG` path), then `SHARK_*` environment overrides.
    pub fn load() -> Result<Self> {
        let mut builder = ConfigBuilder::builder().add_source(File::from_str(
            include_str!("../config/default.toml"),
            FileFormat::Toml,
        ));

        let config_file = env::var("SHARK_CONFIG").unwrap_or_else(|_| "shark.toml".to_string());
        builder = builder.add_source(
            File::with_name(&config_file)
                .required(false)
                .format(FileFormat::Toml),
        );

        builder = builder.add_source(
            Environment::with_prefix("SHARK")
                .separator("_")
                .try_parsing(true),
        );

        builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// The store URL, with the local default applied
    pub fn database_url(&self) -> String {
        match &self.database.url {
            Some(url) => url.clone(),
            None => "sqlite://.shark/shark.sqlite".to_string(),
        }
    }

    /// Validate configuration values that would otherwise fail deep in a
    /// command
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(anyhow::anyhow!(
                    "Invalid log level: {other}. Must be one of: trace, debug, info, warn, error"
                ));
            }
        }
        if self.command.deadline_secs == 0 {
            return Err(anyhow::anyhow!("command deadline must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig { url: None },
            logging: LoggingConfig {
                level: "warn".to_string(),
                format: LogFormat::Compact,
            },
            command: CommandConfig { deadline_secs: 30 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.command.deadline_secs, 30);
        assert!(config.database.url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_database_url_default() {
        let config = Config::default();
        assert_eq!(config.database_url(), "sqlite://.shark/shark.sqlite");

        let mut config = Config::default();
        config.database.url = Some("sqlite:///tmp/custom.sqlite".to_string());
        assert_eq!(config.database_url(), "sqlite:///tmp/custom.sqlite");
    }

    #[test]
    fn test_validation_rejects_bad_level() {
        let mut config = Config::default();
        config.logging.level = "noisy".to_string();
        assert!(config.validate().is_err());
    }
}
