//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{QuorumError, Result};
use crate::telemetry::TelemetryConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Event code allocation
    #[serde(default)]
    pub allocator: AllocatorConfig,

    /// Store call behaviour
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging, tracing and metrics
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. The in-memory store is used when unset.
    #[serde(default)]
    pub url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Apply pending migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            run_migrations: default_run_migrations(),
        }
    }
}

/// Event code allocation settings.
///
/// With the default length of 8 over a 62-symbol alphabet there are about 2.2e14
/// codes; a million live events collide on a single draw with probability below 1e-8.
#[derive(Debug, Clone, Deserialize)]
pub struct AllocatorConfig {
    /// Length of generated codes
    #[serde(default = "default_code_length")]
    pub code_length: usize,

    /// Maximum number of draws per event, collisions included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            code_length: default_code_length(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl AllocatorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(4..=16).contains(&self.code_length) {
            return Err(QuorumError::configuration(format!(
                "allocator.code_length must be between 4 and 16, got {}",
                self.code_length
            )));
        }
        if self.max_attempts == 0 {
            return Err(QuorumError::configuration(
                "allocator.max_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Deadline for a single store operation
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub operation_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            operation_timeout: default_operation_timeout(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_run_migrations() -> bool { true }
fn default_code_length() -> usize { 8 }
fn default_max_attempts() -> u32 { 10 }
fn default_operation_timeout() -> Duration { Duration::from_secs(5) }

impl Config {
    /// Load configuration from the environment (`QUORUM__SECTION__KEY`).
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("QUORUM").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("QUORUM").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.allocator.validate()?;
        if self.store.operation_timeout.is_zero() {
            return Err(QuorumError::configuration(
                "store.operation_timeout must be greater than zero",
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(QuorumError::configuration(
                "database.min_connections cannot exceed database.max_connections",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.allocator.code_length, 8);
        assert_eq!(config.allocator.max_attempts, 10);
        assert_eq!(config.store.operation_timeout, Duration::from_secs(5));
        assert!(config.database.url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_allocator_bounds() {
        let short = AllocatorConfig {
            code_length: 3,
            ..Default::default()
        };
        assert!(short.validate().is_err());

        let no_attempts = AllocatorConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(no_attempts.validate().is_err());
    }

    #[test]
    fn test_deserialize_humantime_timeout() {
        let source = config::Config::builder()
            .add_source(config::File::from_str(
                "[store]\noperation_timeout = \"250ms\"\n[allocator]\ncode_length = 6\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: Config = source.try_deserialize().unwrap();

        assert_eq!(config.store.operation_timeout, Duration::from_millis(250));
        assert_eq!(config.allocator.code_length, 6);
        assert_eq!(config.server.port, 8080);
    }
}
