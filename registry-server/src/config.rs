//! Configuration management for the server.

use registry_core::engine::RegistryConfig;
use registry_core::{CompatibilityLevel, Mode};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Engine-level tunables (default compatibility/mode, cache sizing).
    pub registry: RegistryConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8081".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let default_compatibility = env::var("REGISTRY_DEFAULT_COMPATIBILITY")
            .ok()
            .map(|v| CompatibilityLevel::from_str(&v))
            .transpose()
            .map_err(|_| ConfigError::InvalidCompatibilityLevel)?
            .unwrap_or_default();

        let default_mode = env::var("REGISTRY_DEFAULT_MODE")
            .ok()
            .map(|v| Mode::from_str(&v))
            .transpose()
            .map_err(|_| ConfigError::InvalidMode)?
            .unwrap_or_default();

        let cache_ttl_secs: u64 = env::var("REGISTRY_CACHE_TTL_SECS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| ConfigError::InvalidCacheTtl)?
            .unwrap_or(600);

        let registry = RegistryConfig {
            default_compatibility,
            default_mode,
            parsed_schema_cache_capacity: 10_000,
            parsed_schema_cache_ttl: Duration::from_secs(cache_ttl_secs),
            compatibility_cache_capacity: 10_000,
            compatibility_cache_ttl: Duration::from_secs(cache_ttl_secs),
        };

        Ok(Self {
            host,
            port,
            database_url,
            registry,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("invalid PORT value")]
    InvalidPort,

    #[error("invalid REGISTRY_DEFAULT_COMPATIBILITY value")]
    InvalidCompatibilityLevel,

    #[error("invalid REGISTRY_DEFAULT_MODE value")]
    InvalidMode,

    #[error("invalid REGISTRY_CACHE_TTL_SECS value")]
    InvalidCacheTtl,
}
