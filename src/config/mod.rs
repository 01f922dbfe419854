//! Configuration management for the IP tracking service.
//!
//! This module handles loading and managing application configuration
//! from an optional TOML file and `IPTRACK__`-prefixed environment variables.

use std::env;
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use crate::models::Config;

/// Load configuration from the config file and environment variables
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());
    build_config(Some(&config_file))
}

/// Build configuration with defaults, layering the given file (if it exists) and the environment
pub fn build_config(config_file: Option<&str>) -> Result<Config, ConfigError> {
    let mut builder = ConfigBuilder::builder()
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("redis.url", "redis://127.0.0.1:6379")?
        .set_default("database.url", "sqlite:ip_tracking.db")?
        .set_default("database.max_connections", 5)?
        .set_default("geo.base_url", "https://ipapi.co")?
        .set_default("geo.timeout_ms", 2000)?
        .set_default("geo.cache_ttl_seconds", 86_400)?
        .set_default("geo.cache_backend", "redis")?
        .set_default("scanner.enabled", true)?
        .set_default("scanner.interval_seconds", 3600)?
        .set_default("scanner.upsert_concurrency", 8)?;

    if let Some(path) = config_file {
        builder = builder.add_source(File::with_name(path).required(false));
    }

    let config = builder
        .add_source(Environment::with_prefix("IPTRACK").separator("__").try_parsing(true))
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CacheBackend;

    #[test]
    fn test_defaults_without_file() {
        let config = build_config(None).unwrap();
        let expected = Config::default();

        assert_eq!(config.server.port, expected.server.port);
        assert_eq!(config.database.url, expected.database.url);
        assert_eq!(config.geo.base_url, expected.geo.base_url);
        assert_eq!(config.geo.cache_ttl_seconds, 86_400);
        assert_eq!(config.geo.cache_backend, CacheBackend::Redis);
        assert_eq!(config.scanner.interval_seconds, 3600);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let config = build_config(Some("does/not/exist.toml")).unwrap();
        assert_eq!(config.database.max_connections, 5);
    }
}
