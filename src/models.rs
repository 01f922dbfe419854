use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel used for IPs and locations that could not be determined
pub const UNKNOWN: &str = "Unknown";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. `sqlite:ip_tracking.db`
    pub url: String,
    /// Maximum pool size
    pub max_connections: u32,
}

/// Where resolved geolocations are cached
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    Memory,
}

/// Geolocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    /// Provider base URL; lookups hit `<base_url>/<ip>/json/`
    pub base_url: String,
    /// Upper bound on a single provider call
    pub timeout_ms: u64,
    /// Cache entry lifetime
    pub cache_ttl_seconds: u64,
    /// Cache backend
    pub cache_backend: CacheBackend,
}

/// Anomaly scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Whether the server schedules the scanner
    pub enabled: bool,
    /// Seconds between scans
    pub interval_seconds: u64,
    /// Maximum in-flight suspicious-IP upserts within one scan
    pub upsert_concurrency: usize,
}

/// Application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Geolocation configuration
    pub geo: GeoConfig,
    /// Scanner configuration
    pub scanner: ScannerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite:ip_tracking.db".to_string(),
                max_connections: 5,
            },
            geo: GeoConfig {
                base_url: "https://ipapi.co".to_string(),
                timeout_ms: 2000,
                cache_ttl_seconds: 24 * 60 * 60,
                cache_backend: CacheBackend::Redis,
            },
            scanner: ScannerConfig {
                enabled: true,
                interval_seconds: 60 * 60,
                upsert_concurrency: 8,
            },
        }
    }
}

/// One inbound request as seen by the interception middleware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub ip_address: String,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub country: Option<String>,
    pub city: Option<String>,
}

/// A finding recorded by the anomaly scanner
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuspiciousIp {
    pub ip_address: String,
    pub reason: String,
}

/// Resolved (country, city) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub country: String,
    pub city: String,
}

impl GeoLocation {
    pub fn new(country: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            city: city.into(),
        }
    }

    /// The ("Unknown", "Unknown") pair returned on any resolver failure
    pub fn unknown() -> Self {
        Self::new(UNKNOWN, UNKNOWN)
    }

    /// Country for persistence; the sentinel is stored as absent
    pub fn known_country(&self) -> Option<String> {
        known(&self.country)
    }

    /// City for persistence; the sentinel is stored as absent
    pub fn known_city(&self) -> Option<String> {
        known(&self.city)
    }
}

fn known(value: &str) -> Option<String> {
    if value.is_empty() || value == UNKNOWN {
        None
    } else {
        Some(value.to_string())
    }
}

impl redis::FromRedisValue for GeoLocation {
    fn from_redis_value(v: &redis::Value) -> redis::RedisResult<Self> {
        let str_value: String = redis::FromRedisValue::from_redis_value(v)?;
        serde_json::from_str(&str_value)
            .map_err(|e| redis::RedisError::from((
                redis::ErrorKind::TypeError,
                "Failed to parse GeoLocation from JSON",
                e.to_string(),
            )))
    }
}
