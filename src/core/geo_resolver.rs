//! Geolocation resolution for the IP tracking service.
//!
//! This module resolves an IP address to a (country, city) pair, consulting
//! a cache before calling the external lookup service. Resolution never
//! fails from the caller's point of view: every internal failure yields the
//! ("Unknown", "Unknown") pair and leaves the cache untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use metrics::increment_counter;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{GeoLocation, UNKNOWN};
use crate::utils::format_cache_key;

/// Errors that can occur while resolving a location
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("Lookup request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Provider rejected lookup: {0}")]
    ProviderError(String),
    #[error("Cache error: {0}")]
    CacheError(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// External IP-to-location service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoError>;
}

/// Key-value cache of resolved locations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GeoCache: Send + Sync {
    async fn get(&self, ip: &str) -> Result<Option<GeoLocation>, GeoError>;

    async fn set(&self, ip: &str, location: &GeoLocation, ttl: Duration) -> Result<(), GeoError>;
}

/// Fields we read from the provider's JSON body
#[derive(Debug, Deserialize)]
struct GeoPayload {
    country_name: Option<String>,
    city: Option<String>,
    #[serde(default)]
    error: bool,
    reason: Option<String>,
}

/// Extract a location from a provider response body.
///
/// Missing or empty fields become `Unknown`. A body flagged with
/// `"error": true` is a failed lookup.
pub fn parse_payload(body: &str) -> Result<GeoLocation, GeoError> {
    let payload: GeoPayload = serde_json::from_str(body)
        .map_err(|e| GeoError::InvalidResponse(e.to_string()))?;

    if payload.error {
        return Err(GeoError::ProviderError(
            payload.reason.unwrap_or_else(|| "unspecified".to_string()),
        ));
    }

    let or_unknown = |value: Option<String>| {
        value
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string())
    };

    Ok(GeoLocation {
        country: or_unknown(payload.country_name),
        city: or_unknown(payload.city),
    })
}

/// HTTP client for `GET <base_url>/<ip>/json/` providers
pub struct HttpGeoLookup {
    /// HTTP client
    client: Client,
    /// Provider base URL
    base_url: String,
}

impl HttpGeoLookup {
    /// Create a lookup client whose calls are bounded by `timeout`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GeoError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn lookup_url(&self, ip: &str) -> String {
        format!("{}/{}/json/", self.base_url.trim_end_matches('/'), ip)
    }
}

#[async_trait]
impl GeoLookup for HttpGeoLookup {
    async fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoError> {
        let response = self.client
            .get(self.lookup_url(ip))
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        parse_payload(&body)
    }
}

/// Redis-backed cache; values are JSON with a server-side expiry
pub struct RedisGeoCache {
    redis: ConnectionManager,
}

impl RedisGeoCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl GeoCache for RedisGeoCache {
    async fn get(&self, ip: &str) -> Result<Option<GeoLocation>, GeoError> {
        let mut conn = self.redis.clone();
        let location: Option<GeoLocation> = conn.get(format_cache_key("geo", ip)).await?;
        Ok(location)
    }

    async fn set(&self, ip: &str, location: &GeoLocation, ttl: Duration) -> Result<(), GeoError> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(location)?;
        conn.set_ex::<_, _, ()>(format_cache_key("geo", ip), payload, ttl.as_secs().max(1) as usize)
            .await?;
        Ok(())
    }
}

/// Entry count below which the memory cache never sweeps
const MIN_SWEEP_THRESHOLD: usize = 1024;

#[derive(Default)]
struct MemoryEntries {
    map: HashMap<String, (GeoLocation, Instant)>,
    sweep_at: usize,
}

/// In-process cache with per-entry expiry.
///
/// Expired entries are dropped lazily: a write sweeps the map only once it
/// has grown to `sweep_at` entries, after which the mark moves to twice the
/// surviving size. Writes stay amortised O(1) however many live entries
/// there are.
pub struct MemoryGeoCache {
    entries: RwLock<MemoryEntries>,
    min_sweep: usize,
}

impl Default for MemoryGeoCache {
    fn default() -> Self {
        Self::with_sweep_threshold(MIN_SWEEP_THRESHOLD)
    }
}

impl MemoryGeoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache that first sweeps expired entries once it holds `threshold` of them
    pub fn with_sweep_threshold(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            entries: RwLock::new(MemoryEntries {
                map: HashMap::new(),
                sweep_at: threshold,
            }),
            min_sweep: threshold,
        }
    }

    /// Number of stored entries, expired ones included
    pub async fn len(&self) -> usize {
        self.entries.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl GeoCache for MemoryGeoCache {
    async fn get(&self, ip: &str) -> Result<Option<GeoLocation>, GeoError> {
        let entries = self.entries.read().await;
        Ok(entries
            .map
            .get(ip)
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(location, _)| location.clone()))
    }

    async fn set(&self, ip: &str, location: &GeoLocation, ttl: Duration) -> Result<(), GeoError> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        if entries.map.len() >= entries.sweep_at && !entries.map.contains_key(ip) {
            entries.map.retain(|_, (_, expires_at)| now < *expires_at);
            entries.sweep_at = (entries.map.len() * 2).max(self.min_sweep);
            debug!("Swept geo memory cache, {} live entries", entries.map.len());
        }

        entries.map.insert(ip.to_string(), (location.clone(), now + ttl));
        Ok(())
    }
}

/// Cache-first resolver.
///
/// The read-then-write on a miss is not atomic: concurrent misses for the
/// same IP may each call the provider.
pub struct GeoResolver {
    lookup: Arc<dyn GeoLookup>,
    cache: Arc<dyn GeoCache>,
    ttl: Duration,
}

impl GeoResolver {
    pub fn new(lookup: Arc<dyn GeoLookup>, cache: Arc<dyn GeoCache>, ttl: Duration) -> Self {
        Self { lookup, cache, ttl }
    }

    /// Resolve `ip`, falling back to ("Unknown", "Unknown") on any failure
    pub async fn resolve(&self, ip: &str) -> GeoLocation {
        if ip == UNKNOWN {
            return GeoLocation::unknown();
        }

        match self.cache.get(ip).await {
            Ok(Some(location)) => {
                debug!("Geo cache hit for {}", ip);
                increment_counter!("geo_cache_hits_total");
                return location;
            }
            Ok(None) => {}
            Err(e) => warn!("Geo cache read failed for {}: {}", ip, e),
        }

        debug!("Geo cache miss for {}", ip);
        increment_counter!("geo_cache_misses_total");

        match self.lookup.lookup(ip).await {
            Ok(location) => {
                if let Err(e) = self.cache.set(ip, &location, self.ttl).await {
                    warn!("Geo cache write failed for {}: {}", ip, e);
                }
                location
            }
            Err(e) => {
                warn!("Geolocation lookup failed for {}: {}", ip, e);
                increment_counter!("geo_lookup_failures_total");
                GeoLocation::unknown()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use reqwest::StatusCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn nairobi() -> GeoLocation {
        GeoLocation::new("Kenya", "Nairobi")
    }

    #[tokio::test]
    async fn test_lookup_happens_once_within_ttl() {
        let mut lookup = MockGeoLookup::new();
        lookup.expect_lookup()
            .times(1)
            .returning(|_| Ok(nairobi()));

        let resolver = GeoResolver::new(Arc::new(lookup), Arc::new(MemoryGeoCache::new()), DAY);

        assert_eq!(resolver.resolve("41.90.1.1").await, nairobi());
        assert_eq!(resolver.resolve("41.90.1.1").await, nairobi());
    }

    #[tokio::test]
    async fn test_cache_is_keyed_by_ip() {
        let mut lookup = MockGeoLookup::new();
        lookup.expect_lookup()
            .times(2)
            .returning(|ip| Ok(GeoLocation::new("Country", ip)));

        let resolver = GeoResolver::new(Arc::new(lookup), Arc::new(MemoryGeoCache::new()), DAY);

        assert_eq!(resolver.resolve("1.1.1.1").await.city, "1.1.1.1");
        assert_eq!(resolver.resolve("2.2.2.2").await.city, "2.2.2.2");
        assert_eq!(resolver.resolve("1.1.1.1").await.city, "1.1.1.1");
    }

    #[tokio::test]
    async fn test_failure_returns_unknown_and_is_not_cached() {
        let mut lookup = MockGeoLookup::new();
        lookup.expect_lookup()
            .times(2)
            .returning(|_| Err(GeoError::InvalidResponse("truncated body".to_string())));

        let cache = Arc::new(MemoryGeoCache::new());
        let resolver = GeoResolver::new(Arc::new(lookup), cache.clone(), DAY);

        assert_eq!(resolver.resolve("8.8.8.8").await, GeoLocation::unknown());
        assert_eq!(cache.get("8.8.8.8").await.unwrap(), None);
        assert_eq!(resolver.resolve("8.8.8.8").await, GeoLocation::unknown());
    }

    #[tokio::test]
    async fn test_expired_entries_are_refetched() {
        let mut lookup = MockGeoLookup::new();
        lookup.expect_lookup()
            .times(2)
            .returning(|_| Ok(nairobi()));

        let resolver = GeoResolver::new(Arc::new(lookup), Arc::new(MemoryGeoCache::new()), Duration::ZERO);

        resolver.resolve("41.90.1.1").await;
        resolver.resolve("41.90.1.1").await;
    }

    #[tokio::test]
    async fn test_unknown_ip_skips_lookup() {
        let mut lookup = MockGeoLookup::new();
        lookup.expect_lookup().times(0);

        let resolver = GeoResolver::new(Arc::new(lookup), Arc::new(MemoryGeoCache::new()), DAY);

        assert_eq!(resolver.resolve(UNKNOWN).await, GeoLocation::unknown());
    }

    #[tokio::test]
    async fn test_cache_errors_do_not_fail_resolution() {
        let mut cache = MockGeoCache::new();
        cache.expect_get()
            .returning(|_| Err(GeoError::InvalidResponse("cache down".to_string())));
        cache.expect_set()
            .times(1)
            .returning(|_, _, _| Err(GeoError::InvalidResponse("cache down".to_string())));

        let mut lookup = MockGeoLookup::new();
        lookup.expect_lookup()
            .times(1)
            .returning(|_| Ok(nairobi()));

        let resolver = GeoResolver::new(Arc::new(lookup), Arc::new(cache), DAY);

        assert_eq!(resolver.resolve("41.90.1.1").await, nairobi());
    }

    #[tokio::test]
    async fn test_memory_cache_sweeps_expired_entries_at_threshold() {
        let cache = MemoryGeoCache::with_sweep_threshold(2);
        cache.set("1.1.1.1", &nairobi(), Duration::ZERO).await.unwrap();
        cache.set("2.2.2.2", &nairobi(), Duration::ZERO).await.unwrap();
        assert_eq!(cache.len().await, 2);

        cache.set("3.3.3.3", &nairobi(), DAY).await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("3.3.3.3").await.unwrap(), Some(nairobi()));
    }

    #[tokio::test]
    async fn test_memory_cache_does_not_sweep_below_threshold() {
        let cache = MemoryGeoCache::with_sweep_threshold(4);
        for ip in ["1.1.1.1", "2.2.2.2", "3.3.3.3"] {
            cache.set(ip, &nairobi(), Duration::ZERO).await.unwrap();
        }

        assert_eq!(cache.len().await, 3);
        assert_eq!(cache.get("1.1.1.1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_cache_threshold_grows_with_live_entries() {
        let cache = MemoryGeoCache::with_sweep_threshold(2);
        cache.set("1.1.1.1", &nairobi(), DAY).await.unwrap();
        cache.set("2.2.2.2", &nairobi(), DAY).await.unwrap();
        // Sweep keeps both live entries and moves the mark to 4.
        cache.set("3.3.3.3", &nairobi(), Duration::ZERO).await.unwrap();
        cache.set("4.4.4.4", &nairobi(), Duration::ZERO).await.unwrap();
        assert_eq!(cache.len().await, 4);

        cache.set("5.5.5.5", &nairobi(), DAY).await.unwrap();
        assert_eq!(cache.len().await, 3);
        assert_eq!(cache.get("1.1.1.1").await.unwrap(), Some(nairobi()));
    }

    #[test]
    fn test_parse_payload() {
        let location = parse_payload(r#"{"ip":"41.90.1.1","city":"Nairobi","country_name":"Kenya"}"#).unwrap();
        assert_eq!(location, nairobi());

        let location = parse_payload(r#"{"ip":"41.90.1.1","country_name":"Kenya","city":""}"#).unwrap();
        assert_eq!(location, GeoLocation::new("Kenya", UNKNOWN));

        assert!(matches!(
            parse_payload(r#"{"ip":"127.0.0.1","error":true,"reason":"Reserved IP Address"}"#),
            Err(GeoError::ProviderError(reason)) if reason == "Reserved IP Address"
        ));
        assert!(matches!(parse_payload("<html>"), Err(GeoError::InvalidResponse(_))));
    }

    /// Accepts one connection and never answers it
    async fn silent_provider() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        addr
    }

    /// Answers one request with the given raw HTTP response
    async fn canned_provider(response: String) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        addr
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    #[tokio::test]
    async fn test_http_lookup_times_out() {
        let addr = silent_provider().await;
        let lookup = HttpGeoLookup::new(format!("http://{}", addr), Duration::from_millis(50)).unwrap();

        let started = Instant::now();
        let result = lookup.lookup("41.90.1.1").await;

        assert!(matches!(result, Err(GeoError::RequestError(ref e)) if e.is_timeout()));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_http_lookup_rate_limited() {
        let addr = canned_provider(http_response("429 Too Many Requests", "")).await;
        let lookup = HttpGeoLookup::new(format!("http://{}", addr), Duration::from_secs(2)).unwrap();

        let result = lookup.lookup("41.90.1.1").await;

        assert!(matches!(
            result,
            Err(GeoError::RequestError(ref e)) if e.status() == Some(StatusCode::TOO_MANY_REQUESTS)
        ));
    }

    #[tokio::test]
    async fn test_http_lookup_parses_body() {
        let body = r#"{"ip":"41.90.1.1","city":"Nairobi","country_name":"Kenya"}"#;
        let addr = canned_provider(http_response("200 OK", body)).await;
        let lookup = HttpGeoLookup::new(format!("http://{}", addr), Duration::from_secs(2)).unwrap();

        assert_eq!(lookup.lookup("41.90.1.1").await.unwrap(), nairobi());
    }

    #[tokio::test]
    async fn test_resolver_returns_unknown_when_provider_hangs() {
        let addr = silent_provider().await;
        let lookup = HttpGeoLookup::new(format!("http://{}", addr), Duration::from_millis(50)).unwrap();
        let cache = Arc::new(MemoryGeoCache::new());
        let resolver = GeoResolver::new(Arc::new(lookup), cache.clone(), DAY);

        assert_eq!(resolver.resolve("41.90.1.1").await, GeoLocation::unknown());
        assert_eq!(cache.get("41.90.1.1").await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_resolver_does_not_cache_rate_limited_lookup() {
        let addr = canned_provider(http_response("429 Too Many Requests", "")).await;
        let lookup = HttpGeoLookup::new(format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        let cache = Arc::new(MemoryGeoCache::new());
        let resolver = GeoResolver::new(Arc::new(lookup), cache.clone(), DAY);

        assert_eq!(resolver.resolve("41.90.1.1").await, GeoLocation::unknown());
        assert!(cache.is_empty().await);
    }

    #[test]
    fn test_lookup_url() {
        let lookup = HttpGeoLookup::new("https://ipapi.co/", Duration::from_secs(2)).unwrap();
        assert_eq!(lookup.lookup_url("1.2.3.4"), "https://ipapi.co/1.2.3.4/json/");
    }
}
