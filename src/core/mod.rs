//! Core functionality for the IP tracking service.
//!
//! This module contains the request interception middleware, the
//! geolocation resolver, the anomaly scanner and its scheduler, and the
//! blocklist seeding logic.

pub mod geo_resolver;
pub mod middleware;
pub mod anomaly_scanner;
pub mod scheduler;
pub mod blocklist_seeder;

pub use geo_resolver::{GeoCache, GeoLookup, GeoResolver, HttpGeoLookup, MemoryGeoCache, RedisGeoCache};
pub use middleware::{Interceptor, RequestInterception, RequestTime};
pub use anomaly_scanner::{AnomalyScanner, ScanReport};
pub use scheduler::{run_every, ScheduledJob};
pub use blocklist_seeder::{seed_blocklist, SeedOutcome};
