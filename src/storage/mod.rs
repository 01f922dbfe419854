//! Persistence for request logs, the blocklist and suspicious-IP findings.
//!
//! The traits here are the seams the middleware and scanner are built
//! against; `SqliteStore` is the durable implementation.

mod pool;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{RequestLogEntry, SuspiciousIp};

pub use pool::{init_pool, run_migrations};
pub use sqlite::SqliteStore;

#[cfg(test)]
pub use pool::create_test_pool;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Timestamp out of storable range: {0}")]
    TimestampOutOfRange(DateTime<Utc>),
}

/// Number of requests one IP made inside a window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRequestCount {
    pub ip_address: String,
    pub total_requests: u64,
}

/// A distinct (ip, path) pair seen inside a window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathHit {
    pub ip_address: String,
    pub path: String,
}

/// Append-only request log. Windows are `[start, end)`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestLogStore: Send + Sync {
    async fn append(&self, entry: &RequestLogEntry) -> Result<(), StoreError>;

    async fn count_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn counts_by_ip(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<IpRequestCount>, StoreError>;

    async fn path_hits(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        paths: &[&'static str],
    ) -> Result<Vec<PathHit>, StoreError>;
}

/// Set of IPs denied access
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlocklistStore: Send + Sync {
    /// Membership test; duplicate rows do not change the answer
    async fn is_blocked(&self, ip: &str) -> Result<bool, StoreError>;

    async fn block(&self, ip: &str) -> Result<(), StoreError>;
}

/// Findings keyed on the exact (ip, reason) pair
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SuspiciousIpStore: Send + Sync {
    /// Create the row unless it exists. Returns whether a row was created.
    async fn get_or_create(&self, ip: &str, reason: &str) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<SuspiciousIp>, StoreError>;
}
