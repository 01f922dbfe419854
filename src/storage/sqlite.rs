use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::models::{RequestLogEntry, SuspiciousIp};
use super::{
    BlocklistStore, IpRequestCount, PathHit, RequestLogStore, StoreError, SuspiciousIpStore,
};

/// SQLite-backed implementation of every store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Timestamps are stored as nanoseconds since the epoch so the window
/// bounds compare at the same precision as the ingress instant.
fn to_nanos(timestamp: DateTime<Utc>) -> Result<i64, StoreError> {
    timestamp
        .timestamp_nanos_opt()
        .ok_or(StoreError::TimestampOutOfRange(timestamp))
}

#[async_trait]
impl RequestLogStore for SqliteStore {
    async fn append(&self, entry: &RequestLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO request_log (ip_address, timestamp_ns, path, country, city)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.ip_address)
        .bind(to_nanos(entry.timestamp)?)
        .bind(&entry.path)
        .bind(&entry.country)
        .bind(&entry.city)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM request_log WHERE timestamp_ns >= ? AND timestamp_ns < ?",
        )
        .bind(to_nanos(start)?)
        .bind(to_nanos(end)?)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn counts_by_ip(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<IpRequestCount>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT ip_address, COUNT(*) AS total_requests
             FROM request_log
             WHERE timestamp_ns >= ? AND timestamp_ns < ?
             GROUP BY ip_address
             ORDER BY ip_address",
        )
        .bind(to_nanos(start)?)
        .bind(to_nanos(end)?)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(ip_address, total)| IpRequestCount {
                ip_address,
                total_requests: total.max(0) as u64,
            })
            .collect())
    }

    async fn path_hits(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        paths: &[&'static str],
    ) -> Result<Vec<PathHit>, StoreError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT DISTINCT ip_address, path FROM request_log WHERE timestamp_ns >= ",
        );
        builder.push_bind(to_nanos(start)?);
        builder.push(" AND timestamp_ns < ");
        builder.push_bind(to_nanos(end)?);
        builder.push(" AND path IN (");
        let mut separated = builder.separated(", ");
        for path in paths {
            separated.push_bind(*path);
        }
        separated.push_unseparated(") ORDER BY ip_address, path");

        let rows: Vec<(String, String)> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(ip_address, path)| PathHit { ip_address, path })
            .collect())
    }
}

#[async_trait]
impl BlocklistStore for SqliteStore {
    async fn is_blocked(&self, ip: &str) -> Result<bool, StoreError> {
        let (matches,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM blocked_ip WHERE ip_address = ?",
        )
        .bind(ip)
        .fetch_one(&self.pool)
        .await?;

        Ok(matches > 0)
    }

    async fn block(&self, ip: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO blocked_ip (ip_address) VALUES (?)")
            .bind(ip)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl SuspiciousIpStore for SqliteStore {
    async fn get_or_create(&self, ip: &str, reason: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO suspicious_ip (ip_address, reason) VALUES (?, ?)",
        )
        .bind(ip)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<SuspiciousIp>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT ip_address, reason FROM suspicious_ip ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(ip_address, reason)| SuspiciousIp { ip_address, reason })
            .collect())
    }
}
