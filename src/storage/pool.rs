//! Database connection pool management.
//!
//! This module initializes the SQLite connection pool with:
//! - automatic database file creation
//! - WAL mode enabled for concurrent access
//! - table creation on startup

use std::str::FromStr;

use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::models::DatabaseConfig;
use super::StoreError;

/// Opens the pool described by `config` and applies migrations.
pub async fn init_pool(config: &DatabaseConfig) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    info!("Database ready at {}", config.url);

    Ok(pool)
}

/// Creates the tables if they don't exist.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS request_log (
            id INTEGER PRIMARY KEY,
            ip_address TEXT NOT NULL,
            timestamp_ns INTEGER NOT NULL,
            path TEXT NOT NULL,
            country TEXT,
            city TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_request_log_timestamp ON request_log (timestamp_ns)")
        .execute(pool)
        .await?;

    // Uniqueness of blocked IPs is left to the writer.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS blocked_ip (
            id INTEGER PRIMARY KEY,
            ip_address TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_blocked_ip_address ON blocked_ip (ip_address)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS suspicious_ip (
            id INTEGER PRIMARY KEY,
            ip_address TEXT NOT NULL,
            reason TEXT NOT NULL,
            UNIQUE (ip_address, reason)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// In-memory pool with migrations applied. Single connection so every
/// query sees the same database.
#[cfg(test)]
pub async fn create_test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database pool");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}
