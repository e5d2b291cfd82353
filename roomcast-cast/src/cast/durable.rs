//! Durable audio cache backed by SQLite
//!
//! Holds previously acquired compressed audio across restarts. Rows carry an
//! absolute expiry; expired rows and rows shorter than the minimum valid length
//! (placeholders left by interrupted writes) are treated as misses.

use crate::error::Result;
use roomcast_common::time;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Durable key-value store for whole-track audio
#[derive(Clone)]
pub struct DurableCache {
    pool: Pool<Sqlite>,
    ttl: Duration,
    min_valid_bytes: usize,
}

impl DurableCache {
    /// Open (creating if missing) the cache database at `path`
    pub async fn open(path: &Path, ttl: Duration, min_valid_bytes: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        info!("Opened durable audio cache at {}", path.display());
        Self::from_pool(pool, ttl, min_valid_bytes).await
    }

    /// Wrap an existing pool, creating the table if needed
    pub async fn from_pool(pool: Pool<Sqlite>, ttl: Duration, min_valid_bytes: usize) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audio_cache (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            ttl,
            min_valid_bytes,
        })
    }

    /// Storage key for a track
    pub fn key_for(track_id: &str) -> String {
        format!("audio:{}", track_id)
    }

    /// Fetch a track's audio if present, unexpired and long enough to be real
    pub async fn get(&self, track_id: &str) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>, i64)> =
            sqlx::query_as("SELECT value, expires_at FROM audio_cache WHERE key = ?")
                .bind(Self::key_for(track_id))
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((_, expires_at)) if expires_at <= time::now().timestamp() => {
                debug!("Durable cache entry for {} expired", track_id);
                Ok(None)
            }
            Some((value, _)) if value.len() < self.min_valid_bytes => {
                debug!(
                    "Durable cache entry for {} too short ({} bytes), ignoring",
                    track_id,
                    value.len()
                );
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    /// Insert or replace a track's audio with a fresh expiry
    pub async fn set(&self, track_id: &str, value: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audio_cache (key, value, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(Self::key_for(track_id))
        .bind(value)
        .bind(time::expiry_from_now(self.ttl))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete expired rows, returning how many were removed
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM audio_cache WHERE expires_at <= ?")
            .bind(time::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub fn min_valid_bytes(&self) -> usize {
        self.min_valid_bytes
    }
}
