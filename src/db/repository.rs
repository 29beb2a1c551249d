use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::cache::KvStore;

/// Fetch a live cache entry. Expired rows are treated as absent.
pub async fn get_cache_entry(pool: &PgPool, key: &str) -> eyre::Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT value FROM cache_entries WHERE key = $1 AND expires_at > NOW()",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(v,)| v))
}

/// Upsert a cache entry, overwriting any previous value and expiry.
pub async fn upsert_cache_entry(
    pool: &PgPool,
    key: &str,
    value: &str,
    expires_at: DateTime<Utc>,
) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO cache_entries (key, value, expires_at, updated_at)
         VALUES ($1, $2, $3, NOW())
         ON CONFLICT (key) DO UPDATE
         SET value = $2, expires_at = $3, updated_at = NOW()",
    )
    .bind(key)
    .bind(value)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete expired entries. Returns the number of rows removed.
pub async fn prune_expired_entries(pool: &PgPool) -> eyre::Result<u64> {
    let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= NOW()")
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Postgres-backed [`KvStore`], shared across service instances.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn prune(&self) -> eyre::Result<u64> {
        prune_expired_entries(&self.pool).await
    }
}

#[async_trait]
impl KvStore for PgStore {
    async fn get(&self, key: &str) -> eyre::Result<Option<String>> {
        get_cache_entry(&self.pool, key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> eyre::Result<()> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| eyre::eyre!("Invalid cache TTL {:?}: {}", ttl, e))?;
        upsert_cache_entry(&self.pool, key, &value, Utc::now() + ttl).await
    }
}
