use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use scout_core::error::AppError;
use scout_core::models::{EnrichmentCacheEntry, Platform, QuotaCounter};
use scout_core::traits::{EnrichmentStore, QuotaDecision};

/// Enrichment cache entries and monthly quota counters.
#[derive(Clone)]
pub struct EnrichmentRepository {
    pool: Pool<Postgres>,
}

impl EnrichmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn counter(
        &self,
        owner_id: &str,
        period_key: &str,
    ) -> Result<Option<QuotaCounter>, AppError> {
        let row: Option<(String, String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT owner_id, period_key, count, quota_limit
            FROM quota_counters
            WHERE owner_id = $1 AND period_key = $2
            "#,
        )
        .bind(owner_id)
        .bind(period_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(|(owner_id, period_key, count, limit)| QuotaCounter {
            owner_id,
            period_key,
            count,
            limit,
        }))
    }
}

fn db_error(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

#[derive(sqlx::FromRow)]
struct CacheRow {
    platform: String,
    handle: String,
    payload: serde_json::Value,
    fetched_at: DateTime<Utc>,
    ttl_expiry: DateTime<Utc>,
}

impl TryFrom<CacheRow> for EnrichmentCacheEntry {
    type Error = AppError;

    fn try_from(row: CacheRow) -> Result<Self, AppError> {
        Ok(EnrichmentCacheEntry {
            platform: row.platform.parse().map_err(AppError::DatabaseError)?,
            handle: row.handle,
            payload: row.payload,
            fetched_at: row.fetched_at,
            ttl_expiry: row.ttl_expiry,
        })
    }
}

impl EnrichmentStore for EnrichmentRepository {
    async fn get_cached(
        &self,
        platform: Platform,
        handle: &str,
    ) -> Result<Option<EnrichmentCacheEntry>, AppError> {
        let row = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT platform, handle, payload, fetched_at, ttl_expiry
            FROM enrichment_cache
            WHERE platform = $1 AND handle = $2
            "#,
        )
        .bind(platform.as_str())
        .bind(handle)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn put_cached(&self, entry: &EnrichmentCacheEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO enrichment_cache (platform, handle, payload, fetched_at, ttl_expiry)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (platform, handle) DO UPDATE
            SET payload = EXCLUDED.payload,
                fetched_at = EXCLUDED.fetched_at,
                ttl_expiry = EXCLUDED.ttl_expiry
            "#,
        )
        .bind(entry.platform.as_str())
        .bind(&entry.handle)
        .bind(&entry.payload)
        .bind(entry.fetched_at)
        .bind(entry.ttl_expiry)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn try_consume(
        &self,
        owner_id: &str,
        period_key: &str,
        limit: i64,
    ) -> Result<QuotaDecision, AppError> {
        // One statement: creates the counter on first use, increments only
        // while below the limit. No row back means the limit was reached.
        let consumed: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO quota_counters (owner_id, period_key, count, quota_limit)
            SELECT $1, $2, 1, $3
            WHERE $3 < 0 OR $3 > 0
            ON CONFLICT (owner_id, period_key) DO UPDATE
            SET count = quota_counters.count + 1,
                quota_limit = EXCLUDED.quota_limit,
                updated_at = NOW()
            WHERE EXCLUDED.quota_limit < 0 OR quota_counters.count < EXCLUDED.quota_limit
            RETURNING count
            "#,
        )
        .bind(owner_id)
        .bind(period_key)
        .bind(limit)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match consumed {
            Some((used,)) => Ok(QuotaDecision {
                accepted: true,
                used,
                limit,
            }),
            None => Ok(QuotaDecision {
                accepted: false,
                used: self.usage(owner_id, period_key).await?,
                limit,
            }),
        }
    }

    async fn usage(&self, owner_id: &str, period_key: &str) -> Result<i64, AppError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"SELECT count FROM quota_counters WHERE owner_id = $1 AND period_key = $2"#,
        )
        .bind(owner_id)
        .bind(period_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map_or(0, |(count,)| count))
    }
}
