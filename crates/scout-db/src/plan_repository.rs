use sqlx::{PgPool, Pool, Postgres};

use scout_core::error::AppError;
use scout_core::traits::QuotaLimitProvider;

/// Owner plan limits from `owner_plans`, falling back to a default for
/// owners without a row.
#[derive(Clone)]
pub struct PlanRepository {
    pool: Pool<Postgres>,
    default_limit: i64,
}

impl PlanRepository {
    pub fn new(pool: PgPool, default_limit: i64) -> Self {
        Self {
            pool,
            default_limit,
        }
    }

    /// Set an owner's monthly enrichment limit (`-1` = unlimited).
    pub async fn set_limit(&self, owner_id: &str, limit: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO owner_plans (owner_id, enrichment_limit)
            VALUES ($1, $2)
            ON CONFLICT (owner_id) DO UPDATE
            SET enrichment_limit = EXCLUDED.enrichment_limit, updated_at = NOW()
            "#,
        )
        .bind(owner_id)
        .bind(limit)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}

impl QuotaLimitProvider for PlanRepository {
    async fn limit_for(&self, owner_id: &str) -> Result<i64, AppError> {
        let row: Option<(i64,)> =
            sqlx::query_as(r#"SELECT enrichment_limit FROM owner_plans WHERE owner_id = $1"#)
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map_or(self.default_limit, |(limit,)| limit))
    }
}
