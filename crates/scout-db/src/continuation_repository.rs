use std::time::Duration;

use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use scout_core::error::AppError;
use scout_core::relay::{ContinuationMessage, Delivery, MessageRelay, RelayConsumer};

/// PostgreSQL continuation queue.
///
/// Claims use `SELECT FOR UPDATE SKIP LOCKED`. A claimed row stays
/// `claimed` with `visible_at` pushed forward by the visibility timeout; if
/// the holder dies without acking, the row becomes claimable again once
/// `visible_at` passes. Acked rows are deleted, dead-lettered rows are kept.
/// Sending a message that is already waiting or in flight is a no-op.
#[derive(Clone)]
pub struct ContinuationRepository {
    pool: Pool<Postgres>,
}

impl ContinuationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Messages waiting or in flight.
    pub async fn pending_count(&self) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM continuations WHERE status IN ('ready', 'claimed')"#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(count)
    }

    pub async fn dead_letter_count(&self) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM continuations WHERE status = 'dead'"#)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;

        Ok(count)
    }
}

fn db_error(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    id: Uuid,
    job_id: Uuid,
    attempt: i32,
    expected_seq: Option<i64>,
    deliveries: i32,
}

impl From<DeliveryRow> for Delivery {
    fn from(row: DeliveryRow) -> Self {
        Delivery {
            id: row.id,
            message: ContinuationMessage {
                job_id: row.job_id,
                attempt: row.attempt as u32,
                seq: row.expected_seq.map(|s| s as u64),
            },
            deliveries: row.deliveries as u32,
        }
    }
}

impl MessageRelay for ContinuationRepository {
    async fn send(&self, message: ContinuationMessage, delay: Duration) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO continuations (job_id, attempt, expected_seq, visible_at)
            VALUES ($1, $2, $3, NOW() + make_interval(secs => $4))
            ON CONFLICT (job_id, expected_seq, attempt)
                WHERE status IN ('ready', 'claimed') AND expected_seq IS NOT NULL
            DO NOTHING
            "#,
        )
        .bind(message.job_id)
        .bind(message.attempt as i32)
        .bind(message.seq.map(|s| s as i64))
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }
}

impl RelayConsumer for ContinuationRepository {
    async fn claim(
        &self,
        worker_id: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<Delivery>, AppError> {
        let row = sqlx::query_as::<_, DeliveryRow>(
            r#"
            UPDATE continuations
            SET status = 'claimed',
                worker_id = $1,
                deliveries = deliveries + 1,
                visible_at = NOW() + make_interval(secs => $2),
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM continuations
                WHERE status IN ('ready', 'claimed')
                  AND visible_at <= NOW()
                ORDER BY visible_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, job_id, attempt, expected_seq, deliveries
            "#,
        )
        .bind(worker_id)
        .bind(visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    async fn ack(&self, delivery_id: Uuid) -> Result<(), AppError> {
        sqlx::query(r#"DELETE FROM continuations WHERE id = $1"#)
            .bind(delivery_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(())
    }

    async fn nack(
        &self,
        delivery_id: Uuid,
        error: &str,
        retry_in: Option<Duration>,
    ) -> Result<(), AppError> {
        // NULL retry delay dead-letters the message.
        sqlx::query(
            r#"
            UPDATE continuations
            SET
                status = CASE WHEN $3::float8 IS NOT NULL THEN 'ready' ELSE 'dead' END,
                visible_at = CASE WHEN $3::float8 IS NOT NULL
                    THEN NOW() + make_interval(secs => $3::float8) ELSE visible_at END,
                last_error = $2,
                worker_id = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(delivery_id)
        .bind(error)
        .bind(retry_in.map(|d| d.as_secs_f64()))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn release_worker(&self, worker_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE continuations
            SET status = 'ready', worker_id = NULL, visible_at = NOW(), updated_at = NOW()
            WHERE worker_id = $1 AND status = 'claimed'
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }
}
