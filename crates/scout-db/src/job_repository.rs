use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use scout_core::dedup::IdentitySet;
use scout_core::error::AppError;
use scout_core::job::{
    CreateSearchJobRequest, DEFAULT_JOB_TIMEOUT, JobCursor, JobStatus, SearchJob,
};
use scout_core::job_store::{JobStore, ProgressUpdate};
use scout_core::models::{Entity, IdentityKey, ResultBatch};

/// PostgreSQL-backed job store.
///
/// `update_progress` runs in one transaction guarded by a conditional
/// `UPDATE ... WHERE cursor_seq = $expected AND status = 'processing'`, so of
/// two racing steps exactly one is applied.
#[derive(Clone)]
pub struct SearchJobRepository {
    pool: Pool<Postgres>,
}

impl SearchJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Audit rows for a job, oldest first.
    pub async fn batches(&self, job_id: Uuid) -> Result<Vec<ResultBatch>, AppError> {
        let rows = sqlx::query_as::<_, ResultBatchRow>(
            r#"
            SELECT job_id, sequence_number, term, items, content_hash, created_at
            FROM result_batches
            WHERE job_id = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

fn db_error(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct SearchJobRow {
    id: Uuid,
    platform: String,
    search_mode: String,
    keywords: Vec<String>,
    target_handle: Option<String>,
    target_result_count: i32,
    status: String,
    cursor: Option<serde_json::Value>,
    processed_batches: i32,
    processed_result_count: i32,
    per_keyword_counts: serde_json::Value,
    attempted_keywords: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    timeout_at: DateTime<Utc>,
    last_error: Option<String>,
}

impl TryFrom<SearchJobRow> for SearchJob {
    type Error = AppError;

    fn try_from(row: SearchJobRow) -> Result<Self, AppError> {
        let id = row.id;
        let corrupt = |field: &str, detail: String| {
            AppError::DatabaseError(format!("job {id} has invalid {field}: {detail}"))
        };

        let cursor = row
            .cursor
            .map(serde_json::from_value::<JobCursor>)
            .transpose()
            .map_err(|e| corrupt("cursor", e.to_string()))?;
        let per_keyword_counts: BTreeMap<String, u32> =
            serde_json::from_value(row.per_keyword_counts)
                .map_err(|e| corrupt("per_keyword_counts", e.to_string()))?;

        Ok(SearchJob {
            id,
            platform: row.platform.parse().map_err(|e| corrupt("platform", e))?,
            search_mode: row.search_mode.parse().map_err(|e| corrupt("search_mode", e))?,
            keywords: row.keywords,
            target_handle: row.target_handle,
            target_result_count: row.target_result_count as u32,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            cursor,
            processed_batches: row.processed_batches as u32,
            processed_result_count: row.processed_result_count as u32,
            per_keyword_counts,
            attempted_keywords: row.attempted_keywords.into_iter().collect::<BTreeSet<_>>(),
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            timeout_at: row.timeout_at,
            last_error: row.last_error,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EntityRow {
    platform: String,
    external_id: String,
    handle: Option<String>,
    payload: serde_json::Value,
}

impl TryFrom<EntityRow> for Entity {
    type Error = AppError;

    fn try_from(row: EntityRow) -> Result<Self, AppError> {
        let platform = row.platform.parse().map_err(AppError::DatabaseError)?;
        Ok(Entity {
            platform,
            external_id: row.external_id,
            handle: row.handle,
            payload: row.payload,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResultBatchRow {
    job_id: Uuid,
    sequence_number: i64,
    term: String,
    items: serde_json::Value,
    content_hash: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ResultBatchRow> for ResultBatch {
    type Error = AppError;

    fn try_from(row: ResultBatchRow) -> Result<Self, AppError> {
        Ok(ResultBatch {
            job_id: row.job_id,
            sequence_number: row.sequence_number as u64,
            term: row.term,
            items: serde_json::from_value(row.items)?,
            content_hash: row.content_hash,
            created_at: row.created_at,
        })
    }
}

impl JobStore for SearchJobRepository {
    async fn create_job(&self, request: CreateSearchJobRequest) -> Result<SearchJob, AppError> {
        let counts: serde_json::Map<String, serde_json::Value> = request
            .terms()
            .into_iter()
            .map(|term| (term, 0.into()))
            .collect();
        let timeout_at = Utc::now() + request.timeout.unwrap_or(DEFAULT_JOB_TIMEOUT);

        let row = sqlx::query_as::<_, SearchJobRow>(
            r#"
            INSERT INTO search_jobs
                (platform, search_mode, keywords, target_handle, target_result_count,
                 per_keyword_counts, timeout_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(request.platform.as_str())
        .bind(request.search_mode.as_str())
        .bind(&request.keywords)
        .bind(&request.target_handle)
        .bind(request.target_result_count as i32)
        .bind(serde_json::Value::Object(counts))
        .bind(timeout_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        row.try_into()
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<SearchJob>, AppError> {
        let row = sqlx::query_as::<_, SearchJobRow>(r#"SELECT * FROM search_jobs WHERE id = $1"#)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn mark_processing(&self, job_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE search_jobs
            SET status = 'processing', started_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::sources_of(JobStatus::Processing))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        update: ProgressUpdate,
    ) -> Result<SearchJob, AppError> {
        let delta = update.delta() as i32;
        let seq = update.cursor.seq;
        let cursor = serde_json::to_value(&update.cursor)?;

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row = sqlx::query_as::<_, SearchJobRow>(
            r#"
            UPDATE search_jobs
            SET cursor = $3,
                cursor_seq = $4,
                processed_batches = processed_batches + 1,
                processed_result_count = processed_result_count + $5,
                per_keyword_counts = jsonb_set(
                    per_keyword_counts,
                    ARRAY[$6::text],
                    to_jsonb(COALESCE((per_keyword_counts ->> $6::text)::int, 0) + $5)
                ),
                attempted_keywords = CASE
                    WHEN $7::text IS NULL OR $7::text = ANY(attempted_keywords)
                        THEN attempted_keywords
                    ELSE array_append(attempted_keywords, $7::text)
                END,
                last_error = COALESCE($8, last_error),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND cursor_seq = $2
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(update.expected_seq as i64)
        .bind(&cursor)
        .bind(seq as i64)
        .bind(delta)
        .bind(&update.term)
        .bind(&update.attempted)
        .bind(&update.last_error)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        // Dropping the transaction rolls it back.
        let Some(row) = row else {
            return Err(AppError::ConcurrencyConflict { job_id });
        };

        for entity in &update.items {
            sqlx::query(
                r#"
                INSERT INTO job_results (job_id, platform, external_id, handle, payload, batch_seq)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (job_id, platform, external_id) DO NOTHING
                "#,
            )
            .bind(job_id)
            .bind(entity.platform.as_str())
            .bind(&entity.external_id)
            .bind(&entity.handle)
            .bind(&entity.payload)
            .bind(seq as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        let batch = ResultBatch::new(job_id, seq, &update.term, update.items);
        sqlx::query(
            r#"
            INSERT INTO result_batches (job_id, sequence_number, term, items, content_hash)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(job_id)
        .bind(seq as i64)
        .bind(&batch.term)
        .bind(serde_json::to_value(&batch.items)?)
        .bind(&batch.content_hash)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        row.try_into()
    }

    async fn complete_job(&self, job_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE search_jobs
            SET status = 'completed', completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::sources_of(JobStatus::Completed))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            tracing::debug!(%job_id, "Job no longer processing, completion skipped");
        }
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &AppError, permanent: bool) -> Result<(), AppError> {
        let next = JobStatus::for_failure(error);
        // All SET expressions see the old row, so both CASEs test the prior status.
        sqlx::query(
            r#"
            UPDATE search_jobs
            SET
                last_error = $2,
                status = CASE WHEN $3 AND status = ANY($5)
                    THEN $4 ELSE status END,
                completed_at = CASE WHEN $3 AND status = ANY($5)
                    THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error.to_string())
        .bind(permanent)
        .bind(next.as_str())
        .bind(JobStatus::sources_of(next))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE search_jobs
            SET status = 'cancelled', completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::sources_of(JobStatus::Cancelled))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<SearchJob>, AppError> {
        let rows = if let Some(status) = status {
            sqlx::query_as::<_, SearchJobRow>(
                r#"
                SELECT * FROM search_jobs
                WHERE status = $1
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, SearchJobRow>(
                r#"
                SELECT * FROM search_jobs
                ORDER BY created_at DESC
                LIMIT $1
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(db_error)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn identities(&self, job_id: Uuid) -> Result<IdentitySet, AppError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as(r#"SELECT platform, external_id FROM job_results WHERE job_id = $1"#)
                .bind(job_id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;

        rows.into_iter()
            .map(|(platform, external_id)| {
                let platform = platform.parse().map_err(AppError::DatabaseError)?;
                Ok(IdentityKey::new(platform, external_id))
            })
            .collect()
    }

    async fn results(&self, job_id: Uuid, limit: usize) -> Result<Vec<Entity>, AppError> {
        let rows = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT platform, external_id, handle, payload
            FROM job_results
            WHERE job_id = $1
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(job_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
