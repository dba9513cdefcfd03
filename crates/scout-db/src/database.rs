use scout_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::continuation_repository::ContinuationRepository;
use crate::enrichment_repository::EnrichmentRepository;
use crate::job_repository::SearchJobRepository;
use crate::plan_repository::PlanRepository;

/// Owns the connection pool, runs migrations and vends repositories.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    pub fn job_repo(&self) -> SearchJobRepository {
        SearchJobRepository::new(self.pool.clone())
    }

    /// The continuation queue, used both to send and to consume.
    pub fn relay(&self) -> ContinuationRepository {
        ContinuationRepository::new(self.pool.clone())
    }

    pub fn enrichment_repo(&self) -> EnrichmentRepository {
        EnrichmentRepository::new(self.pool.clone())
    }

    pub fn plan_repo(&self, default_limit: i64) -> PlanRepository {
        PlanRepository::new(self.pool.clone(), default_limit)
    }

    /// Cheap liveness probe.
    pub async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
