use std::future::Future;

use uuid::Uuid;

use crate::dedup::IdentitySet;
use crate::error::AppError;
use crate::job::{CreateSearchJobRequest, JobCursor, JobStatus, SearchJob};
use crate::models::Entity;

/// One accepted unit of orchestration work.
///
/// The delta applied to the job is `items.len()`, credited to `term`.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Cursor `seq` the caller read before doing the work.
    pub expected_seq: u64,
    /// Replacement cursor; its `seq` must be `expected_seq + 1`.
    pub cursor: JobCursor,
    pub term: String,
    /// New unique entities, already deduplicated against the job.
    pub items: Vec<Entity>,
    /// Term to add to the attempted set, if this step completes its first attempt.
    pub attempted: Option<String>,
    /// Provider error that ended this unit. `None` leaves `last_error` as is.
    pub last_error: Option<String>,
}

impl ProgressUpdate {
    pub fn delta(&self) -> u32 {
        self.items.len() as u32
    }
}

/// Durable record of job state; the single source of truth.
///
/// `update_progress` is the idempotence mechanism under at-least-once
/// delivery: it must apply atomically and only when the stored cursor `seq`
/// still equals `expected_seq` and the job is `processing`. Otherwise it
/// returns [`AppError::ConcurrencyConflict`] without mutating anything.
pub trait JobStore: Send + Sync + Clone {
    fn create_job(
        &self,
        request: CreateSearchJobRequest,
    ) -> impl Future<Output = Result<SearchJob, AppError>> + Send;

    fn get_job(
        &self,
        job_id: Uuid,
    ) -> impl Future<Output = Result<Option<SearchJob>, AppError>> + Send;

    /// Move a pending job to `processing`. Returns false if it was not pending.
    fn mark_processing(&self, job_id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn update_progress(
        &self,
        job_id: Uuid,
        update: ProgressUpdate,
    ) -> impl Future<Output = Result<SearchJob, AppError>> + Send;

    /// Move a processing job to `completed`. A no-op from any other status.
    fn complete_job(&self, job_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Record a failure. Permanent failures end the job (`timeout` for
    /// [`AppError::TimeoutExceeded`], `error` otherwise); others only set
    /// `last_error`. Steps record per-term failures through
    /// [`ProgressUpdate::last_error`] instead.
    fn fail_job(
        &self,
        job_id: Uuid,
        error: &AppError,
        permanent: bool,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Cancel a non-terminal job. Returns false if it was already terminal.
    fn cancel_job(&self, job_id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<SearchJob>, AppError>> + Send;

    /// Identities of every entity accumulated for the job.
    fn identities(
        &self,
        job_id: Uuid,
    ) -> impl Future<Output = Result<IdentitySet, AppError>> + Send;

    /// Accumulated entities, in the order they were merged.
    fn results(
        &self,
        job_id: Uuid,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Entity>, AppError>> + Send;
}
