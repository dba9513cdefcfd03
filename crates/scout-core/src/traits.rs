use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{EnrichmentCacheEntry, Entity, Platform, SearchMode};

/// One bounded provider request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub mode: SearchMode,
    /// Keyword, or target handle for similar searches.
    pub term: String,
    /// Provider token from the previous page of this term.
    pub cursor: Option<String>,
    pub limit: u32,
}

/// One page of provider results.
#[derive(Debug, Clone, Default)]
pub struct BatchPage {
    pub items: Vec<Entity>,
    pub next_cursor: Option<String>,
    /// Provider has nothing more for this term.
    pub exhausted: bool,
}

/// Fetches creator batches from one content platform.
///
/// Errors must be classified: retryable errors leave the job untouched and
/// are retried later; non-retryable provider errors mark the term as
/// attempted with zero results; [`AppError::MalformedCursor`] restarts the
/// term. Implementations must not block longer than one step's budget.
pub trait PlatformAdapter: Send + Sync + Clone {
    fn platform(&self) -> Platform;

    fn fetch_batch(
        &self,
        request: &BatchRequest,
    ) -> impl Future<Output = Result<BatchPage, AppError>> + Send;
}

/// Selects the adapter implementation for a job.
///
/// Called once per step with the job's fixed platform and mode.
pub trait AdapterFactory: Send + Sync + Clone {
    type Adapter: PlatformAdapter;

    fn adapter_for(&self, platform: Platform, mode: SearchMode)
    -> Result<Self::Adapter, AppError>;
}

/// Supplementary per-creator profile lookup.
pub trait EnrichmentFetcher: Send + Sync + Clone {
    fn fetch_profile(
        &self,
        platform: Platform,
        handle: &str,
    ) -> impl Future<Output = Result<serde_json::Value, AppError>> + Send;
}

/// Result of an atomic quota check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    pub accepted: bool,
    /// Usage after the operation (unchanged when rejected).
    pub used: i64,
    pub limit: i64,
}

/// Enrichment cache entries and per-owner quota counters.
pub trait EnrichmentStore: Send + Sync + Clone {
    fn get_cached(
        &self,
        platform: Platform,
        handle: &str,
    ) -> impl Future<Output = Result<Option<EnrichmentCacheEntry>, AppError>> + Send;

    /// Insert or replace the entry for `(platform, handle)`.
    fn put_cached(
        &self,
        entry: &EnrichmentCacheEntry,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Atomically increment the owner's counter for `period_key` unless it
    /// already reached `limit` (`-1` never rejects). Creates the counter on
    /// first use.
    fn try_consume(
        &self,
        owner_id: &str,
        period_key: &str,
        limit: i64,
    ) -> impl Future<Output = Result<QuotaDecision, AppError>> + Send;

    /// Current usage without changing it.
    fn usage(
        &self,
        owner_id: &str,
        period_key: &str,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;
}

/// Plan lookup: the owner's monthly enrichment limit (`-1` = unlimited).
pub trait QuotaLimitProvider: Send + Sync + Clone {
    fn limit_for(&self, owner_id: &str) -> impl Future<Output = Result<i64, AppError>> + Send;
}

/// Supplies the current time, so expiry logic can be driven in tests.
pub trait Clock: Send + Sync + Clone {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
