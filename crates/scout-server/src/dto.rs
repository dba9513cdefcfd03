use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scout_core::enrichment::{EnrichmentRequest, EnrichmentResponse};
use scout_core::error::{AppError, GENERIC_FAILURE_MESSAGE};
use scout_core::job::{CreateSearchJobRequest, ReportedStatus, SearchJob};
use scout_core::models::{Entity, Platform, QuotaCounter, SearchMode};
use scout_core::orchestrator::StepOutcome;

fn parse_platform(raw: &str) -> Result<Platform, AppError> {
    raw.parse().map_err(AppError::InvalidRequest)
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateJobRequest {
    /// `tiktok`, `instagram` or `youtube`
    pub platform: String,
    /// `keyword` (default) or `similar`
    pub search_mode: Option<String>,
    /// Search terms for keyword mode, searched in this order
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Seed creator for similar mode
    pub target_handle: Option<String>,
    pub target_result_count: u32,
    /// Overrides the server's job time limit
    pub timeout_secs: Option<u32>,
}

impl TryFrom<CreateJobRequest> for CreateSearchJobRequest {
    type Error = AppError;

    fn try_from(body: CreateJobRequest) -> Result<Self, AppError> {
        let platform = parse_platform(&body.platform)?;
        let mode = match body.search_mode.as_deref() {
            None => SearchMode::Keyword,
            Some(raw) => raw.parse().map_err(AppError::InvalidRequest)?,
        };

        let request = match mode {
            SearchMode::Keyword => {
                CreateSearchJobRequest::keywords(platform, body.keywords, body.target_result_count)
            }
            SearchMode::Similar => CreateSearchJobRequest::similar(
                platform,
                body.target_handle.unwrap_or_default(),
                body.target_result_count,
            ),
        };

        Ok(match body.timeout_secs {
            Some(0) => {
                return Err(AppError::InvalidRequest(
                    "timeout_secs must be at least 1".into(),
                ));
            }
            Some(secs) => request.with_timeout(chrono::TimeDelta::seconds(i64::from(secs))),
            None => request,
        })
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub status: String,
}

/// Status view of a job, as shown to end users.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    pub platform: String,
    pub search_mode: String,
    /// Stored status, with `completed-partial` for jobs that ended below target
    pub status: String,
    /// Percentage of the target reached, 0-100
    pub progress: u8,
    pub processed_result_count: u32,
    pub target_result_count: u32,
    pub per_keyword_breakdown: BTreeMap<String, u32>,
    pub attempted_keywords: Vec<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout_at: DateTime<Utc>,
}

impl From<SearchJob> for JobResponse {
    fn from(job: SearchJob) -> Self {
        let reported = job.reported_status();
        let error = matches!(reported, ReportedStatus::Error | ReportedStatus::Timeout)
            .then(|| GENERIC_FAILURE_MESSAGE.to_string());

        Self {
            id: job.id,
            platform: job.platform.to_string(),
            search_mode: job.search_mode.to_string(),
            status: reported.to_string(),
            progress: job.progress(),
            processed_result_count: job.processed_result_count,
            target_result_count: job.target_result_count,
            per_keyword_breakdown: job.per_keyword_counts,
            attempted_keywords: job.attempted_keywords.into_iter().collect(),
            error,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            timeout_at: job.timeout_at,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub total: usize,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ResultsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CreatorResponse {
    pub platform: String,
    pub external_id: String,
    pub handle: Option<String>,
    pub payload: serde_json::Value,
}

impl From<Entity> for CreatorResponse {
    fn from(entity: Entity) -> Self {
        Self {
            platform: entity.platform.to_string(),
            external_id: entity.external_id,
            handle: entity.handle,
            payload: entity.payload,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ResultsResponse {
    pub job_id: Uuid,
    pub results: Vec<CreatorResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Continuations
// ---------------------------------------------------------------------------

/// Delivery from an external message relay.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ContinuationRequest {
    pub job_id: Uuid,
    #[serde(default)]
    pub attempt: u32,
    /// Cursor sequence the sender observed, if known
    pub seq: Option<u64>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ContinuationResponse {
    pub job_id: Uuid,
    /// What the step did: `continued`, `retrying`, `finished`, `conflict`,
    /// `stale`, `skipped` or `missing`
    pub outcome: &'static str,
    /// Job status when the step finished or skipped the job
    pub status: Option<String>,
}

impl ContinuationResponse {
    pub fn new(job_id: Uuid, outcome: &StepOutcome) -> Self {
        let (name, status) = match outcome {
            StepOutcome::Missing => ("missing", None),
            StepOutcome::Skipped(status) => ("skipped", Some(status.to_string())),
            StepOutcome::Stale => ("stale", None),
            StepOutcome::Continued { .. } => ("continued", None),
            StepOutcome::Retrying { .. } => ("retrying", None),
            StepOutcome::Conflict => ("conflict", None),
            StepOutcome::Finished(status) => ("finished", Some(status.to_string())),
        };
        Self {
            job_id,
            outcome: name,
            status,
        }
    }
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct EnrichRequest {
    pub owner_id: String,
    pub platform: String,
    pub handle: String,
    #[serde(default)]
    pub force_refresh: bool,
}

impl TryFrom<EnrichRequest> for EnrichmentRequest {
    type Error = AppError;

    fn try_from(body: EnrichRequest) -> Result<Self, AppError> {
        Ok(EnrichmentRequest {
            owner_id: body.owner_id,
            platform: parse_platform(&body.platform)?,
            handle: body.handle,
            force_refresh: body.force_refresh,
        })
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct EnrichResponse {
    pub payload: serde_json::Value,
    pub cached_at: DateTime<Utc>,
    pub quota_used: i64,
    /// `-1` means unlimited
    pub quota_limit: i64,
    pub from_cache: bool,
}

impl From<EnrichmentResponse> for EnrichResponse {
    fn from(r: EnrichmentResponse) -> Self {
        Self {
            payload: r.payload,
            cached_at: r.cached_at,
            quota_used: r.quota_used,
            quota_limit: r.quota_limit,
            from_cache: r.from_cache,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct QuotaResponse {
    pub owner_id: String,
    /// Calendar month, `YYYY-MM`
    pub period: String,
    pub used: i64,
    pub limit: i64,
}

impl From<QuotaCounter> for QuotaResponse {
    fn from(c: QuotaCounter) -> Self {
        Self {
            owner_id: c.owner_id,
            period: c.period_key,
            used: c.count,
            limit: c.limit,
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
