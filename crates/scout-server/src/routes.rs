use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use scout_core::JobStore;
use scout_core::enrichment::EnrichmentRequest;
use scout_core::error::AppError;
use scout_core::job::{CreateSearchJobRequest, JobStatus};
use scout_core::orchestrator::TracingStepReporter;
use scout_core::relay::ContinuationMessage;

use crate::auth::require_api_key;
use crate::dto::{
    ContinuationRequest, ContinuationResponse, CreateJobRequest, CreateJobResponse,
    CreatorResponse, EnrichRequest, EnrichResponse, HealthResponse, JobListResponse, JobResponse,
    ListJobsQuery, QuotaResponse, ResultsQuery, ResultsResponse,
};
use crate::error::{ApiError, error_response};
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/jobs", post(create_job).get(list_jobs))
        .route("/v1/jobs/{id}", get(get_job).delete(cancel_job))
        .route("/v1/jobs/{id}/results", get(get_results))
        .route("/v1/continuations", post(continue_job))
        .route("/v1/enrichment", post(enrich))
        .route("/v1/enrichment/quota/{owner_id}", get(get_quota))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

fn job_not_found(id: Uuid) -> axum::response::Response {
    error_response(
        StatusCode::NOT_FOUND,
        "NOT_FOUND",
        format!("Job not found: {id}"),
    )
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 202, description = "Job accepted and first step scheduled", body = CreateJobResponse),
        (status = 400, description = "Invalid job request", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = CreateSearchJobRequest::try_from(body)?;
    let job = state.orchestrator.submit(request).await?;

    let response = CreateJobResponse {
        job_id: job.id,
        status: job.status.to_string(),
    };

    Ok((StatusCode::ACCEPTED, axum::Json(response)))
}

#[utoipa::path(
    get,
    path = "/v1/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "List of jobs", body = JobListResponse),
        (status = 400, description = "Unknown status filter", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status_filter = query
        .status
        .map(|s| s.parse::<JobStatus>().map_err(AppError::InvalidRequest))
        .transpose()?;

    let limit = query.limit.unwrap_or(20).min(100);
    let jobs = state.db.job_repo().list_jobs(status_filter, limit).await?;
    let total = jobs.len();

    let response = JobListResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response))
}

#[utoipa::path(
    get,
    path = "/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job status and progress", body = JobResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    match state.db.job_repo().get_job(id).await? {
        Some(job) => Ok(axum::Json(JobResponse::from(job)).into_response()),
        None => Ok(job_not_found(id)),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 204, description = "Job cancelled"),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 409, description = "Job already finished", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.db.job_repo();
    let Some(job) = repo.get_job(id).await? else {
        return Ok(job_not_found(id));
    };

    // The status can change between the read and the update, so the
    // conditional cancel decides.
    if job.status.is_terminal() || !repo.cancel_job(id).await? {
        let current = repo.get_job(id).await?.map_or(job.status, |j| j.status);
        return Ok(error_response(
            StatusCode::CONFLICT,
            "CONFLICT",
            format!("Job {id} is already in terminal state: {current}"),
        ));
    }

    tracing::info!(job_id = %id, "Job cancelled");
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[utoipa::path(
    get,
    path = "/v1/jobs/{id}/results",
    params(
        ("id" = Uuid, Path, description = "Job ID"),
        ResultsQuery,
    ),
    responses(
        (status = 200, description = "Creators found so far", body = ResultsResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn get_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ResultsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.db.job_repo();
    if repo.get_job(id).await?.is_none() {
        return Ok(job_not_found(id));
    }

    let limit = query.limit.unwrap_or(100).min(1000);
    let results = repo.results(id, limit).await?;
    let total = results.len();

    let response = ResultsResponse {
        job_id: id,
        results: results.into_iter().map(CreatorResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response).into_response())
}

// ---------------------------------------------------------------------------
// Continuations
// ---------------------------------------------------------------------------

/// Webhook for relays that push continuations instead of being polled.
///
/// Missing, stale and already-finished jobs answer 200 so the relay does
/// not redeliver them. Store failures answer 500 and are redelivered.
#[utoipa::path(
    post,
    path = "/v1/continuations",
    request_body = ContinuationRequest,
    responses(
        (status = 200, description = "Step executed", body = ContinuationResponse),
        (status = 500, description = "Step failed; redeliver", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "continuations"
)]
pub async fn continue_job(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<ContinuationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = ContinuationMessage {
        job_id: body.job_id,
        attempt: body.attempt,
        seq: body.seq,
    };

    let outcome = state
        .orchestrator
        .step(&message, &TracingStepReporter)
        .await?;

    Ok(axum::Json(ContinuationResponse::new(body.job_id, &outcome)))
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/enrichment",
    request_body = EnrichRequest,
    responses(
        (status = 200, description = "Profile data, cached or fetched", body = EnrichResponse),
        (status = 400, description = "Invalid request", body = crate::dto::ErrorResponse),
        (status = 404, description = "Profile not found", body = crate::dto::ErrorResponse),
        (status = 429, description = "Monthly enrichment limit reached", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "enrichment"
)]
pub async fn enrich(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<EnrichRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = EnrichmentRequest::try_from(body)?;
    let response = state.enrichment.get_or_fetch(&request).await?;
    Ok(axum::Json(EnrichResponse::from(response)))
}

#[utoipa::path(
    get,
    path = "/v1/enrichment/quota/{owner_id}",
    params(
        ("owner_id" = String, Path, description = "Account that owns the quota")
    ),
    responses(
        (status = 200, description = "Usage for the current month", body = QuotaResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "enrichment"
)]
pub async fn get_quota(
    State(state): State<Arc<AppState>>,
    Path(owner_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let counter = state.enrichment.quota(&owner_id).await?;
    Ok(axum::Json(QuotaResponse::from(counter)))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let healthy = state.db.ping().await.is_ok();

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        database: if healthy { "ok" } else { "error" },
    };

    (status, axum::Json(response))
}
