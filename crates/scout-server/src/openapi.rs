use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Scout API",
        version = "0.1.0",
        description = "Multi-keyword creator search jobs and profile enrichment."
    ),
    paths(
        crate::routes::create_job,
        crate::routes::list_jobs,
        crate::routes::get_job,
        crate::routes::cancel_job,
        crate::routes::get_results,
        crate::routes::continue_job,
        crate::routes::enrich,
        crate::routes::get_quota,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::CreateJobRequest,
        crate::dto::CreateJobResponse,
        crate::dto::JobResponse,
        crate::dto::JobListResponse,
        crate::dto::CreatorResponse,
        crate::dto::ResultsResponse,
        crate::dto::ContinuationRequest,
        crate::dto::ContinuationResponse,
        crate::dto::EnrichRequest,
        crate::dto::EnrichResponse,
        crate::dto::QuotaResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "jobs", description = "Search job submission, status and results"),
        (name = "continuations", description = "Step webhook for push-based relays"),
        (name = "enrichment", description = "Cached creator profiles with monthly limits"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI spec.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "API key. Set via SCOUT_SERVER_API_KEY environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}
