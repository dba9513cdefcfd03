use scout_client::{HttpAdapterFactory, HttpEnrichmentFetcher, ProviderConfig};
use scout_core::enrichment::{CachedLimitProvider, EnrichmentService};
use scout_core::throttle::{ThrottleConfig, ThrottledAdapterFactory};
use scout_core::{AppError, EngineConfig, Orchestrator};
use scout_db::{
    ContinuationRepository, Database, EnrichmentRepository, PlanRepository, SearchJobRepository,
};

pub type Adapters = ThrottledAdapterFactory<HttpAdapterFactory>;

pub type JobOrchestrator = Orchestrator<SearchJobRepository, ContinuationRepository, Adapters>;

pub type Enrichment = EnrichmentService<
    EnrichmentRepository,
    HttpEnrichmentFetcher,
    CachedLimitProvider<PlanRepository>,
>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub db: Database,
    pub orchestrator: JobOrchestrator,
    pub enrichment: Enrichment,
    /// Bearer key every `/v1` request must present.
    pub api_key: String,
}

impl AppState {
    /// Wire the engine to PostgreSQL and the provider gateway.
    pub fn new(
        db: Database,
        provider: &ProviderConfig,
        engine: &EngineConfig,
        api_key: impl Into<String>,
    ) -> Result<Self, AppError> {
        let adapters = HttpAdapterFactory::new(provider)?;
        let fetcher = HttpEnrichmentFetcher::new(adapters.client().clone());

        let orchestrator = Orchestrator::new(
            db.job_repo(),
            db.relay(),
            ThrottledAdapterFactory::new(adapters, ThrottleConfig::default()),
            engine.orchestrator.clone(),
        );

        let limits = CachedLimitProvider::new(
            db.plan_repo(engine.default_enrichment_limit),
            engine.limit_cache_ttl,
        );
        let enrichment = EnrichmentService::new(
            db.enrichment_repo(),
            fetcher,
            limits,
            engine.enrichment.clone(),
        );

        Ok(Self {
            db,
            orchestrator,
            enrichment,
            api_key: api_key.into(),
        })
    }
}
