pub mod config;
pub mod continuation_repository;
pub mod database;
pub mod enrichment_repository;
pub mod job_repository;
pub mod plan_repository;

pub use config::DatabaseConfig;
pub use continuation_repository::ContinuationRepository;
pub use database::Database;
pub use enrichment_repository::EnrichmentRepository;
pub use job_repository::SearchJobRepository;
pub use plan_repository::PlanRepository;
