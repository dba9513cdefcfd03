pub mod circuit_breaker;
pub mod config;
pub mod dedup;
pub mod enrichment;
pub mod error;
pub mod job;
pub mod job_store;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod relay;
pub mod throttle;
pub mod traits;
pub mod worker;

#[cfg(test)]
mod testutil;

pub use config::EngineConfig;
pub use error::AppError;
pub use job::{CreateSearchJobRequest, JobStatus, ReportedStatus, SearchJob};
pub use job_store::JobStore;
pub use models::{Entity, Platform, SearchMode, compute_hash};
pub use orchestrator::{Orchestrator, OrchestratorConfig, StepOutcome};
pub use relay::{ContinuationMessage, MessageRelay, RelayConsumer};
pub use traits::{AdapterFactory, EnrichmentFetcher, EnrichmentStore, PlatformAdapter};
