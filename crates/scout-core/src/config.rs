use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;

use crate::enrichment::EnrichmentConfig;
use crate::error::AppError;
use crate::models::UNLIMITED;
use crate::orchestrator::OrchestratorConfig;
use crate::planner::PlannerConfig;

/// Engine tunables, read from `SCOUT_*` environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub orchestrator: OrchestratorConfig,
    pub enrichment: EnrichmentConfig,
    /// Monthly enrichment limit for owners without a plan row.
    pub default_enrichment_limit: i64,
    pub limit_cache_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            enrichment: EnrichmentConfig::default(),
            default_enrichment_limit: 100,
            limit_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl EngineConfig {
    /// Read configuration from environment variables. All are optional.
    ///
    /// - `SCOUT_CONTINUATION_DELAY_MS` (2000)
    /// - `SCOUT_STEP_BUDGET_SECS` (25)
    /// - `SCOUT_JOB_TIMEOUT_SECS` (3600)
    /// - `SCOUT_MAX_TARGET_RESULTS` (1000)
    /// - `SCOUT_MAX_BATCH_SIZE` (100)
    /// - `SCOUT_MAX_REFINEMENT_ATTEMPTS` (10)
    /// - `SCOUT_MAX_TERM_FAILURES` (2)
    /// - `SCOUT_MAX_TRANSIENT_RETRIES` (5)
    /// - `SCOUT_ENRICHMENT_TTL_SECS` (604800)
    /// - `SCOUT_DEFAULT_ENRICHMENT_LIMIT` (100, `-1` for unlimited)
    /// - `SCOUT_LIMIT_CACHE_TTL_SECS` (300)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let orch = &defaults.orchestrator;

        let continuation_delay_ms: u64 = read(&lookup, "SCOUT_CONTINUATION_DELAY_MS", 2000)?;
        let step_budget_secs: u64 = positive(&lookup, "SCOUT_STEP_BUDGET_SECS", 25)?;
        let job_timeout_secs: i64 = positive(&lookup, "SCOUT_JOB_TIMEOUT_SECS", 3600)?;
        let enrichment_ttl_secs: i64 = positive(&lookup, "SCOUT_ENRICHMENT_TTL_SECS", 7 * 24 * 3600)?;

        let default_enrichment_limit: i64 = read(&lookup, "SCOUT_DEFAULT_ENRICHMENT_LIMIT", 100)?;
        if default_enrichment_limit < UNLIMITED {
            return Err(AppError::ConfigError(format!(
                "SCOUT_DEFAULT_ENRICHMENT_LIMIT must be >= 0 or -1, got {default_enrichment_limit}"
            )));
        }

        Ok(Self {
            orchestrator: OrchestratorConfig {
                continuation_delay: Duration::from_millis(continuation_delay_ms),
                step_budget: Duration::from_secs(step_budget_secs),
                max_transient_retries: read(&lookup, "SCOUT_MAX_TRANSIENT_RETRIES", 5)?,
                max_target_results: positive(&lookup, "SCOUT_MAX_TARGET_RESULTS", 1000)?,
                job_timeout: TimeDelta::seconds(job_timeout_secs),
                planner: PlannerConfig {
                    max_batch_size: positive(&lookup, "SCOUT_MAX_BATCH_SIZE", 100)?,
                    max_refinement_attempts: read(&lookup, "SCOUT_MAX_REFINEMENT_ATTEMPTS", 10)?,
                    max_term_failures: positive(&lookup, "SCOUT_MAX_TERM_FAILURES", 2)?,
                },
                transient_backoff: orch.transient_backoff.clone(),
                breaker: orch.breaker.clone(),
            },
            enrichment: EnrichmentConfig {
                ttl: TimeDelta::seconds(enrichment_ttl_secs),
            },
            default_enrichment_limit,
            limit_cache_ttl: Duration::from_secs(read(&lookup, "SCOUT_LIMIT_CACHE_TTL_SECS", 300)?),
        })
    }
}

fn read<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!("Invalid {key} '{raw}': expected a number"))
        }),
    }
}

fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr + PartialOrd + Default,
{
    let value = read(lookup, key, default)?;
    if value <= T::default() {
        return Err(AppError::ConfigError(format!("{key} must be at least 1")));
    }
    Ok(value)
}
