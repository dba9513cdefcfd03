//! Per-creator enrichment behind a shared cache and a monthly quota.
//!
//! A fresh cache hit is free. Everything else, a miss, a stale entry or a
//! forced refresh, first passes the quota gate: one atomic
//! check-and-increment of the owner's counter for the current month. Only
//! an accepted increment may reach the fetcher, so the number of fetches per
//! owner and month never exceeds the plan limit. A fetch that fails after
//! the increment still counts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use moka::future::Cache;
use serde::Serialize;

use crate::error::AppError;
use crate::models::{EnrichmentCacheEntry, Platform, QuotaCounter, UNLIMITED, period_key};
use crate::traits::{Clock, EnrichmentFetcher, EnrichmentStore, QuotaLimitProvider, SystemClock};

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// How long a fetched payload is served from cache.
    pub ttl: TimeDelta,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            ttl: TimeDelta::days(7),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentRequest {
    pub owner_id: String,
    pub platform: Platform,
    pub handle: String,
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentResponse {
    pub payload: serde_json::Value,
    pub cached_at: DateTime<Utc>,
    pub quota_used: i64,
    pub quota_limit: i64,
    pub from_cache: bool,
}

#[derive(Clone)]
pub struct EnrichmentService<S, E, L, K = SystemClock>
where
    S: EnrichmentStore,
    E: EnrichmentFetcher,
    L: QuotaLimitProvider,
    K: Clock,
{
    store: S,
    fetcher: E,
    limits: L,
    clock: K,
    config: EnrichmentConfig,
}

impl<S, E, L> EnrichmentService<S, E, L>
where
    S: EnrichmentStore,
    E: EnrichmentFetcher,
    L: QuotaLimitProvider,
{
    pub fn new(store: S, fetcher: E, limits: L, config: EnrichmentConfig) -> Self {
        Self::with_clock(store, fetcher, limits, SystemClock, config)
    }
}

impl<S, E, L, K> EnrichmentService<S, E, L, K>
where
    S: EnrichmentStore,
    E: EnrichmentFetcher,
    L: QuotaLimitProvider,
    K: Clock,
{
    pub fn with_clock(store: S, fetcher: E, limits: L, clock: K, config: EnrichmentConfig) -> Self {
        Self {
            store,
            fetcher,
            limits,
            clock,
            config,
        }
    }

    pub async fn get_or_fetch(
        &self,
        request: &EnrichmentRequest,
    ) -> Result<EnrichmentResponse, AppError> {
        let owner_id = request.owner_id.trim();
        let handle = request.handle.trim().trim_start_matches('@');
        if owner_id.is_empty() || handle.is_empty() {
            return Err(AppError::InvalidRequest(
                "owner_id and handle are required".into(),
            ));
        }

        let now = self.clock.now();
        let period = period_key(now);
        let limit = self.limits.limit_for(owner_id).await?;

        if !request.force_refresh
            && let Some(entry) = self.store.get_cached(request.platform, handle).await?
            && entry.is_fresh_at(now)
        {
            let used = self.store.usage(owner_id, &period).await?;
            tracing::debug!(%owner_id, platform = %request.platform, %handle, "Enrichment cache hit");
            return Ok(EnrichmentResponse {
                payload: entry.payload,
                cached_at: entry.fetched_at,
                quota_used: used,
                quota_limit: limit,
                from_cache: true,
            });
        }

        let decision = self.store.try_consume(owner_id, &period, limit).await?;
        if !decision.accepted {
            tracing::info!(%owner_id, used = decision.used, limit, "Enrichment quota exhausted");
            return Err(AppError::QuotaExceeded {
                used: decision.used,
                limit,
            });
        }

        let payload = self.fetcher.fetch_profile(request.platform, handle).await?;
        let entry = EnrichmentCacheEntry {
            platform: request.platform,
            handle: handle.to_string(),
            payload,
            fetched_at: now,
            ttl_expiry: now + self.config.ttl,
        };
        self.store.put_cached(&entry).await?;

        tracing::info!(
            %owner_id,
            platform = %request.platform,
            %handle,
            used = decision.used,
            limit,
            "Enrichment fetched"
        );
        Ok(EnrichmentResponse {
            payload: entry.payload,
            cached_at: entry.fetched_at,
            quota_used: decision.used,
            quota_limit: limit,
            from_cache: false,
        })
    }

    /// Current-month usage for an owner.
    pub async fn quota(&self, owner_id: &str) -> Result<QuotaCounter, AppError> {
        let period = period_key(self.clock.now());
        Ok(QuotaCounter {
            owner_id: owner_id.to_string(),
            count: self.store.usage(owner_id, &period).await?,
            limit: self.limits.limit_for(owner_id).await?,
            period_key: period,
        })
    }
}

/// Fixed limits: a default plus per-owner overrides.
#[derive(Debug, Clone)]
pub struct StaticLimitProvider {
    default_limit: i64,
    overrides: Arc<HashMap<String, i64>>,
}

impl StaticLimitProvider {
    pub fn new(default_limit: i64) -> Self {
        Self {
            default_limit,
            overrides: Arc::new(HashMap::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(UNLIMITED)
    }

    pub fn with_override(mut self, owner_id: impl Into<String>, limit: i64) -> Self {
        Arc::make_mut(&mut self.overrides).insert(owner_id.into(), limit);
        self
    }
}

impl QuotaLimitProvider for StaticLimitProvider {
    async fn limit_for(&self, owner_id: &str) -> Result<i64, AppError> {
        Ok(self
            .overrides
            .get(owner_id)
            .copied()
            .unwrap_or(self.default_limit))
    }
}

/// Keeps plan limits in memory for `ttl` so the hot path does not hit the
/// plan table on every call.
#[derive(Clone)]
pub struct CachedLimitProvider<P> {
    inner: P,
    cache: Cache<String, i64>,
}

impl<P: QuotaLimitProvider> CachedLimitProvider<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(ttl)
            .build();
        Self { inner, cache }
    }

    pub async fn invalidate(&self, owner_id: &str) {
        self.cache.invalidate(owner_id).await;
    }
}

impl<P: QuotaLimitProvider> QuotaLimitProvider for CachedLimitProvider<P> {
    async fn limit_for(&self, owner_id: &str) -> Result<i64, AppError> {
        if let Some(limit) = self.cache.get(owner_id).await {
            return Ok(limit);
        }
        let limit = self.inner.limit_for(owner_id).await?;
        self.cache.insert(owner_id.to_string(), limit).await;
        Ok(limit)
    }
}
