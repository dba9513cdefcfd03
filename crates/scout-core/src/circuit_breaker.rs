//! Circuit breaker for content provider calls.
//!
//! One breaker per platform. After `failure_threshold` consecutive
//! provider-side failures the breaker opens and rejects calls without
//! touching the provider until `cooldown` elapses. The next call is a probe:
//! success closes the breaker, failure reopens it.
//!
//! ```text
//! Closed --[threshold failures]--> Open --[cooldown]--> HalfOpen --[ok]--> Closed
//!                                   ^                      |
//!                                   +------[failure]-------+
//! ```
//!
//! A rejected call surfaces as [`BreakerError::Open`], which the orchestrator
//! handles like any other transient provider failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::error::AppError;
use crate::models::Platform;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// Successful probes needed to close again.
    pub success_threshold: u32,
    pub cooldown: Duration,
    /// Rate limiting multiplies the cooldown by this factor, up to `max_cooldown`.
    pub rate_limit_multiplier: u32,
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            cooldown: Duration::from_secs(30),
            rate_limit_multiplier: 2,
            max_cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}

#[derive(Debug, Error)]
pub enum BreakerError {
    #[error("{platform} circuit open, retry in {}s", retry_after.as_secs())]
    Open {
        platform: Platform,
        retry_after: Duration,
    },
    #[error(transparent)]
    Inner(#[from] AppError),
}

impl BreakerError {
    /// Collapse into the provider error vocabulary; an open circuit is transient.
    pub fn into_app_error(self) -> AppError {
        match self {
            BreakerError::Open { .. } => AppError::transient(self.to_string()),
            BreakerError::Inner(e) => e,
        }
    }
}

#[derive(Debug)]
enum Phase {
    Closed { failures: u32 },
    Open { since: Instant, cooldown: Duration },
    HalfOpen { successes: u32, cooldown: Duration },
}

#[derive(Clone)]
pub struct CircuitBreaker {
    platform: Platform,
    config: CircuitBreakerConfig,
    phase: Arc<Mutex<Phase>>,
}

impl CircuitBreaker {
    pub fn new(platform: Platform, config: CircuitBreakerConfig) -> Self {
        Self {
            platform,
            config,
            phase: Arc::new(Mutex::new(Phase::Closed { failures: 0 })),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(platform = %self.platform, "Recovered from poisoned breaker lock");
            poisoned.into_inner()
        })
    }

    pub fn state(&self) -> CircuitState {
        let mut phase = self.lock();
        self.refresh(&mut phase);
        match *phase {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Run `operation` unless the circuit is open.
    ///
    /// Only errors for which [`AppError::should_trip_circuit`] holds count as
    /// failures; a permanent "bad term" answer means the provider is healthy.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        {
            let mut phase = self.lock();
            self.refresh(&mut phase);
            if let Phase::Open { since, cooldown } = *phase {
                return Err(BreakerError::Open {
                    platform: self.platform,
                    retry_after: cooldown.saturating_sub(since.elapsed()),
                });
            }
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                if e.should_trip_circuit() {
                    self.record_failure(&e);
                } else {
                    self.record_success();
                }
                Err(BreakerError::Inner(e))
            }
        }
    }

    pub fn record_success(&self) {
        let mut phase = self.lock();
        match *phase {
            Phase::Closed { .. } => *phase = Phase::Closed { failures: 0 },
            Phase::HalfOpen { successes, cooldown } => {
                let successes = successes + 1;
                if successes >= self.config.success_threshold {
                    tracing::info!(platform = %self.platform, "Provider circuit closed");
                    *phase = Phase::Closed { failures: 0 };
                } else {
                    *phase = Phase::HalfOpen { successes, cooldown };
                }
            }
            Phase::Open { .. } => {}
        }
    }

    pub fn record_failure(&self, error: &AppError) {
        let mut phase = self.lock();
        let rate_limited = matches!(
            error,
            AppError::RateLimitExceeded
                | AppError::ProviderError {
                    status_code: Some(429),
                    ..
                }
        );

        match *phase {
            Phase::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.config.failure_threshold {
                    let cooldown = self.next_cooldown(self.config.cooldown, rate_limited);
                    tracing::warn!(
                        platform = %self.platform,
                        failures,
                        cooldown_secs = cooldown.as_secs(),
                        error = %error,
                        "Provider circuit opened"
                    );
                    *phase = Phase::Open {
                        since: Instant::now(),
                        cooldown,
                    };
                } else {
                    *phase = Phase::Closed { failures };
                }
            }
            Phase::HalfOpen { cooldown, .. } => {
                let cooldown = self.next_cooldown(cooldown, rate_limited);
                tracing::warn!(platform = %self.platform, error = %error, "Provider probe failed");
                *phase = Phase::Open {
                    since: Instant::now(),
                    cooldown,
                };
            }
            Phase::Open { .. } => {}
        }
    }

    fn next_cooldown(&self, current: Duration, rate_limited: bool) -> Duration {
        if rate_limited {
            current
                .saturating_mul(self.config.rate_limit_multiplier)
                .min(self.config.max_cooldown)
        } else {
            current
        }
    }

    fn refresh(&self, phase: &mut Phase) {
        if let Phase::Open { since, cooldown } = *phase
            && since.elapsed() >= cooldown
        {
            tracing::info!(platform = %self.platform, "Provider circuit half-open");
            *phase = Phase::HalfOpen {
                successes: 0,
                cooldown,
            };
        }
    }
}

/// One breaker per platform, shared by clones.
#[derive(Clone)]
pub struct ProviderBreakers {
    breakers: Arc<HashMap<Platform, CircuitBreaker>>,
}

impl ProviderBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let breakers = [Platform::TikTok, Platform::Instagram, Platform::YouTube]
            .into_iter()
            .map(|p| (p, CircuitBreaker::new(p, config.clone())))
            .collect();
        Self {
            breakers: Arc::new(breakers),
        }
    }

    pub fn get(&self, platform: Platform) -> CircuitBreaker {
        self.breakers
            .get(&platform)
            .cloned()
            .unwrap_or_else(|| CircuitBreaker::new(platform, CircuitBreakerConfig::default()))
    }
}

impl Default for ProviderBreakers {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
