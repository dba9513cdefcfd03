//! Per-platform pacing of provider requests.
//!
//! Wraps an [`AdapterFactory`] so that every adapter it hands out shares one
//! "last request" clock per platform. Steps running concurrently for
//! different jobs on the same platform are spaced at least `min_interval`
//! apart (plus jitter); other platforms are unaffected.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::AppError;
use crate::models::{Platform, SearchMode};
use crate::traits::{AdapterFactory, BatchPage, BatchRequest, PlatformAdapter};

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub min_interval: Duration,
    /// Upper bound of the random extra delay.
    pub jitter: Duration,
}

impl ThrottleConfig {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    fn interval(&self) -> Duration {
        self.min_interval + Duration::from_millis(jitter_ms(self.jitter.as_millis() as u64))
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(250)).with_jitter(Duration::from_millis(100))
    }
}

type LastCalls = Arc<Mutex<HashMap<Platform, Instant>>>;

#[derive(Clone)]
pub struct ThrottledAdapterFactory<F> {
    inner: F,
    config: ThrottleConfig,
    last_calls: LastCalls,
}

impl<F: AdapterFactory> ThrottledAdapterFactory<F> {
    pub fn new(inner: F, config: ThrottleConfig) -> Self {
        Self {
            inner,
            config,
            last_calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<F: AdapterFactory> AdapterFactory for ThrottledAdapterFactory<F> {
    type Adapter = ThrottledAdapter<F::Adapter>;

    fn adapter_for(&self, platform: Platform, mode: SearchMode) -> Result<Self::Adapter, AppError> {
        Ok(ThrottledAdapter {
            inner: self.inner.adapter_for(platform, mode)?,
            config: self.config.clone(),
            last_calls: Arc::clone(&self.last_calls),
        })
    }
}

#[derive(Clone)]
pub struct ThrottledAdapter<A> {
    inner: A,
    config: ThrottleConfig,
    last_calls: LastCalls,
}

impl<A: PlatformAdapter> ThrottledAdapter<A> {
    /// Reserve the next slot for this platform and sleep until it arrives.
    ///
    /// The slot is recorded before sleeping so that concurrent callers queue
    /// up behind each other instead of all waking at once.
    async fn wait_turn(&self) {
        let platform = self.inner.platform();
        let wait = {
            let mut last_calls = self.last_calls.lock().await;
            let now = Instant::now();
            let slot = match last_calls.get(&platform) {
                Some(&last) => (last + self.config.interval()).max(now),
                None => now,
            };
            last_calls.insert(platform, slot);
            slot - now
        };

        if !wait.is_zero() {
            tracing::debug!(%platform, wait_ms = wait.as_millis() as u64, "Pacing provider request");
            tokio::time::sleep(wait).await;
        }
    }
}

impl<A: PlatformAdapter> PlatformAdapter for ThrottledAdapter<A> {
    fn platform(&self) -> Platform {
        self.inner.platform()
    }

    async fn fetch_batch(&self, request: &BatchRequest) -> Result<BatchPage, AppError> {
        self.wait_turn().await;
        self.inner.fetch_batch(request).await
    }
}

// xorshift seeded from the clock; jitter needs no real randomness.
fn jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64
        | 1;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
