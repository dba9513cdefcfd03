//! Test utilities: in-memory and scripted implementations of the core traits.
//!
//! All mocks share state through `Arc<Mutex<_>>` so a test can keep a clone
//! for assertions while the code under test owns another.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::dedup::IdentitySet;
use crate::error::AppError;
use crate::job::{
    CreateSearchJobRequest, DEFAULT_JOB_TIMEOUT, JobStatus, SearchJob,
};
use crate::job_store::{JobStore, ProgressUpdate};
use crate::models::{EnrichmentCacheEntry, Entity, Platform, SearchMode, UNLIMITED};
use crate::orchestrator::{StepEvent, StepReporter};
use crate::relay::{ContinuationMessage, Delivery, MessageRelay, RelayConsumer};
use crate::traits::{
    AdapterFactory, BatchPage, BatchRequest, Clock, EnrichmentFetcher, EnrichmentStore,
    PlatformAdapter, QuotaDecision, QuotaLimitProvider,
};
use crate::worker::{WorkerEvent, WorkerReporter};

/// Keyword job in `pending` with zeroed counters and a one-hour deadline.
pub fn make_test_job(keywords: &[&str], target: u32) -> SearchJob {
    let now = Utc::now();
    SearchJob {
        id: Uuid::new_v4(),
        platform: Platform::TikTok,
        search_mode: SearchMode::Keyword,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        target_handle: None,
        target_result_count: target,
        status: JobStatus::Pending,
        cursor: None,
        processed_batches: 0,
        processed_result_count: 0,
        per_keyword_counts: keywords.iter().map(|k| (k.to_string(), 0)).collect(),
        attempted_keywords: BTreeSet::new(),
        created_at: now,
        updated_at: now,
        started_at: None,
        completed_at: None,
        timeout_at: now + DEFAULT_JOB_TIMEOUT,
        last_error: None,
    }
}

/// `count` distinct TikTok entities with ids `{prefix}-0`, `{prefix}-1`, ...
pub fn entities(prefix: &str, count: usize) -> Vec<Entity> {
    (0..count)
        .map(|i| {
            Entity::new(
                Platform::TikTok,
                format!("{prefix}-{i}"),
                serde_json::json!({ "rank": i }),
            )
            .with_handle(format!("{prefix}_creator_{i}"))
        })
        .collect()
}

pub fn page(items: &[Entity], next_cursor: Option<&str>, exhausted: bool) -> BatchPage {
    BatchPage {
        items: items.to_vec(),
        next_cursor: next_cursor.map(str::to_string),
        exhausted,
    }
}

/// `AppError` is not `Clone`; rebuild the variants tests script.
fn replay(error: &AppError) -> AppError {
    match error {
        AppError::ProviderError {
            message,
            status_code,
            retryable,
        } => AppError::ProviderError {
            message: message.clone(),
            status_code: *status_code,
            retryable: *retryable,
        },
        AppError::RateLimitExceeded => AppError::RateLimitExceeded,
        AppError::Timeout(secs) => AppError::Timeout(*secs),
        AppError::NetworkError(msg) => AppError::NetworkError(msg.clone()),
        AppError::MalformedCursor(msg) => AppError::MalformedCursor(msg.clone()),
        AppError::DatabaseError(msg) => AppError::DatabaseError(msg.clone()),
        other => AppError::Generic(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// MockJobStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    jobs: HashMap<Uuid, SearchJob>,
    results: HashMap<Uuid, Vec<Entity>>,
    read_error: Option<String>,
}

/// In-memory job store with the same conditional-update rules as the
/// database implementation.
#[derive(Clone, Default)]
pub struct MockJobStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: SearchJob) -> SearchJob {
        self.state.lock().unwrap().jobs.insert(job.id, job.clone());
        job
    }

    /// Panics if the job does not exist.
    pub fn job(&self, id: Uuid) -> SearchJob {
        self.state.lock().unwrap().jobs[&id].clone()
    }

    pub fn modify(&self, id: Uuid, edit: impl FnOnce(&mut SearchJob)) {
        let mut state = self.state.lock().unwrap();
        edit(state.jobs.get_mut(&id).expect("job exists"));
    }

    pub fn results_for(&self, id: Uuid) -> Vec<Entity> {
        self.state
            .lock()
            .unwrap()
            .results
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Make every subsequent `get_job` fail with a database error.
    pub fn fail_reads(&self, message: &str) {
        self.state.lock().unwrap().read_error = Some(message.to_string());
    }
}

impl JobStore for MockJobStore {
    async fn create_job(&self, request: CreateSearchJobRequest) -> Result<SearchJob, AppError> {
        let now = Utc::now();
        let job = SearchJob {
            id: Uuid::new_v4(),
            platform: request.platform,
            search_mode: request.search_mode,
            per_keyword_counts: request.terms().into_iter().map(|t| (t, 0)).collect(),
            keywords: request.keywords,
            target_handle: request.target_handle,
            target_result_count: request.target_result_count,
            status: JobStatus::Pending,
            cursor: None,
            processed_batches: 0,
            processed_result_count: 0,
            attempted_keywords: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            timeout_at: now + request.timeout.unwrap_or(DEFAULT_JOB_TIMEOUT),
            last_error: None,
        };
        Ok(self.insert(job))
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<SearchJob>, AppError> {
        let state = self.state.lock().unwrap();
        if let Some(msg) = &state.read_error {
            return Err(AppError::DatabaseError(msg.clone()));
        }
        Ok(state.jobs.get(&job_id).cloned())
    }

    async fn mark_processing(&self, job_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status.can_transition_to(JobStatus::Processing) => {
                job.status = JobStatus::Processing;
                job.started_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        update: ProgressUpdate,
    ) -> Result<SearchJob, AppError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;

        if job.status != JobStatus::Processing || job.cursor_seq() != update.expected_seq {
            return Err(AppError::ConcurrencyConflict { job_id });
        }

        let delta = update.delta();
        job.cursor = Some(update.cursor);
        job.processed_batches += 1;
        job.processed_result_count += delta;
        *job.per_keyword_counts.entry(update.term).or_default() += delta;
        if let Some(term) = update.attempted {
            job.attempted_keywords.insert(term);
        }
        if update.last_error.is_some() {
            job.last_error = update.last_error;
        }
        job.updated_at = Utc::now();

        state.results.entry(job_id).or_default().extend(update.items);
        Ok(job.clone())
    }

    async fn complete_job(&self, job_id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id)
            && job.status.can_transition_to(JobStatus::Completed)
        {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &AppError, permanent: bool) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.last_error = Some(error.to_string());
            let next = JobStatus::for_failure(error);
            if permanent && job.status.can_transition_to(next) {
                job.status = next;
                job.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status.can_transition_to(JobStatus::Cancelled) => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<SearchJob>, AppError> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn identities(&self, job_id: Uuid) -> Result<IdentitySet, AppError> {
        Ok(self
            .results_for(job_id)
            .iter()
            .map(Entity::identity)
            .collect())
    }

    async fn results(&self, job_id: Uuid, limit: usize) -> Result<Vec<Entity>, AppError> {
        Ok(self.results_for(job_id).into_iter().take(limit).collect())
    }
}

// ---------------------------------------------------------------------------
// MockRelay
// ---------------------------------------------------------------------------

struct Queued {
    id: Uuid,
    message: ContinuationMessage,
    delay: Duration,
    deliveries: u32,
    holder: Option<String>,
}

#[derive(Default)]
struct RelayState {
    ready: VecDeque<Queued>,
    in_flight: Vec<Queued>,
    delayed: Vec<Queued>,
    dead: Vec<Queued>,
    acked: Vec<Uuid>,
    nacked: Vec<(Uuid, Option<Duration>)>,
    released_by: Vec<String>,
    failing_sends: u32,
}

impl RelayState {
    fn is_live(&self, message: &ContinuationMessage) -> bool {
        message.seq.is_some()
            && self
                .ready
                .iter()
                .chain(&self.in_flight)
                .chain(&self.delayed)
                .any(|q| q.message == *message)
    }
}

/// Relay that ignores delays: every sent message is immediately claimable.
/// Nacked messages wait until [`MockRelay::make_visible`].
#[derive(Clone, Default)]
pub struct MockRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MockRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: ContinuationMessage) {
        self.enqueue(message, Duration::ZERO);
    }

    fn enqueue(&self, message: ContinuationMessage, delay: Duration) {
        self.state.lock().unwrap().ready.push_back(Queued {
            id: Uuid::new_v4(),
            message,
            delay,
            deliveries: 0,
            holder: None,
        });
    }

    /// Take the oldest ready message with the delay it was sent with.
    pub fn pop(&self) -> Option<(ContinuationMessage, Duration)> {
        let mut state = self.state.lock().unwrap();
        state.ready.pop_front().map(|q| (q.message, q.delay))
    }

    pub fn make_visible(&self) {
        let mut state = self.state.lock().unwrap();
        let delayed = std::mem::take(&mut state.delayed);
        state.ready.extend(delayed);
    }

    pub fn acked(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().acked.clone()
    }

    pub fn nacked(&self) -> Vec<(Uuid, Option<Duration>)> {
        self.state.lock().unwrap().nacked.clone()
    }

    pub fn dead_letters(&self) -> usize {
        self.state.lock().unwrap().dead.len()
    }

    pub fn released_by(&self) -> Vec<String> {
        self.state.lock().unwrap().released_by.clone()
    }

    /// Make the next `count` sends fail without enqueueing anything.
    pub fn fail_next_sends(&self, count: u32) {
        self.state.lock().unwrap().failing_sends = count;
    }

    /// Messages waiting, delayed or in flight.
    pub fn pending(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.ready.len() + state.delayed.len() + state.in_flight.len()
    }
}

impl MessageRelay for MockRelay {
    async fn send(&self, message: ContinuationMessage, delay: Duration) -> Result<(), AppError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.failing_sends > 0 {
                state.failing_sends -= 1;
                return Err(AppError::DatabaseError("relay unavailable".into()));
            }
            if state.is_live(&message) {
                return Ok(());
            }
        }
        self.enqueue(message, delay);
        Ok(())
    }
}

impl RelayConsumer for MockRelay {
    async fn claim(
        &self,
        worker_id: &str,
        _visibility_timeout: Duration,
    ) -> Result<Option<Delivery>, AppError> {
        let mut state = self.state.lock().unwrap();
        let Some(mut queued) = state.ready.pop_front() else {
            return Ok(None);
        };
        queued.deliveries += 1;
        queued.holder = Some(worker_id.to_string());
        let delivery = Delivery {
            id: queued.id,
            message: queued.message,
            deliveries: queued.deliveries,
        };
        state.in_flight.push(queued);
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery_id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.in_flight.retain(|q| q.id != delivery_id);
        state.acked.push(delivery_id);
        Ok(())
    }

    async fn nack(
        &self,
        delivery_id: Uuid,
        _error: &str,
        retry_in: Option<Duration>,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.nacked.push((delivery_id, retry_in));
        if let Some(pos) = state.in_flight.iter().position(|q| q.id == delivery_id) {
            let mut queued = state.in_flight.remove(pos);
            queued.holder = None;
            match retry_in {
                Some(delay) => {
                    queued.delay = delay;
                    state.delayed.push(queued);
                }
                None => state.dead.push(queued),
            }
        }
        Ok(())
    }

    async fn release_worker(&self, worker_id: &str) -> Result<u64, AppError> {
        let mut state = self.state.lock().unwrap();
        let (held, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.in_flight)
            .into_iter()
            .partition(|q| q.holder.as_deref() == Some(worker_id));
        state.in_flight = rest;
        let released = held.len() as u64;
        state.ready.extend(held);
        state.released_by.push(worker_id.to_string());
        Ok(released)
    }
}

// ---------------------------------------------------------------------------
// MockAdapter
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AdapterState {
    scripts: HashMap<String, VecDeque<Result<BatchPage, AppError>>>,
    always_fail: HashMap<String, AppError>,
    calls: HashMap<String, Vec<Option<String>>>,
    yield_first: bool,
}

/// Adapter answering from per-term scripts. An unscripted or drained term
/// returns an empty, exhausted page.
#[derive(Clone)]
pub struct MockAdapter {
    platform: Platform,
    state: Arc<Mutex<AdapterState>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            platform: Platform::TikTok,
            state: Arc::new(Mutex::new(AdapterState::default())),
        }
    }

    pub fn script(&self, term: &str, responses: Vec<Result<BatchPage, AppError>>) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry(term.to_string())
            .or_default()
            .extend(responses);
    }

    pub fn fail_always(&self, term: &str, error: AppError) {
        self.state
            .lock()
            .unwrap()
            .always_fail
            .insert(term.to_string(), error);
    }

    /// Yield to the runtime before answering, so concurrent steps interleave.
    pub fn set_yield(&self, enabled: bool) {
        self.state.lock().unwrap().yield_first = enabled;
    }

    pub fn calls_for(&self, term: &str) -> usize {
        self.cursors_for(term).len()
    }

    /// Cursor tokens received for `term`, in call order.
    pub fn cursors_for(&self, term: &str) -> Vec<Option<String>> {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(term)
            .cloned()
            .unwrap_or_default()
    }
}

impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn fetch_batch(&self, request: &BatchRequest) -> Result<BatchPage, AppError> {
        let yield_first = self.state.lock().unwrap().yield_first;
        if yield_first {
            tokio::task::yield_now().await;
        }

        let mut state = self.state.lock().unwrap();
        state
            .calls
            .entry(request.term.clone())
            .or_default()
            .push(request.cursor.clone());

        if let Some(error) = state.always_fail.get(&request.term) {
            return Err(replay(error));
        }
        state
            .scripts
            .get_mut(&request.term)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Ok(BatchPage {
                    exhausted: true,
                    ..Default::default()
                })
            })
    }
}

#[derive(Clone)]
pub struct MockAdapterFactory {
    adapter: MockAdapter,
}

impl MockAdapterFactory {
    pub fn new() -> Self {
        Self {
            adapter: MockAdapter::new(),
        }
    }

    /// Handle on the shared adapter state.
    pub fn adapter(&self) -> MockAdapter {
        self.adapter.clone()
    }
}

impl AdapterFactory for MockAdapterFactory {
    type Adapter = MockAdapter;

    fn adapter_for(&self, platform: Platform, _mode: SearchMode) -> Result<MockAdapter, AppError> {
        Ok(MockAdapter {
            platform,
            state: Arc::clone(&self.adapter.state),
        })
    }
}

// ---------------------------------------------------------------------------
// MockStepReporter
// ---------------------------------------------------------------------------

/// Records a compact string per event.
#[derive(Clone, Default)]
pub struct MockStepReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockStepReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl StepReporter for MockStepReporter {
    fn report_step(&self, event: StepEvent<'_>) {
        let line = match event {
            StepEvent::BatchMerged { term, accepted, .. } => format!("merged:{term}:{accepted}"),
            StepEvent::TermFailed { term, .. } => format!("failed:{term}"),
            StepEvent::CursorReset { term, .. } => format!("reset:{term}"),
            StepEvent::Retrying { attempt, .. } => format!("retrying:{attempt}"),
            StepEvent::Conflict { .. } => "conflict".into(),
            StepEvent::Finished { status, .. } => format!("finished:{status}"),
            StepEvent::Skipped { status, .. } => format!("skipped:{status}"),
            StepEvent::Stale { .. } => "stale".into(),
            StepEvent::Started { .. } | StepEvent::Planned { .. } => return,
        };
        self.events.lock().unwrap().push(line);
    }
}

impl WorkerReporter for MockStepReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        if let WorkerEvent::StepFailed { deliveries, .. } = event {
            self.events
                .lock()
                .unwrap()
                .push(format!("step-failed:{deliveries}"));
        }
    }
}

// ---------------------------------------------------------------------------
// Enrichment mocks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct EnrichmentState {
    cache: HashMap<(Platform, String), EnrichmentCacheEntry>,
    counters: BTreeMap<(String, String), i64>,
}

#[derive(Clone, Default)]
pub struct MockEnrichmentStore {
    state: Arc<Mutex<EnrichmentState>>,
}

impl MockEnrichmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, owner_id: &str, period_key: &str) -> i64 {
        self.state
            .lock()
            .unwrap()
            .counters
            .get(&(owner_id.to_string(), period_key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn cached(&self, platform: Platform, handle: &str) -> Option<EnrichmentCacheEntry> {
        self.state
            .lock()
            .unwrap()
            .cache
            .get(&(platform, handle.to_string()))
            .cloned()
    }
}

impl EnrichmentStore for MockEnrichmentStore {
    async fn get_cached(
        &self,
        platform: Platform,
        handle: &str,
    ) -> Result<Option<EnrichmentCacheEntry>, AppError> {
        Ok(self.cached(platform, handle))
    }

    async fn put_cached(&self, entry: &EnrichmentCacheEntry) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .cache
            .insert((entry.platform, entry.handle.clone()), entry.clone());
        Ok(())
    }

    async fn try_consume(
        &self,
        owner_id: &str,
        period_key: &str,
        limit: i64,
    ) -> Result<QuotaDecision, AppError> {
        let mut state = self.state.lock().unwrap();
        let count = state
            .counters
            .entry((owner_id.to_string(), period_key.to_string()))
            .or_insert(0);
        let accepted = limit == UNLIMITED || *count < limit;
        if accepted {
            *count += 1;
        }
        Ok(QuotaDecision {
            accepted,
            used: *count,
            limit,
        })
    }

    async fn usage(&self, owner_id: &str, period_key: &str) -> Result<i64, AppError> {
        Ok(self.count(owner_id, period_key))
    }
}

#[derive(Clone, Default)]
pub struct MockEnrichmentFetcher {
    calls: Arc<Mutex<u32>>,
    failures: Arc<Mutex<VecDeque<AppError>>>,
}

impl MockEnrichmentFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: AppError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl EnrichmentFetcher for MockEnrichmentFetcher {
    async fn fetch_profile(
        &self,
        platform: Platform,
        handle: &str,
    ) -> Result<serde_json::Value, AppError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(serde_json::json!({
            "platform": platform,
            "handle": handle,
            "followers": 1000 * call,
        }))
    }
}

#[derive(Clone)]
pub struct MockLimitProvider {
    limit: i64,
    lookups: Arc<Mutex<u32>>,
}

impl MockLimitProvider {
    pub fn new(limit: i64) -> Self {
        Self {
            limit,
            lookups: Arc::new(Mutex::new(0)),
        }
    }

    pub fn lookups(&self) -> u32 {
        *self.lookups.lock().unwrap()
    }
}

impl QuotaLimitProvider for MockLimitProvider {
    async fn limit_for(&self, _owner_id: &str) -> Result<i64, AppError> {
        *self.lookups.lock().unwrap() += 1;
        Ok(self.limit)
    }
}

/// Clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Utc::now())),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
