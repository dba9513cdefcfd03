use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use scout_core::error::AppError;
use scout_core::job::{CreateSearchJobRequest, JobStatus, ReportedStatus, WorkerConfig};
use scout_core::job_store::JobStore;
use scout_core::models::{Entity, Platform, SearchMode};
use scout_core::orchestrator::{Orchestrator, OrchestratorConfig, StepOutcome, TracingStepReporter};
use scout_core::relay::{ContinuationMessage, MessageRelay, RelayConsumer};
use scout_core::traits::{AdapterFactory, BatchPage, BatchRequest, PlatformAdapter};
use scout_core::worker::{RelayWorker, TracingWorkerReporter};
use scout_db::{ContinuationRepository, SearchJobRepository};
use uuid::Uuid;

use crate::integration::common::setup_test_db;

/// Serves a fixed number of creators per term, paged by numeric offset.
#[derive(Clone)]
struct StockAdapter {
    stock: Arc<HashMap<String, usize>>,
}

impl StockAdapter {
    fn new(stock: &[(&str, usize)]) -> Self {
        Self {
            stock: Arc::new(stock.iter().map(|(t, n)| (t.to_string(), *n)).collect()),
        }
    }
}

impl PlatformAdapter for StockAdapter {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    async fn fetch_batch(&self, request: &BatchRequest) -> Result<BatchPage, AppError> {
        let offset = match &request.cursor {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| AppError::MalformedCursor(raw.clone()))?,
            None => 0,
        };
        let total = self.stock.get(&request.term).copied().unwrap_or(0);
        let end = total.min(offset + request.limit as usize);
        let items = (offset..end)
            .map(|i| {
                Entity::new(
                    Platform::TikTok,
                    format!("{}-{i}", request.term),
                    serde_json::json!({}),
                )
            })
            .collect();
        let next_cursor = (end < total).then(|| end.to_string());
        Ok(BatchPage {
            items,
            exhausted: next_cursor.is_none(),
            next_cursor,
        })
    }
}

impl AdapterFactory for StockAdapter {
    type Adapter = StockAdapter;

    fn adapter_for(&self, _platform: Platform, _mode: SearchMode) -> Result<StockAdapter, AppError> {
        Ok(self.clone())
    }
}

type PgOrchestrator = Orchestrator<SearchJobRepository, ContinuationRepository, StockAdapter>;

fn orchestrator(pool: sqlx::PgPool, adapter: StockAdapter) -> PgOrchestrator {
    let config = OrchestratorConfig {
        continuation_delay: Duration::ZERO,
        ..OrchestratorConfig::default()
    };
    Orchestrator::new(
        SearchJobRepository::new(pool.clone()),
        ContinuationRepository::new(pool),
        adapter,
        config,
    )
}

#[tokio::test]
async fn worker_drives_keyword_job_to_partial_completion() {
    let (pool, _container) = setup_test_db().await;
    let adapter = StockAdapter::new(&[("a", 90), ("b", 90), ("c", 40)]);
    let orchestrator = orchestrator(pool.clone(), adapter);
    let relay = ContinuationRepository::new(pool.clone());
    let store = SearchJobRepository::new(pool);

    let job = orchestrator
        .submit(CreateSearchJobRequest::keywords(Platform::TikTok, ["a", "b", "c"], 300))
        .await
        .unwrap();

    let config = WorkerConfig::default().with_worker_id("it-worker");
    let worker = RelayWorker::new(relay.clone(), orchestrator, config);
    for _ in 0..50 {
        let Some(delivery) = relay.claim("it-worker", Duration::from_secs(60)).await.unwrap()
        else {
            break;
        };
        worker.process(&delivery, &TracingWorkerReporter).await;
    }

    let job = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.reported_status(), ReportedStatus::CompletedPartial);
    assert_eq!(job.processed_result_count, 220);
    assert_eq!(job.progress(), 73);
    assert_eq!(job.count_for("a"), 90);
    assert_eq!(job.count_for("b"), 90);
    assert_eq!(job.count_for("c"), 40);
    assert_eq!(store.results(job.id, 1000).await.unwrap().len(), 220);
    assert_eq!(relay.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn duplicate_continuations_do_not_double_count() {
    let (pool, _container) = setup_test_db().await;
    let adapter = StockAdapter::new(&[("solo", 500)]);
    let orchestrator = orchestrator(pool.clone(), adapter);
    let store = SearchJobRepository::new(pool.clone());
    let relay = ContinuationRepository::new(pool);

    let job = orchestrator
        .submit(CreateSearchJobRequest::keywords(Platform::TikTok, ["solo"], 30))
        .await
        .unwrap();
    // A zero visibility timeout hands the same continuation out twice.
    let first = relay.claim("w1", Duration::ZERO).await.unwrap().unwrap();
    let second = relay.claim("w2", Duration::from_secs(60)).await.unwrap().unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.deliveries, 2);

    let (a, b) = tokio::join!(
        orchestrator.step(&first.message, &TracingStepReporter),
        orchestrator.step(&second.message, &TracingStepReporter),
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, StepOutcome::Finished(_) | StepOutcome::Continued { .. }))
        .count();
    assert_eq!(applied, 1, "{outcomes:?}");

    let job = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.processed_result_count, 30);
    assert_eq!(job.processed_batches, 1);
    assert_eq!(job.status, JobStatus::Completed);
}

/// Relay whose sends fail until switched back on.
#[derive(Clone)]
struct FlakyRelay {
    inner: ContinuationRepository,
    down: Arc<std::sync::atomic::AtomicBool>,
}

impl MessageRelay for FlakyRelay {
    async fn send(&self, message: ContinuationMessage, delay: Duration) -> Result<(), AppError> {
        if self.down.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AppError::DatabaseError("relay unavailable".into()));
        }
        self.inner.send(message, delay).await
    }
}

#[tokio::test]
async fn redelivery_recovers_a_lost_successor() {
    let (pool, _container) = setup_test_db().await;
    let relay = ContinuationRepository::new(pool.clone());
    let store = SearchJobRepository::new(pool);
    let flaky = FlakyRelay {
        inner: relay.clone(),
        down: Arc::new(std::sync::atomic::AtomicBool::new(false)),
    };
    let orchestrator = Orchestrator::new(
        store.clone(),
        flaky.clone(),
        StockAdapter::new(&[("a", 150), ("b", 20)]),
        OrchestratorConfig {
            continuation_delay: Duration::ZERO,
            ..OrchestratorConfig::default()
        },
    );

    let job = orchestrator
        .submit(CreateSearchJobRequest::keywords(Platform::TikTok, ["a", "b"], 100))
        .await
        .unwrap();
    let delivery = relay.claim("w", Duration::from_secs(60)).await.unwrap().unwrap();

    flaky.down.store(true, std::sync::atomic::Ordering::SeqCst);
    assert!(orchestrator.step(&delivery.message, &TracingStepReporter).await.is_err());
    flaky.down.store(false, std::sync::atomic::Ordering::SeqCst);
    relay.nack(delivery.id, "relay unavailable", Some(Duration::ZERO)).await.unwrap();

    let redelivered = relay.claim("w", Duration::from_secs(60)).await.unwrap().unwrap();
    let outcome = orchestrator
        .step(&redelivered.message, &TracingStepReporter)
        .await
        .unwrap();
    assert_eq!(outcome, StepOutcome::Stale);
    relay.ack(redelivered.id).await.unwrap();
    assert_eq!(relay.pending_count().await.unwrap(), 1);

    for _ in 0..20 {
        let Some(delivery) = relay.claim("w", Duration::from_secs(60)).await.unwrap() else {
            break;
        };
        orchestrator
            .step(&delivery.message, &TracingStepReporter)
            .await
            .unwrap();
        relay.ack(delivery.id).await.unwrap();
    }

    let job = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_result_count, 100);
}

#[tokio::test]
async fn step_for_unknown_job_is_missing() {
    let (pool, _container) = setup_test_db().await;
    let orchestrator = orchestrator(pool, StockAdapter::new(&[]));

    let outcome = orchestrator
        .step(
            &ContinuationMessage::new(Uuid::new_v4()),
            &TracingStepReporter,
        )
        .await
        .unwrap();
    assert_eq!(outcome, StepOutcome::Missing);
}
