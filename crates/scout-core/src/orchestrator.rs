//! Continuation-driven execution of search jobs.
//!
//! A job never runs as one long task. Each delivery of a
//! [`ContinuationMessage`] executes exactly one bounded [`Orchestrator::step`]:
//! load the job, plan one unit of work, call the provider once, merge and
//! persist the delta, then either finish the job or schedule the next
//! continuation. All durable state lives in the [`JobStore`]; the
//! orchestrator itself holds nothing between steps.
//!
//! Duplicate and concurrent deliveries are safe. Every progress update is
//! conditional on the cursor `seq` read at the start of the step, so at
//! most one of two racing steps is applied and the loser discards its work.

use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreakerConfig, ProviderBreakers};
use crate::dedup;
use crate::error::AppError;
use crate::job::{
    CreateSearchJobRequest, DEFAULT_JOB_TIMEOUT, JobStatus, RetryConfig, SearchJob,
};
use crate::job_store::{JobStore, ProgressUpdate};
use crate::planner::{self, Phase, PlanDecision, PlannerConfig, WorkUnit};
use crate::relay::{ContinuationMessage, MessageRelay};
use crate::traits::{AdapterFactory, BatchPage, BatchRequest, PlatformAdapter};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Fixed delay between a successful step and the next one.
    pub continuation_delay: Duration,
    /// Wall-clock bound on a single provider call.
    pub step_budget: Duration,
    /// Backoff for re-sending a continuation after a transient failure.
    pub transient_backoff: RetryConfig,
    pub max_transient_retries: u32,
    pub max_target_results: u32,
    pub job_timeout: chrono::TimeDelta,
    pub planner: PlannerConfig,
    pub breaker: CircuitBreakerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            continuation_delay: Duration::from_secs(2),
            step_budget: Duration::from_secs(25),
            transient_backoff: RetryConfig {
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(120),
            },
            max_transient_retries: 5,
            max_target_results: 1000,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            planner: PlannerConfig::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// What a single step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Job does not exist.
    Missing,
    /// Job was already terminal; nothing done.
    Skipped(JobStatus),
    /// Message carried a cursor `seq` the job has moved past. A continuation
    /// for the current `seq` was re-sent.
    Stale,
    /// Progress applied and the next continuation scheduled.
    Continued { delay: Duration },
    /// Transient provider failure; the same unit is retried later.
    Retrying { attempt: u32, delay: Duration },
    /// Another step advanced the job first; this step's work was discarded.
    Conflict,
    /// Job reached a terminal state during this step.
    Finished(JobStatus),
}

/// Events emitted while stepping a job.
#[derive(Debug, Clone)]
pub enum StepEvent<'a> {
    Started {
        job_id: Uuid,
        attempt: u32,
    },
    Skipped {
        job_id: Uuid,
        status: JobStatus,
    },
    Stale {
        job_id: Uuid,
        expected_seq: u64,
        current_seq: u64,
    },
    Planned {
        job_id: Uuid,
        unit: &'a WorkUnit,
    },
    BatchMerged {
        job_id: Uuid,
        term: &'a str,
        fetched: usize,
        accepted: usize,
        processed: u32,
        target: u32,
    },
    TermFailed {
        job_id: Uuid,
        term: &'a str,
        error: &'a AppError,
    },
    CursorReset {
        job_id: Uuid,
        term: &'a str,
    },
    Retrying {
        job_id: Uuid,
        attempt: u32,
        delay: Duration,
        error: &'a AppError,
    },
    Conflict {
        job_id: Uuid,
    },
    Finished {
        job_id: Uuid,
        status: JobStatus,
        processed: u32,
        target: u32,
    },
}

pub trait StepReporter: Send + Sync {
    fn report_step(&self, event: StepEvent<'_>) {
        let _ = event;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStepReporter;

impl StepReporter for TracingStepReporter {
    fn report_step(&self, event: StepEvent<'_>) {
        match event {
            StepEvent::Started { job_id, attempt } => {
                tracing::debug!(%job_id, attempt, "Step started");
            }
            StepEvent::Skipped { job_id, status } => {
                tracing::debug!(%job_id, %status, "Job already terminal, step skipped");
            }
            StepEvent::Stale {
                job_id,
                expected_seq,
                current_seq,
            } => {
                tracing::debug!(
                    %job_id,
                    expected_seq,
                    current_seq,
                    "Stale continuation replaced by one at the current seq"
                );
            }
            StepEvent::Planned { job_id, unit } => {
                tracing::debug!(
                    %job_id,
                    term = %unit.term,
                    requested = unit.requested,
                    phase = ?unit.phase,
                    "Planned unit"
                );
            }
            StepEvent::BatchMerged {
                job_id,
                term,
                fetched,
                accepted,
                processed,
                target,
            } => {
                tracing::info!(%job_id, %term, fetched, accepted, processed, target, "Batch merged");
            }
            StepEvent::TermFailed {
                job_id,
                term,
                error,
            } => {
                tracing::warn!(%job_id, %term, %error, "Term failed");
            }
            StepEvent::CursorReset { job_id, term } => {
                tracing::warn!(%job_id, %term, "Malformed cursor, term restarted");
            }
            StepEvent::Retrying {
                job_id,
                attempt,
                delay,
                error,
            } => {
                tracing::warn!(
                    %job_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "Transient provider failure, retry scheduled"
                );
            }
            StepEvent::Conflict { job_id } => {
                tracing::debug!(%job_id, "Concurrent step won, work discarded");
            }
            StepEvent::Finished {
                job_id,
                status,
                processed,
                target,
            } => {
                tracing::info!(%job_id, %status, processed, target, "Job finished");
            }
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator<S, R, F>
where
    S: JobStore,
    R: MessageRelay,
    F: AdapterFactory,
{
    store: S,
    relay: R,
    adapters: F,
    breakers: ProviderBreakers,
    config: OrchestratorConfig,
}

impl<S, R, F> Orchestrator<S, R, F>
where
    S: JobStore,
    R: MessageRelay,
    F: AdapterFactory,
{
    pub fn new(store: S, relay: R, adapters: F, config: OrchestratorConfig) -> Self {
        Self {
            store,
            relay,
            adapters,
            breakers: ProviderBreakers::new(config.breaker.clone()),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Validate and persist a new job, then schedule its first step.
    pub async fn submit(&self, request: CreateSearchJobRequest) -> Result<SearchJob, AppError> {
        let mut request = request.normalized(self.config.max_target_results)?;
        if request.timeout.is_none() {
            request.timeout = Some(self.config.job_timeout);
        }

        let job = self.store.create_job(request).await?;
        self.relay
            .send(ContinuationMessage::at(job.id, job.cursor_seq()), Duration::ZERO)
            .await?;

        tracing::info!(
            job_id = %job.id,
            platform = %job.platform,
            mode = %job.search_mode,
            terms = job.terms().len(),
            target = job.target_result_count,
            "Job submitted"
        );
        Ok(job)
    }

    /// Execute one bounded step for the job named in `message`.
    ///
    /// Store and relay failures are returned as errors so the delivery is
    /// retried; everything the provider does is absorbed into the outcome.
    pub async fn step<SR: StepReporter>(
        &self,
        message: &ContinuationMessage,
        reporter: &SR,
    ) -> Result<StepOutcome, AppError> {
        let job_id = message.job_id;
        reporter.report_step(StepEvent::Started {
            job_id,
            attempt: message.attempt,
        });

        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(StepOutcome::Missing);
        };
        if job.status.is_terminal() {
            reporter.report_step(StepEvent::Skipped {
                job_id,
                status: job.status,
            });
            return Ok(StepOutcome::Skipped(job.status));
        }
        if let Some(expected_seq) = message.seq
            && expected_seq != job.cursor_seq()
        {
            reporter.report_step(StepEvent::Stale {
                job_id,
                expected_seq,
                current_seq: job.cursor_seq(),
            });
            // The step that moved the cursor may have committed without
            // scheduling its successor. Re-sending at the current seq keeps
            // the job live; relays drop it if that continuation is queued.
            self.relay
                .send(
                    ContinuationMessage::at(job_id, job.cursor_seq()),
                    self.config.continuation_delay,
                )
                .await?;
            return Ok(StepOutcome::Stale);
        }

        if job.is_expired_at(Utc::now()) {
            self.store
                .fail_job(job_id, &AppError::TimeoutExceeded, true)
                .await?;
            return Ok(self.finished(&job, JobStatus::Timeout, reporter));
        }

        let job = if job.status == JobStatus::Pending {
            self.store.mark_processing(job_id).await?;
            match self.store.get_job(job_id).await? {
                Some(job) => job,
                None => return Ok(StepOutcome::Missing),
            }
        } else {
            job
        };
        if job.status != JobStatus::Processing {
            return Ok(StepOutcome::Skipped(job.status));
        }

        let unit = match planner::plan(&job, &self.config.planner) {
            PlanDecision::Fetch(unit) => unit,
            PlanDecision::TargetReached | PlanDecision::Exhausted => {
                return self.finish(&job, reporter).await;
            }
        };
        reporter.report_step(StepEvent::Planned {
            job_id,
            unit: &unit,
        });

        let adapter = match self.adapters.adapter_for(job.platform, job.search_mode) {
            Ok(adapter) => adapter,
            Err(e) => {
                self.store.fail_job(job_id, &e, true).await?;
                return Ok(self.finished(&job, JobStatus::Error, reporter));
            }
        };

        let has_token = job
            .term_cursor(&unit.term)
            .is_some_and(|c| c.token.is_some());

        match self.fetch(&adapter, &job, &unit).await {
            Ok(page) => self.apply_page(&job, &unit, page, reporter).await,
            Err(AppError::MalformedCursor(_)) if has_token => {
                reporter.report_step(StepEvent::CursorReset {
                    job_id,
                    term: &unit.term,
                });
                let update =
                    self.update_for(&job, &unit.term, Vec::new(), None, |t| t.token = None);
                self.apply_update(&job, update, reporter).await
            }
            Err(e) if e.is_retryable() && message.attempt < self.config.max_transient_retries => {
                let retry = message.retry();
                let delay = self.config.transient_backoff.delay_for_attempt(retry.attempt);
                reporter.report_step(StepEvent::Retrying {
                    job_id,
                    attempt: retry.attempt,
                    delay,
                    error: &e,
                });
                self.relay.send(retry, delay).await?;
                Ok(StepOutcome::Retrying {
                    attempt: retry.attempt,
                    delay,
                })
            }
            Err(e) => {
                reporter.report_step(StepEvent::TermFailed {
                    job_id,
                    term: &unit.term,
                    error: &e,
                });
                let mut update = self.update_for(
                    &job,
                    &unit.term,
                    Vec::new(),
                    Some(unit.phase),
                    |t| t.failures += 1,
                );
                update.last_error = Some(e.to_string());
                self.apply_update(&job, update, reporter).await
            }
        }
    }

    async fn fetch(
        &self,
        adapter: &F::Adapter,
        job: &SearchJob,
        unit: &WorkUnit,
    ) -> Result<BatchPage, AppError> {
        let request = BatchRequest {
            mode: job.search_mode,
            term: unit.term.clone(),
            cursor: job
                .term_cursor(&unit.term)
                .and_then(|c| c.token.clone()),
            limit: unit.requested,
        };

        let breaker = self.breakers.get(job.platform);
        let call = breaker.call(|| adapter.fetch_batch(&request));
        match tokio::time::timeout(self.config.step_budget, call).await {
            Ok(result) => result.map_err(|e| e.into_app_error()),
            Err(_) => Err(AppError::Timeout(self.config.step_budget.as_secs())),
        }
    }

    async fn apply_page<SR: StepReporter>(
        &self,
        job: &SearchJob,
        unit: &WorkUnit,
        page: BatchPage,
        reporter: &SR,
    ) -> Result<StepOutcome, AppError> {
        let fetched = page.items.len();
        let mut seen = self.store.identities(job.id).await?;
        let mut fresh = dedup::merge(&mut seen, page.items);

        // The unit size only shapes the request. Anything unique the
        // provider returned is kept, up to the target.
        let room = job
            .target_result_count
            .saturating_sub(job.processed_result_count);
        fresh.truncate(room as usize);
        let accepted = fresh.len();

        let exhausted = page.exhausted || page.next_cursor.is_none();
        let next_token = page.next_cursor;
        let update = self.update_for(job, &unit.term, fresh, Some(unit.phase), |t| {
            t.token = next_token;
            t.exhausted = exhausted;
        });

        reporter.report_step(StepEvent::BatchMerged {
            job_id: job.id,
            term: &unit.term,
            fetched,
            accepted,
            processed: job.processed_result_count + accepted as u32,
            target: job.target_result_count,
        });
        self.apply_update(job, update, reporter).await
    }

    /// Build the progress update for one finished unit of `term`.
    ///
    /// `phase` is set when the unit counts as an attempt: a coverage unit
    /// marks the term attempted, a refinement unit spends refinement budget.
    fn update_for(
        &self,
        job: &SearchJob,
        term: &str,
        items: Vec<crate::models::Entity>,
        phase: Option<Phase>,
        edit: impl FnOnce(&mut crate::job::TermCursor),
    ) -> ProgressUpdate {
        let mut cursor = job.cursor.clone().unwrap_or_default().advance(term, edit);
        if phase == Some(Phase::Refinement) {
            cursor.refinement_attempts += 1;
        }
        ProgressUpdate {
            expected_seq: job.cursor_seq(),
            cursor,
            term: term.to_string(),
            items,
            attempted: (phase == Some(Phase::Coverage)).then(|| term.to_string()),
            last_error: None,
        }
    }

    async fn apply_update<SR: StepReporter>(
        &self,
        job: &SearchJob,
        update: ProgressUpdate,
        reporter: &SR,
    ) -> Result<StepOutcome, AppError> {
        let updated = match self.store.update_progress(job.id, update).await {
            Ok(updated) => updated,
            Err(AppError::ConcurrencyConflict { .. }) => {
                reporter.report_step(StepEvent::Conflict { job_id: job.id });
                return Ok(StepOutcome::Conflict);
            }
            Err(e) => return Err(e),
        };

        match planner::plan(&updated, &self.config.planner) {
            PlanDecision::Fetch(_) => {
                let delay = self.config.continuation_delay;
                self.relay
                    .send(
                        ContinuationMessage::at(updated.id, updated.cursor_seq()),
                        delay,
                    )
                    .await?;
                Ok(StepOutcome::Continued { delay })
            }
            PlanDecision::TargetReached | PlanDecision::Exhausted => {
                self.finish(&updated, reporter).await
            }
        }
    }

    /// Terminate a job that has nothing left to do.
    async fn finish<SR: StepReporter>(
        &self,
        job: &SearchJob,
        reporter: &SR,
    ) -> Result<StepOutcome, AppError> {
        if job.processed_result_count == 0 && planner::all_terms_failed(job) {
            let error = AppError::permanent("every search term failed");
            self.store.fail_job(job.id, &error, true).await?;
            return Ok(self.finished(job, JobStatus::Error, reporter));
        }

        self.store.complete_job(job.id).await?;
        Ok(self.finished(job, JobStatus::Completed, reporter))
    }

    fn finished<SR: StepReporter>(
        &self,
        job: &SearchJob,
        status: JobStatus,
        reporter: &SR,
    ) -> StepOutcome {
        reporter.report_step(StepEvent::Finished {
            job_id: job.id,
            status,
            processed: job.processed_result_count,
            target: job.target_result_count,
        });
        StepOutcome::Finished(status)
    }
}
