use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::WorkerConfig;
use crate::job_store::JobStore;
use crate::orchestrator::{Orchestrator, StepEvent, StepOutcome, StepReporter, TracingStepReporter};
use crate::relay::{Delivery, MessageRelay, RelayConsumer};
use crate::traits::AdapterFactory;

/// Events emitted by the relay worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    Polling,
    Claimed {
        delivery: &'a Delivery,
    },
    Stepped {
        job_id: Uuid,
        outcome: &'a StepOutcome,
    },
    StepFailed {
        job_id: Uuid,
        error: &'a AppError,
        deliveries: u32,
        will_retry: bool,
    },
    ShuttingDown {
        worker_id: &'a str,
        released: u64,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Receives worker events and, through the supertrait, the step events of
/// every job the worker drives.
pub trait WorkerReporter: StepReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl StepReporter for TracingWorkerReporter {
    fn report_step(&self, event: StepEvent<'_>) {
        TracingStepReporter.report_step(event);
    }
}

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::trace!("Polling for continuations");
            }
            WorkerEvent::Claimed { delivery } => {
                tracing::debug!(
                    delivery_id = %delivery.id,
                    job_id = %delivery.message.job_id,
                    deliveries = delivery.deliveries,
                    "Continuation claimed"
                );
            }
            WorkerEvent::Stepped { job_id, outcome } => {
                tracing::debug!(%job_id, ?outcome, "Step done");
            }
            WorkerEvent::StepFailed {
                job_id,
                error,
                deliveries,
                will_retry,
            } => {
                tracing::warn!(%job_id, %error, deliveries, will_retry, "Step failed");
            }
            WorkerEvent::ShuttingDown {
                worker_id,
                released,
            } => {
                tracing::info!(%worker_id, released, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Polls the relay and runs one orchestrator step per delivery.
pub struct RelayWorker<C, S, R, F>
where
    C: RelayConsumer,
    S: JobStore,
    R: MessageRelay,
    F: AdapterFactory,
{
    consumer: C,
    orchestrator: Orchestrator<S, R, F>,
    config: WorkerConfig,
}

impl<C, S, R, F> RelayWorker<C, S, R, F>
where
    C: RelayConsumer,
    S: JobStore,
    R: MessageRelay,
    F: AdapterFactory,
{
    pub fn new(consumer: C, orchestrator: Orchestrator<S, R, F>, config: WorkerConfig) -> Self {
        Self {
            consumer,
            orchestrator,
            config,
        }
    }

    /// Run the worker loop until cancellation.
    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<(), AppError> {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
        });

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            reporter.report(WorkerEvent::Polling);

            match self
                .consumer
                .claim(&self.config.worker_id, self.config.visibility_timeout)
                .await
            {
                Ok(Some(delivery)) => {
                    reporter.report(WorkerEvent::Claimed {
                        delivery: &delivery,
                    });
                    self.process(&delivery, reporter).await;
                }
                Ok(None) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim continuation");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        let released = self
            .consumer
            .release_worker(&self.config.worker_id)
            .await
            .unwrap_or(0);

        reporter.report(WorkerEvent::ShuttingDown {
            worker_id: &self.config.worker_id,
            released,
        });
        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });

        Ok(())
    }

    /// Step the job and settle the delivery.
    ///
    /// A failed step is nacked for redelivery with backoff; once the
    /// delivery count reaches `max_deliveries` it is dead-lettered.
    pub async fn process<WR: WorkerReporter>(&self, delivery: &Delivery, reporter: &WR) {
        let job_id = delivery.message.job_id;

        match self.orchestrator.step(&delivery.message, reporter).await {
            Ok(outcome) => {
                reporter.report(WorkerEvent::Stepped {
                    job_id,
                    outcome: &outcome,
                });
                if let Err(e) = self.consumer.ack(delivery.id).await {
                    tracing::error!(%job_id, error = %e, "Failed to ack continuation");
                }
            }
            Err(e) => {
                let will_retry = delivery.deliveries < self.config.max_deliveries;
                reporter.report(WorkerEvent::StepFailed {
                    job_id,
                    error: &e,
                    deliveries: delivery.deliveries,
                    will_retry,
                });

                let retry_in = will_retry.then(|| {
                    self.config
                        .retry_config
                        .delay_for_attempt(delivery.deliveries)
                });
                if let Err(nack_err) = self
                    .consumer
                    .nack(delivery.id, &e.to_string(), retry_in)
                    .await
                {
                    tracing::error!(%job_id, error = %nack_err, "Failed to nack continuation");
                }
            }
        }
    }
}
