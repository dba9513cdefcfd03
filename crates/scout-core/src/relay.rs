use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Payload that asks the engine to run one more step of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationMessage {
    pub job_id: Uuid,
    /// Consecutive transient provider failures for the current unit of work.
    #[serde(default)]
    pub attempt: u32,
    /// Cursor `seq` the sender observed. A delivery whose `seq` no longer
    /// matches the job does no work; it is replaced by a continuation at the
    /// job's current `seq`. Absent for externally triggered steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl ContinuationMessage {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            attempt: 0,
            seq: None,
        }
    }

    /// Continuation expected to run against cursor `seq`.
    pub fn at(job_id: Uuid, seq: u64) -> Self {
        Self {
            job_id,
            attempt: 0,
            seq: Some(seq),
        }
    }

    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..*self
        }
    }
}

/// Producer side of the at-least-once, delay-capable message relay.
///
/// Relays may drop a message identical to one that is still queued or in
/// flight. Messages without a `seq` are never deduplicated.
pub trait MessageRelay: Send + Sync + Clone {
    fn send(
        &self,
        message: ContinuationMessage,
        delay: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A claimed, not yet acknowledged message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub message: ContinuationMessage,
    /// Times this message has been handed out, including this one.
    pub deliveries: u32,
}

/// Consumer side of the relay.
///
/// A claimed delivery that is neither acked nor nacked before its
/// visibility timeout becomes claimable again.
pub trait RelayConsumer: Send + Sync + Clone {
    fn claim(
        &self,
        worker_id: &str,
        visibility_timeout: Duration,
    ) -> impl Future<Output = Result<Option<Delivery>, AppError>> + Send;

    fn ack(&self, delivery_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Return a failed delivery. `Some(delay)` schedules redelivery;
    /// `None` dead-letters it.
    fn nack(
        &self,
        delivery_id: Uuid,
        error: &str,
        retry_in: Option<Duration>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Make every delivery held by `worker_id` claimable again.
    fn release_worker(&self, worker_id: &str)
    -> impl Future<Output = Result<u64, AppError>> + Send;
}
