use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Platform, SearchMode};

/// Default wall-clock budget for a whole job.
pub const DEFAULT_JOB_TIMEOUT: TimeDelta = TimeDelta::hours(1);

/// Persisted status of a search job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
    Cancelled,
    Timeout,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Error,
        JobStatus::Cancelled,
        JobStatus::Timeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled | JobStatus::Timeout
        )
    }

    /// Edges of the job state machine. Terminal states have none.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing | Cancelled | Timeout | Error)
                | (Processing, Completed | Error | Timeout | Cancelled)
        )
    }

    /// Stored statuses from which a job may move to `next`. Stores guard
    /// their status writes with this list.
    pub fn sources_of(next: JobStatus) -> Vec<&'static str> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .map(|from| from.as_str())
            .collect()
    }

    /// Terminal status recorded for a permanent failure.
    pub fn for_failure(error: &AppError) -> JobStatus {
        match error {
            AppError::TimeoutExceeded => JobStatus::Timeout,
            _ => JobStatus::Error,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            "cancelled" => Ok(JobStatus::Cancelled),
            "timeout" => Ok(JobStatus::Timeout),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Status as shown to users, which distinguishes partial completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportedStatus {
    Pending,
    Processing,
    Completed,
    CompletedPartial,
    Error,
    Cancelled,
    Timeout,
}

impl ReportedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportedStatus::Pending => "pending",
            ReportedStatus::Processing => "processing",
            ReportedStatus::Completed => "completed",
            ReportedStatus::CompletedPartial => "completed-partial",
            ReportedStatus::Error => "error",
            ReportedStatus::Cancelled => "cancelled",
            ReportedStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ReportedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-term continuation state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCursor {
    /// Opaque provider continuation token; `None` starts from the beginning.
    pub token: Option<String>,
    /// Provider reported there is nothing more for this term.
    pub exhausted: bool,
    /// Number of failed attempts (permanent errors or exhausted retries).
    pub failures: u32,
}

/// Continuation state of a job.
///
/// `seq` is bumped by exactly one on every accepted progress update and is
/// the token for optimistic concurrency control.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCursor {
    pub seq: u64,
    pub terms: BTreeMap<String, TermCursor>,
    pub refinement_attempts: u32,
}

impl JobCursor {
    pub fn term(&self, term: &str) -> Option<&TermCursor> {
        self.terms.get(term)
    }

    /// Successor cursor with `term` replaced via `update`.
    pub fn advance(&self, term: &str, update: impl FnOnce(&mut TermCursor)) -> JobCursor {
        let mut next = self.clone();
        next.seq += 1;
        update(next.terms.entry(term.to_string()).or_default());
        next
    }
}

/// A search job persisted by the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchJob {
    pub id: Uuid,
    pub platform: Platform,
    pub search_mode: SearchMode,
    pub keywords: Vec<String>,
    pub target_handle: Option<String>,
    pub target_result_count: u32,
    pub status: JobStatus,
    pub cursor: Option<JobCursor>,
    pub processed_batches: u32,
    pub processed_result_count: u32,
    pub per_keyword_counts: BTreeMap<String, u32>,
    pub attempted_keywords: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl SearchJob {
    /// Search terms in input order.
    ///
    /// Similar-mode jobs have a single term: the target handle.
    pub fn terms(&self) -> Vec<&str> {
        match self.search_mode {
            SearchMode::Keyword => self.keywords.iter().map(String::as_str).collect(),
            SearchMode::Similar => self.target_handle.as_deref().into_iter().collect(),
        }
    }

    pub fn cursor_seq(&self) -> u64 {
        self.cursor.as_ref().map_or(0, |c| c.seq)
    }

    pub fn term_cursor(&self, term: &str) -> Option<&TermCursor> {
        self.cursor.as_ref().and_then(|c| c.term(term))
    }

    pub fn count_for(&self, term: &str) -> u32 {
        self.per_keyword_counts.get(term).copied().unwrap_or(0)
    }

    pub fn is_target_reached(&self) -> bool {
        self.processed_result_count >= self.target_result_count
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.timeout_at
    }

    /// Completion percentage, truncated and capped at 100.
    pub fn progress(&self) -> u8 {
        if self.target_result_count == 0 {
            return 100;
        }
        let pct = u64::from(self.processed_result_count) * 100
            / u64::from(self.target_result_count);
        pct.min(100) as u8
    }

    pub fn reported_status(&self) -> ReportedStatus {
        match self.status {
            JobStatus::Pending => ReportedStatus::Pending,
            JobStatus::Processing => ReportedStatus::Processing,
            JobStatus::Completed if self.is_target_reached() => ReportedStatus::Completed,
            JobStatus::Completed => ReportedStatus::CompletedPartial,
            JobStatus::Timeout if self.processed_result_count > 0 => {
                ReportedStatus::CompletedPartial
            }
            JobStatus::Timeout => ReportedStatus::Timeout,
            JobStatus::Error => ReportedStatus::Error,
            JobStatus::Cancelled => ReportedStatus::Cancelled,
        }
    }
}

/// Request to create a new search job.
#[derive(Debug, Clone)]
pub struct CreateSearchJobRequest {
    pub platform: Platform,
    pub search_mode: SearchMode,
    pub keywords: Vec<String>,
    pub target_handle: Option<String>,
    pub target_result_count: u32,
    pub timeout: Option<TimeDelta>,
}

impl CreateSearchJobRequest {
    pub fn keywords<I, S>(platform: Platform, keywords: I, target_result_count: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            platform,
            search_mode: SearchMode::Keyword,
            keywords: keywords.into_iter().map(Into::into).collect(),
            target_handle: None,
            target_result_count,
            timeout: None,
        }
    }

    pub fn similar(
        platform: Platform,
        target_handle: impl Into<String>,
        target_result_count: u32,
    ) -> Self {
        Self {
            platform,
            search_mode: SearchMode::Similar,
            keywords: Vec::new(),
            target_handle: Some(target_handle.into()),
            target_result_count,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: TimeDelta) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validate and normalize the request.
    ///
    /// Keywords are trimmed, blanks dropped and case-insensitive duplicates
    /// removed, keeping the first occurrence so input order is preserved.
    pub fn normalized(mut self, max_target: u32) -> Result<Self, AppError> {
        if self.target_result_count == 0 {
            return Err(AppError::InvalidRequest(
                "target_result_count must be at least 1".into(),
            ));
        }
        if self.target_result_count > max_target {
            return Err(AppError::InvalidRequest(format!(
                "target_result_count must not exceed {max_target}"
            )));
        }

        match self.search_mode {
            SearchMode::Keyword => {
                let mut seen = HashSet::new();
                self.keywords = self
                    .keywords
                    .iter()
                    .map(|k| k.trim())
                    .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
                    .map(str::to_string)
                    .collect();
                if self.keywords.is_empty() {
                    return Err(AppError::InvalidRequest(
                        "keyword search needs at least one keyword".into(),
                    ));
                }
                self.target_handle = None;
            }
            SearchMode::Similar => {
                let handle = self
                    .target_handle
                    .as_deref()
                    .map(|h| h.trim().trim_start_matches('@'))
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| {
                        AppError::InvalidRequest("similar search needs a target_handle".into())
                    })?
                    .to_string();
                self.target_handle = Some(handle);
                self.keywords.clear();
            }
        }

        Ok(self)
    }

    /// Search terms of the request, in input order.
    pub fn terms(&self) -> Vec<String> {
        match self.search_mode {
            SearchMode::Keyword => self.keywords.clone(),
            SearchMode::Similar => self.target_handle.iter().cloned().collect(),
        }
    }
}

/// Exponential backoff for redelivery and transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryConfig {
    /// Delay for a given attempt number (1-indexed): base, 2x, 4x ... capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        std::cmp::min(delay, self.max_delay)
    }
}

/// Configuration for a relay worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    /// How long a claimed delivery stays invisible before redelivery.
    pub visibility_timeout: Duration,
    /// Deliveries after which a failing message is dead-lettered.
    pub max_deliveries: u32,
    pub retry_config: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            poll_interval: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(60),
            max_deliveries: 5,
            retry_config: RetryConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_deliveries(mut self, max: u32) -> Self {
        self.max_deliveries = max;
        self
    }
}
