use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Content platforms Scout can search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    TikTok,
    Instagram,
    YouTube,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::TikTok => "tiktok",
            Platform::Instagram => "instagram",
            Platform::YouTube => "youtube",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tiktok" => Ok(Platform::TikTok),
            "instagram" => Ok(Platform::Instagram),
            "youtube" => Ok(Platform::YouTube),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

/// How a job finds creators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Free-text keywords, each searched separately.
    Keyword,
    /// Creators similar to a single target handle.
    Similar,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Keyword => "keyword",
            SearchMode::Similar => "similar",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyword" => Ok(SearchMode::Keyword),
            "similar" => Ok(SearchMode::Similar),
            _ => Err(format!("Unknown search mode: {}", s)),
        }
    }
}

/// Deduplication unit for result entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub platform: Platform,
    pub external_id: String,
}

impl IdentityKey {
    pub fn new(platform: Platform, external_id: impl Into<String>) -> Self {
        Self {
            platform,
            external_id: external_id.into(),
        }
    }
}

/// A creator record returned by a platform adapter.
///
/// Only the identity is interpreted by Scout; `payload` is provider-specific.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub platform: Platform,
    pub external_id: String,
    pub handle: Option<String>,
    pub payload: serde_json::Value,
}

impl Entity {
    pub fn new(
        platform: Platform,
        external_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            platform,
            external_id: external_id.into(),
            handle: None,
            payload,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(self.platform, self.external_id.clone())
    }
}

/// Audit record of one merged batch.
#[derive(Debug, Clone, Serialize)]
pub struct ResultBatch {
    pub job_id: Uuid,
    pub sequence_number: u64,
    pub term: String,
    pub items: Vec<Entity>,
    /// SHA-256 of the serialized items
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl ResultBatch {
    pub fn new(job_id: Uuid, sequence_number: u64, term: &str, items: Vec<Entity>) -> Self {
        let serialized = serde_json::to_string(&items).unwrap_or_default();
        Self {
            job_id,
            sequence_number,
            term: term.to_string(),
            content_hash: compute_hash(&serialized),
            items,
            created_at: Utc::now(),
        }
    }
}

/// Cached enrichment payload for one `(platform, handle)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentCacheEntry {
    pub platform: Platform,
    pub handle: String,
    pub payload: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
    pub ttl_expiry: DateTime<Utc>,
}

impl EnrichmentCacheEntry {
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.ttl_expiry
    }
}

/// Limit value meaning "no cap".
pub const UNLIMITED: i64 = -1;

/// Per-owner usage counter for one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaCounter {
    pub owner_id: String,
    pub period_key: String,
    pub count: i64,
    pub limit: i64,
}

/// Calendar-month period key (`YYYY-MM`, UTC) for quota counters.
pub fn period_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
