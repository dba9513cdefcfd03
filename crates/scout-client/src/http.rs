use reqwest::{Client, StatusCode};
use scout_core::error::AppError;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::ProviderConfig;

/// Shared HTTP plumbing for every provider endpoint.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct ProviderClient {
    client: Client,
    base_url: Url,
    api_key: String,
    timeout_secs: u64,
}

impl ProviderClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(concat!("scout/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        // A trailing slash makes `join` append instead of replacing the last segment.
        let base = format!("{}/", config.base_url.trim_end_matches('/'));
        let base_url = Url::parse(&base)
            .map_err(|e| AppError::ConfigError(format!("Invalid provider base URL: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            timeout_secs: config.timeout.as_secs(),
        })
    }

    /// Build the absolute URL for `path` with `query`, skipping empty values.
    pub fn endpoint(&self, path: &str, query: &[(&str, Option<&str>)]) -> Result<Url, AppError> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| AppError::HttpError(format!("Invalid endpoint {path}: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                if let Some(value) = value {
                    pairs.append_pair(key, value);
                }
            }
        }
        Ok(url)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, AppError> {
        let response = self
            .client
            .get(url.clone())
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), path = url.path(), "Provider rejected request");
            return Err(status_error(status, &body));
        }

        response.json::<T>().await.map_err(|e| AppError::ProviderError {
            message: format!("Unreadable provider response: {e}"),
            status_code: Some(status.as_u16()),
            retryable: true,
        })
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "error")]
    message: String,
}

/// Classify a non-success provider response.
///
/// 429 is rate limiting. 5xx and 408 are transient. Every other status,
/// 400/404/422 included, means the request itself cannot succeed.
pub fn status_error(status: StatusCode, body: &str) -> AppError {
    let code = status.as_u16();
    if code == 429 {
        return AppError::RateLimitExceeded;
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| format!("HTTP {code}"));

    AppError::ProviderError {
        message,
        status_code: Some(code),
        retryable: status.is_server_error() || code == 408,
    }
}
