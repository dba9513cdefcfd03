use std::time::Duration;

use scout_core::AppError;

const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Connection settings for the creator data provider gateway.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read configuration from environment variables.
    ///
    /// - `SCOUT_PROVIDER_BASE_URL` (required)
    /// - `SCOUT_PROVIDER_API_KEY` (required)
    /// - `SCOUT_PROVIDER_TIMEOUT_SECS` (optional, defaults to 20)
    pub fn from_env() -> Result<Self, AppError> {
        let base_url = std::env::var("SCOUT_PROVIDER_BASE_URL").map_err(|_| {
            AppError::ConfigError("SCOUT_PROVIDER_BASE_URL not set".into())
        })?;
        let api_key = std::env::var("SCOUT_PROVIDER_API_KEY").map_err(|_| {
            AppError::ConfigError("SCOUT_PROVIDER_API_KEY not set".into())
        })?;

        let timeout_secs = match std::env::var("SCOUT_PROVIDER_TIMEOUT_SECS") {
            Err(_) => DEFAULT_TIMEOUT_SECS,
            Ok(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(AppError::ConfigError(format!(
                        "Invalid SCOUT_PROVIDER_TIMEOUT_SECS '{raw}': must be a positive integer"
                    )));
                }
            },
        };

        Ok(Self::new(base_url, api_key).with_timeout(Duration::from_secs(timeout_secs)))
    }
}
