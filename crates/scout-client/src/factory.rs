use scout_core::error::AppError;
use scout_core::models::{Platform, SearchMode};
use scout_core::traits::{AdapterFactory, BatchPage, BatchRequest, PlatformAdapter};

use crate::config::ProviderConfig;
use crate::http::ProviderClient;
use crate::instagram::InstagramAdapter;
use crate::tiktok::TikTokAdapter;
use crate::youtube::YouTubeAdapter;

/// Any of the gateway-backed platform adapters.
#[derive(Clone)]
pub enum ProviderAdapter {
    TikTok(TikTokAdapter),
    Instagram(InstagramAdapter),
    YouTube(YouTubeAdapter),
}

impl PlatformAdapter for ProviderAdapter {
    fn platform(&self) -> Platform {
        match self {
            ProviderAdapter::TikTok(a) => a.platform(),
            ProviderAdapter::Instagram(a) => a.platform(),
            ProviderAdapter::YouTube(a) => a.platform(),
        }
    }

    async fn fetch_batch(&self, request: &BatchRequest) -> Result<BatchPage, AppError> {
        match self {
            ProviderAdapter::TikTok(a) => a.fetch_batch(request).await,
            ProviderAdapter::Instagram(a) => a.fetch_batch(request).await,
            ProviderAdapter::YouTube(a) => a.fetch_batch(request).await,
        }
    }
}

/// Builds adapters that share one HTTP client.
#[derive(Clone)]
pub struct HttpAdapterFactory {
    client: ProviderClient,
}

impl HttpAdapterFactory {
    pub fn new(config: &ProviderConfig) -> Result<Self, AppError> {
        Ok(Self {
            client: ProviderClient::new(config)?,
        })
    }

    pub fn client(&self) -> &ProviderClient {
        &self.client
    }
}

impl AdapterFactory for HttpAdapterFactory {
    type Adapter = ProviderAdapter;

    fn adapter_for(&self, platform: Platform, mode: SearchMode) -> Result<ProviderAdapter, AppError> {
        let client = self.client.clone();
        match (platform, mode) {
            (Platform::TikTok, _) => Ok(ProviderAdapter::TikTok(TikTokAdapter::new(client))),
            (Platform::Instagram, _) => {
                Ok(ProviderAdapter::Instagram(InstagramAdapter::new(client)))
            }
            (Platform::YouTube, SearchMode::Keyword) => {
                Ok(ProviderAdapter::YouTube(YouTubeAdapter::new(client)))
            }
            (Platform::YouTube, SearchMode::Similar) => Err(AppError::InvalidRequest(
                "similar search is not available for youtube".into(),
            )),
        }
    }
}
