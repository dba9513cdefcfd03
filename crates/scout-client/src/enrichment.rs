use scout_core::error::AppError;
use scout_core::models::Platform;
use scout_core::traits::EnrichmentFetcher;

use crate::http::ProviderClient;

/// Full profile lookup through the provider gateway.
#[derive(Clone)]
pub struct HttpEnrichmentFetcher {
    client: ProviderClient,
}

impl HttpEnrichmentFetcher {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }
}

impl EnrichmentFetcher for HttpEnrichmentFetcher {
    async fn fetch_profile(
        &self,
        platform: Platform,
        handle: &str,
    ) -> Result<serde_json::Value, AppError> {
        let url = self.client.endpoint(
            &format!("v1/{}/profile", platform.as_str()),
            &[("handle", Some(handle))],
        )?;
        tracing::debug!(platform = %platform, handle, "Fetching creator profile");

        let profile: serde_json::Value = self.client.get_json(url).await?;
        if profile.is_null() {
            return Err(AppError::NotFound(format!("{platform} profile @{handle}")));
        }
        Ok(profile)
    }
}
