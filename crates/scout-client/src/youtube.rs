use scout_core::error::AppError;
use scout_core::models::{Entity, Platform, SearchMode};
use scout_core::traits::{BatchPage, BatchRequest, PlatformAdapter};
use serde::Deserialize;

use crate::http::ProviderClient;

/// YouTube channel search. Page-token pagination; keyword mode only.
#[derive(Clone)]
pub struct YouTubeAdapter {
    client: ProviderClient,
}

impl YouTubeAdapter {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }
}

/// YouTube returns at most 50 results per page.
const MAX_PAGE_SIZE: u32 = 50;

#[derive(Debug, Deserialize)]
struct ChannelSearchResponse {
    #[serde(default)]
    channels: Vec<Channel>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    channel_id: String,
    handle: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

fn into_page(response: ChannelSearchResponse) -> BatchPage {
    let items = response
        .channels
        .into_iter()
        .map(|channel| {
            let mut payload = channel.rest;
            if let Some(handle) = &channel.handle {
                payload.insert("handle".into(), handle.clone().into());
            }
            let entity = Entity::new(Platform::YouTube, channel.channel_id, payload.into());
            match channel.handle {
                Some(handle) => entity.with_handle(handle.trim_start_matches('@')),
                None => entity,
            }
        })
        .collect();

    let next_cursor = response.next_page_token.filter(|t| !t.is_empty());
    BatchPage {
        items,
        exhausted: next_cursor.is_none(),
        next_cursor,
    }
}

impl PlatformAdapter for YouTubeAdapter {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    async fn fetch_batch(&self, request: &BatchRequest) -> Result<BatchPage, AppError> {
        if request.mode != SearchMode::Keyword {
            return Err(AppError::permanent("youtube supports keyword search only"));
        }
        // Page tokens are opaque but never contain whitespace.
        if let Some(token) = &request.cursor
            && (token.is_empty() || token.contains(char::is_whitespace))
        {
            return Err(AppError::MalformedCursor(format!("youtube page token '{token}'")));
        }

        let max_results = request.limit.min(MAX_PAGE_SIZE).to_string();
        let url = self.client.endpoint(
            "v1/youtube/search/channels",
            &[
                ("query", Some(request.term.as_str())),
                ("page_token", request.cursor.as_deref()),
                ("max_results", Some(max_results.as_str())),
            ],
        )?;

        let response: ChannelSearchResponse = self.client.get_json(url).await?;
        Ok(into_page(response))
    }
}
