use scout_core::error::AppError;
use scout_core::models::{Entity, Platform, SearchMode};
use scout_core::traits::{BatchPage, BatchRequest, PlatformAdapter};
use serde::Deserialize;

use crate::http::ProviderClient;

/// TikTok user search and similar-account lookup.
///
/// Pagination is a numeric offset. The provider echoes the next offset in
/// `cursor` and says whether more exist in `has_more`.
#[derive(Clone)]
pub struct TikTokAdapter {
    client: ProviderClient,
}

impl TikTokAdapter {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct UserSearchResponse {
    #[serde(default)]
    users: Vec<TikTokUser>,
    #[serde(default)]
    cursor: Option<u64>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct TikTokUser {
    id: String,
    unique_id: String,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

/// Validate a stored offset token before it reaches the provider.
fn parse_offset(token: Option<&str>) -> Result<Option<u64>, AppError> {
    token
        .map(|raw| {
            raw.parse::<u64>()
                .map_err(|_| AppError::MalformedCursor(format!("tiktok offset '{raw}'")))
        })
        .transpose()
}

fn into_page(response: UserSearchResponse) -> BatchPage {
    let items = response
        .users
        .into_iter()
        .map(|user| {
            let mut payload = user.rest;
            payload.insert("unique_id".into(), user.unique_id.clone().into());
            Entity::new(Platform::TikTok, user.id, payload.into()).with_handle(user.unique_id)
        })
        .collect();

    let next_cursor = response
        .cursor
        .filter(|_| response.has_more)
        .map(|c| c.to_string());

    BatchPage {
        items,
        exhausted: next_cursor.is_none(),
        next_cursor,
    }
}

impl PlatformAdapter for TikTokAdapter {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    async fn fetch_batch(&self, request: &BatchRequest) -> Result<BatchPage, AppError> {
        let offset = parse_offset(request.cursor.as_deref())?.map(|o| o.to_string());
        let count = request.limit.to_string();

        let url = match request.mode {
            SearchMode::Keyword => self.client.endpoint(
                "v1/tiktok/search/users",
                &[
                    ("query", Some(request.term.as_str())),
                    ("cursor", offset.as_deref()),
                    ("count", Some(count.as_str())),
                ],
            )?,
            SearchMode::Similar => self.client.endpoint(
                "v1/tiktok/user/similar",
                &[
                    ("handle", Some(request.term.as_str())),
                    ("cursor", offset.as_deref()),
                    ("count", Some(count.as_str())),
                ],
            )?,
        };

        let response: UserSearchResponse = self.client.get_json(url).await?;
        Ok(into_page(response))
    }
}
