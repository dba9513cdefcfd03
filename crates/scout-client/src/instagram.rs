use std::collections::HashSet;

use scout_core::error::AppError;
use scout_core::models::{Entity, Platform, SearchMode};
use scout_core::traits::{BatchPage, BatchRequest, PlatformAdapter};
use serde::Deserialize;

use crate::http::ProviderClient;

/// Instagram related-profile lookup (similar mode) and reels search
/// (keyword mode, creators taken from reel owners).
///
/// Both endpoints paginate with an opaque `max_id`.
#[derive(Clone)]
pub struct InstagramAdapter {
    client: ProviderClient,
}

impl InstagramAdapter {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct Profile {
    pk: String,
    username: String,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl Profile {
    fn into_entity(self) -> Entity {
        let mut payload = self.rest;
        payload.insert("username".into(), self.username.clone().into());
        Entity::new(Platform::Instagram, self.pk, payload.into()).with_handle(self.username)
    }
}

#[derive(Debug, Deserialize)]
struct RelatedProfilesResponse {
    #[serde(default)]
    profiles: Vec<Profile>,
    next_max_id: Option<String>,
    #[serde(default)]
    more_available: bool,
}

#[derive(Debug, Deserialize)]
struct ReelsSearchResponse {
    #[serde(default)]
    reels: Vec<Reel>,
    next_max_id: Option<String>,
    #[serde(default)]
    more_available: bool,
}

#[derive(Debug, Deserialize)]
struct Reel {
    owner: Profile,
}

fn next_cursor(next_max_id: Option<String>, more_available: bool) -> Option<String> {
    next_max_id.filter(|id| more_available && !id.is_empty())
}

fn related_page(response: RelatedProfilesResponse) -> BatchPage {
    let next_cursor = next_cursor(response.next_max_id, response.more_available);
    BatchPage {
        items: response.profiles.into_iter().map(Profile::into_entity).collect(),
        exhausted: next_cursor.is_none(),
        next_cursor,
    }
}

/// One creator can own several reels on a page; keep the first.
fn reels_page(response: ReelsSearchResponse) -> BatchPage {
    let mut owners = HashSet::new();
    let items = response
        .reels
        .into_iter()
        .filter(|reel| owners.insert(reel.owner.pk.clone()))
        .map(|reel| reel.owner.into_entity())
        .collect();

    let next_cursor = next_cursor(response.next_max_id, response.more_available);
    BatchPage {
        items,
        exhausted: next_cursor.is_none(),
        next_cursor,
    }
}

impl PlatformAdapter for InstagramAdapter {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn fetch_batch(&self, request: &BatchRequest) -> Result<BatchPage, AppError> {
        if let Some(max_id) = &request.cursor
            && max_id.trim().is_empty()
        {
            return Err(AppError::MalformedCursor("empty instagram max_id".into()));
        }

        match request.mode {
            SearchMode::Similar => {
                let url = self.client.endpoint(
                    "v1/instagram/profile/related",
                    &[
                        ("handle", Some(request.term.as_str())),
                        ("max_id", request.cursor.as_deref()),
                    ],
                )?;
                let response: RelatedProfilesResponse = self.client.get_json(url).await?;
                Ok(related_page(response))
            }
            SearchMode::Keyword => {
                let url = self.client.endpoint(
                    "v1/instagram/reels/search",
                    &[
                        ("query", Some(request.term.as_str())),
                        ("max_id", request.cursor.as_deref()),
                    ],
                )?;
                let response: ReelsSearchResponse = self.client.get_json(url).await?;
                Ok(reels_page(response))
            }
        }
    }
}
