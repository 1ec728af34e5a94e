use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::models::{
    DisplaySettings, EmergencyMessage, FallbackImage, GeneralContent, LiveFeed, MediaObject,
    Playlist, PlaylistRecord,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned HTTP {0}")]
    Status(StatusCode),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("server rejected request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistFilter {
    Active,
    Scheduled,
}

impl PlaylistFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaylistFilter::Active => "active",
            PlaylistFilter::Scheduled => "scheduled",
        }
    }
}

/// Read-only view of the control plane consumed by the player.
#[async_trait]
pub trait SignageApi: Send + Sync {
    async fn active_emergencies(&self) -> Result<Vec<EmergencyMessage>, ApiError>;

    async fn playlists(&self, filter: PlaylistFilter) -> Result<Vec<Playlist>, ApiError>;

    async fn default_fallback_image(&self) -> Result<Option<FallbackImage>, ApiError>;

    async fn live_message_feed(&self, limit: u32) -> Result<LiveFeed, ApiError>;

    async fn general_content(&self) -> Result<Vec<GeneralContent>, ApiError>;

    async fn list_media(&self) -> Result<Vec<MediaObject>, ApiError>;

    async fn display_settings(&self) -> Result<DisplaySettings, ApiError>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    error: Option<String>,
    #[serde(flatten)]
    body: T,
}

#[derive(Deserialize)]
struct EmergenciesBody {
    #[serde(default)]
    messages: Vec<EmergencyMessage>,
}

#[derive(Deserialize)]
struct PlaylistsBody {
    #[serde(default)]
    playlists: Vec<PlaylistRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FallbackImageBody {
    fallback_image: Option<FallbackImage>,
}

/// The feed has two coexisting shapes: a synthesized playlist, or the legacy
/// flat message list.
#[derive(Deserialize)]
struct LiveFeedBody {
    playlist: Option<PlaylistRecord>,
    files: Option<Vec<GeneralContent>>,
}

impl From<LiveFeedBody> for LiveFeed {
    fn from(body: LiveFeedBody) -> Self {
        if let Some(record) = body.playlist {
            let playlist = Playlist::from(record);
            if !playlist.items.is_empty() {
                return LiveFeed::Playlist(playlist);
            }
        }
        match body.files {
            Some(files) if !files.is_empty() => LiveFeed::Messages(files),
            _ => LiveFeed::Empty,
        }
    }
}

#[derive(Deserialize)]
struct ContentBody {
    #[serde(default)]
    files: Vec<GeneralContent>,
}

#[derive(Deserialize)]
struct MediaBody {
    #[serde(default)]
    media: Vec<MediaObject>,
}

#[derive(Deserialize)]
struct SettingsBody {
    #[serde(default)]
    settings: DisplaySettings,
}

/// `SignageApi` over the control plane's action-dispatch HTTP handlers.
pub struct HttpSignageApi {
    client: Client,
    base_url: String,
    screen_id: Option<String>,
}

impl HttpSignageApi {
    pub fn new(
        base_url: &str,
        screen_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            screen_id,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        handler: &str,
        action: &str,
        extra: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = format!("{}/api/{}", self.base_url, handler);

        let mut query: Vec<(&str, String)> = vec![("action", action.to_string())];
        query.extend(extra.iter().cloned());
        if let Some(screen_id) = &self.screen_id {
            query.push(("screenId", screen_id.clone()));
        }

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status));
        }

        // Decode from text so a malformed body surfaces as a decode error
        let text = response.text().await?;
        let envelope: Envelope<T> = serde_json::from_str(&text)?;
        if !envelope.success {
            return Err(ApiError::Rejected(envelope.error.unwrap_or_else(|| {
                format!("{}?action={} returned success=false", handler, action)
            })));
        }

        Ok(envelope.body)
    }
}

#[async_trait]
impl SignageApi for HttpSignageApi {
    async fn active_emergencies(&self) -> Result<Vec<EmergencyMessage>, ApiError> {
        let body: EmergenciesBody = self.call("emergency", "getActive", &[]).await?;
        Ok(body.messages)
    }

    async fn playlists(&self, filter: PlaylistFilter) -> Result<Vec<Playlist>, ApiError> {
        let body: PlaylistsBody = self
            .call("playlists", "list", &[("filter", filter.as_str().to_string())])
            .await?;
        Ok(body.playlists.into_iter().map(Playlist::from).collect())
    }

    async fn default_fallback_image(&self) -> Result<Option<FallbackImage>, ApiError> {
        let body: FallbackImageBody = self.call("content", "getFallbackImage", &[]).await?;
        Ok(body.fallback_image)
    }

    async fn live_message_feed(&self, limit: u32) -> Result<LiveFeed, ApiError> {
        let body: LiveFeedBody = self
            .call("content", "getCliqFeed", &[("limit", limit.to_string())])
            .await?;
        Ok(body.into())
    }

    async fn general_content(&self) -> Result<Vec<GeneralContent>, ApiError> {
        let body: ContentBody = self.call("content", "list", &[]).await?;
        Ok(body.files)
    }

    async fn list_media(&self) -> Result<Vec<MediaObject>, ApiError> {
        let body: MediaBody = self.call("media", "list", &[]).await?;
        Ok(body.media)
    }

    async fn display_settings(&self) -> Result<DisplaySettings, ApiError> {
        let body: SettingsBody = self.call("settings", "getDisplay", &[]).await?;
        Ok(body.settings)
    }
}
