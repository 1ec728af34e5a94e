//! Priority-ordered content resolution.
//!
//! Each call to [`ContentSource::resolve_next`] walks the upstream feeds in a
//! fixed order and returns the first usable result:
//!
//! 1. active emergency messages (highest priority first)
//! 2. the admin-activated playlist
//! 3. a scheduled playlist whose window is open
//! 4. the default fallback image
//! 5. the live message feed ("Cliq"), in either of its two shapes
//! 6. general content
//! 7. the static "no content" card
//!
//! Steps run strictly one after another. A failed or empty step falls through
//! to the next one and is only logged.

use chrono::{Local, NaiveDateTime};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::api::{ApiError, PlaylistFilter, SignageApi};
use crate::error::PlaybackError;
use crate::media_resolver::{self, MediaIndex};
use crate::models::{
    sort_newest_first, ContentItem, ContentKind, ContentOrigin, DisplaySettings,
    EmergencyDirective, LiveFeed, Playlist, PlaylistItemRef,
};
use crate::playback_cycle::PlaybackCycles;


/// Number of upstream steps consulted before the static fallback.
const UPSTREAM_STEPS: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Suspends normal rotation until the directive's duration elapses.
    Emergency(EmergencyDirective),
    Content(ContentItem),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreloadTarget {
    pub url: String,
    pub kind: ContentKind,
}

/// The playlist most recently served from, kept for the preloader.
#[derive(Debug, Clone)]
struct RotationSnapshot {
    targets: Vec<Option<PreloadTarget>>,
    cursor: usize,
}

pub struct ContentSource {
    api: Arc<dyn SignageApi>,
    settings: Arc<RwLock<DisplaySettings>>,
    cycles: PlaybackCycles,
    /// Unresolvable playlist items seen since the last synthesized fallback.
    skip_count: usize,
    live_feed_limit: u32,
    rotation: Option<RotationSnapshot>,
}

impl ContentSource {
    pub fn new(
        api: Arc<dyn SignageApi>,
        settings: Arc<RwLock<DisplaySettings>>,
        live_feed_limit: u32,
    ) -> Self {
        Self {
            api,
            settings,
            cycles: PlaybackCycles::new(),
            skip_count: 0,
            live_feed_limit,
            rotation: None,
        }
    }

    pub async fn resolve_next(&mut self) -> Result<Resolution, PlaybackError> {
        self.resolve_next_at(Local::now().naive_local()).await
    }

    /// Resolution against an explicit local wall-clock time (used for
    /// scheduled playlist windows).
    pub async fn resolve_next_at(
        &mut self,
        now: NaiveDateTime,
    ) -> Result<Resolution, PlaybackError> {
        let settings = self.settings.read().await.clone();
        let mut media: Option<MediaIndex> = None;
        let mut failures = 0;

        match self.check_emergency().await {
            Ok(Some(directive)) => return Ok(Resolution::Emergency(directive)),
            Ok(None) => {}
            Err(e) => note_failure(&mut failures, e),
        }

        let outcome = self.active_playlist_step(&settings, &mut media).await;
        if let Some(item) = settle(outcome, &mut failures) {
            return Ok(Resolution::Content(item));
        }

        let outcome = self.scheduled_playlist_step(&settings, &mut media, now).await;
        if let Some(item) = settle(outcome, &mut failures) {
            return Ok(Resolution::Content(item));
        }

        let outcome = self.fallback_image_step(&settings).await;
        if let Some(item) = settle(outcome, &mut failures) {
            return Ok(Resolution::Content(item));
        }

        let outcome = self.live_feed_step(&settings, &mut media).await;
        if let Some(item) = settle(outcome, &mut failures) {
            return Ok(Resolution::Content(item));
        }

        let outcome = self.general_content_step(&settings).await;
        if let Some(item) = settle(outcome, &mut failures) {
            return Ok(Resolution::Content(item));
        }

        if failures == UPSTREAM_STEPS {
            return Err(PlaybackError::AllSourcesExhausted { failures });
        }

        tracing::debug!("No content from any source, showing static fallback");
        Ok(Resolution::Content(ContentItem::no_content()))
    }

    /// Highest-priority active emergency, if any.
    pub async fn check_emergency(&self) -> Result<Option<EmergencyDirective>, PlaybackError> {
        check_emergency(self.api.as_ref(), &self.settings).await
    }

    /// Up to `count` media items that follow the current position of the
    /// playlist last served from, wrapping around.
    /// Every resolvable url of the rotation being served.
    pub fn rotation_urls(&self) -> Vec<String> {
        self.rotation
            .iter()
            .flat_map(|rotation| rotation.targets.iter().flatten())
            .map(|target| target.url.clone())
            .collect()
    }

    pub fn upcoming(&self, count: usize) -> Vec<PreloadTarget> {
        let Some(rotation) = &self.rotation else {
            return Vec::new();
        };
        let len = rotation.targets.len();

        (1..=count.min(len.saturating_sub(1)))
            .map(|step| (rotation.cursor + step) % len)
            .filter_map(|index| rotation.targets[index].clone())
            .collect()
    }

    async fn active_playlist_step(
        &mut self,
        settings: &DisplaySettings,
        media: &mut Option<MediaIndex>,
    ) -> Result<Option<ContentItem>, PlaybackError> {
        let playlists = self
            .api
            .playlists(PlaylistFilter::Active)
            .await
            .map_err(unavailable("active playlist"))?;

        let mut active = playlists.into_iter().filter(|p| p.is_active);
        let Some(playlist) = active.next() else {
            return Ok(None);
        };
        let others = active.count();
        if others > 0 {
            tracing::warn!(
                "{} playlists flagged active, using the first ('{}')",
                others + 1,
                playlist.name
            );
        }

        if playlist.items.is_empty() {
            tracing::debug!("Active playlist '{}' has no items", playlist.name);
            return Ok(None);
        }

        let index = self.media_index(media, "active playlist").await?;
        Ok(Some(self.cycle_playlist(
            &playlist,
            &index,
            ContentOrigin::Playlist,
            settings,
        )))
    }

    async fn scheduled_playlist_step(
        &mut self,
        settings: &DisplaySettings,
        media: &mut Option<MediaIndex>,
        now: NaiveDateTime,
    ) -> Result<Option<ContentItem>, PlaybackError> {
        let playlists = self
            .api
            .playlists(PlaylistFilter::Scheduled)
            .await
            .map_err(unavailable("scheduled playlist"))?;

        let Some(playlist) = playlists
            .into_iter()
            .find(|p| p.schedule.as_ref().map_or(true, |w| w.contains(now)))
        else {
            return Ok(None);
        };

        if playlist.items.is_empty() {
            return Ok(None);
        }

        let index = self.media_index(media, "scheduled playlist").await?;
        Ok(Some(self.cycle_playlist(
            &playlist,
            &index,
            ContentOrigin::Playlist,
            settings,
        )))
    }

    async fn fallback_image_step(
        &mut self,
        settings: &DisplaySettings,
    ) -> Result<Option<ContentItem>, PlaybackError> {
        let image = self
            .api
            .default_fallback_image()
            .await
            .map_err(unavailable("fallback image"))?;

        let Some(image) = image else {
            return Ok(None);
        };
        let Some(url) = image.url.filter(|u| !u.trim().is_empty()) else {
            return Ok(None);
        };

        let id = if image.id.is_empty() {
            "fallback-image".to_string()
        } else {
            image.id
        };
        let duration = image
            .duration
            .unwrap_or(settings.default_slide_timer_seconds);
        let kind = match image.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("video") => ContentKind::Video,
            _ => ContentKind::Image,
        };

        Ok(Some(ContentItem::media(
            id,
            kind,
            url,
            image.title,
            duration,
            ContentOrigin::Fallback,
        )))
    }

    async fn live_feed_step(
        &mut self,
        settings: &DisplaySettings,
        media: &mut Option<MediaIndex>,
    ) -> Result<Option<ContentItem>, PlaybackError> {
        let feed = self
            .api
            .live_message_feed(self.live_feed_limit)
            .await
            .map_err(unavailable("live message feed"))?;

        match feed {
            LiveFeed::Playlist(playlist) => {
                let index = self.media_index(media, "live message feed").await?;
                Ok(Some(self.cycle_playlist(
                    &playlist,
                    &index,
                    ContentOrigin::ZohoCliqPlaylist,
                    settings,
                )))
            }
            LiveFeed::Messages(mut messages) => {
                sort_newest_first(&mut messages);
                let Some(position) = self.cycles.advance("zoho_cliq:messages", messages.len())
                else {
                    return Ok(None);
                };
                let message = &messages[position];
                let body = message.body();

                Ok(Some(
                    ContentItem::text(
                        message.id.clone(),
                        body,
                        message.title.clone(),
                        settings.message_duration(body),
                        ContentOrigin::ZohoCliq,
                    )
                    .with_created_at(message.created_at),
                ))
            }
            LiveFeed::Empty => Ok(None),
        }
    }

    async fn general_content_step(
        &mut self,
        settings: &DisplaySettings,
    ) -> Result<Option<ContentItem>, PlaybackError> {
        let mut files = self
            .api
            .general_content()
            .await
            .map_err(unavailable("general content"))?;

        files.retain(|f| f.is_active);
        sort_newest_first(&mut files);

        let Some(position) = self.cycles.advance("content:general", files.len()) else {
            return Ok(None);
        };
        let file = &files[position];

        Ok(Some(
            ContentItem::text(
                file.id.clone(),
                file.body(),
                file.title.clone(),
                settings.default_slide_timer_seconds,
                ContentOrigin::Content,
            )
            .with_created_at(file.created_at),
        ))
    }

    /// Media library for this resolution, fetched at most once.
    async fn media_index(
        &self,
        media: &mut Option<MediaIndex>,
        step: &'static str,
    ) -> Result<MediaIndex, PlaybackError> {
        if let Some(index) = media {
            return Ok(index.clone());
        }
        let objects = self.api.list_media().await.map_err(unavailable(step))?;
        let index = MediaIndex::new(objects);
        *media = Some(index.clone());
        Ok(index)
    }

    /// Advances the playlist's cycle until an item resolves to media. Items
    /// without media are skipped; once more than `2 * len` skips pile up, the
    /// current item is shown as a text card built from its own title.
    fn cycle_playlist(
        &mut self,
        playlist: &Playlist,
        index: &MediaIndex,
        origin: ContentOrigin,
        settings: &DisplaySettings,
    ) -> ContentItem {
        let key = format!("{}:{}", origin.as_str(), playlist.id);
        let len = playlist.items.len();

        loop {
            let Some(position) = self.cycles.advance(&key, len) else {
                return ContentItem::no_content();
            };
            let item = &playlist.items[position];
            let id = item_id(playlist, item, position);
            let duration = item_duration(item, playlist, settings);

            if let Some(resolved) = media_resolver::resolve(item, index) {
                self.remember_rotation(playlist, index, position);
                return ContentItem::media(
                    id,
                    resolved.kind,
                    resolved.url,
                    resolved.title,
                    duration,
                    origin,
                );
            }

            self.skip_count += 1;
            tracing::warn!(
                "No media for item '{}' in playlist '{}' (skip {}/{})",
                id,
                playlist.name,
                self.skip_count,
                2 * len
            );

            if self.skip_count > 2 * len {
                self.skip_count = 0;
                let title = item.display_name().unwrap_or("Untitled").to_string();
                return ContentItem::text(
                    id,
                    title.clone(),
                    title,
                    duration,
                    ContentOrigin::PlaylistFallback,
                );
            }
        }
    }

    fn remember_rotation(&mut self, playlist: &Playlist, index: &MediaIndex, cursor: usize) {
        let targets = playlist
            .items
            .iter()
            .map(|item| {
                media_resolver::resolve(item, index).map(|m| PreloadTarget {
                    url: m.url,
                    kind: m.kind,
                })
            })
            .collect();
        self.rotation = Some(RotationSnapshot { targets, cursor });
    }
}

/// Emergency lookup on its own, so the background check does not have to wait
/// for a resolution holding the `ContentSource`.
pub async fn check_emergency(
    api: &dyn SignageApi,
    settings: &RwLock<DisplaySettings>,
) -> Result<Option<EmergencyDirective>, PlaybackError> {
    let mut messages = api
        .active_emergencies()
        .await
        .map_err(unavailable("emergency"))?;

    messages.retain(|m| m.is_active);
    // Stable: equal priorities keep server order
    messages.sort_by_key(|m| m.priority);

    let Some(top) = messages.into_iter().next() else {
        return Ok(None);
    };

    let duration = settings.read().await.emergency_duration(&top);
    tracing::info!(
        "Emergency '{}' ({:?}) preempts playback for {}s",
        top.id,
        top.priority,
        duration
    );

    Ok(Some(EmergencyDirective {
        id: top.id,
        message: top.message,
        priority: top.priority,
        duration,
    }))
}

fn item_id(playlist: &Playlist, item: &PlaylistItemRef, position: usize) -> String {
    if item.id.is_empty() {
        format!("{}:{}", playlist.id, position)
    } else {
        item.id.clone()
    }
}

fn item_duration(item: &PlaylistItemRef, playlist: &Playlist, settings: &DisplaySettings) -> u32 {
    if settings.enable_default_timer_override {
        return settings.default_slide_timer_seconds;
    }
    item.duration
        .or(playlist.duration_per_item)
        .unwrap_or(settings.default_slide_timer_seconds)
}

fn unavailable(source_name: &'static str) -> impl FnOnce(ApiError) -> PlaybackError {
    move |e| PlaybackError::SourceUnavailable {
        source_name,
        reason: e.to_string(),
    }
}

fn note_failure(failures: &mut usize, error: PlaybackError) {
    *failures += 1;
    tracing::warn!("{}, falling through", error);
}

fn settle(
    outcome: Result<Option<ContentItem>, PlaybackError>,
    failures: &mut usize,
) -> Option<ContentItem> {
    match outcome {
        Ok(found) => found,
        Err(e) => {
            note_failure(failures, e);
            None
        }
    }
}
