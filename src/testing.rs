//! Shared fakes for unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::api::{ApiError, PlaylistFilter, SignageApi};
use crate::models::{
    ContentItem, DisplaySettings, EmergencyDirective, EmergencyMessage, FallbackImage,
    GeneralContent, LiveFeed, MediaObject, Playlist, PlaylistItemRef, Priority,
};
use crate::surface::{AssetSignal, StatusKind, Surface, SurfaceEvent};

/// A canned response: `None` answers with a transport-style failure.
type Canned<T> = Mutex<Option<T>>;

fn answer<T: Clone>(slot: &Canned<T>, calls: &AtomicUsize) -> Result<T, ApiError> {
    calls.fetch_add(1, Ordering::SeqCst);
    slot.lock()
        .unwrap()
        .clone()
        .ok_or_else(|| ApiError::Rejected("network unreachable".to_string()))
}

/// In-memory control plane. Every feed starts out empty and healthy.
pub struct FakeApi {
    pub emergencies: Canned<Vec<EmergencyMessage>>,
    pub active: Canned<Vec<Playlist>>,
    pub scheduled: Canned<Vec<Playlist>>,
    pub fallback_image: Canned<Option<FallbackImage>>,
    pub live_feed: Canned<LiveFeed>,
    pub general: Canned<Vec<GeneralContent>>,
    pub media: Canned<Vec<MediaObject>>,
    pub settings: Canned<DisplaySettings>,
    pub emergency_calls: AtomicUsize,
    pub playlist_calls: AtomicUsize,
    pub media_calls: AtomicUsize,
    pub settings_calls: AtomicUsize,
    pub other_calls: AtomicUsize,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            emergencies: Mutex::new(Some(Vec::new())),
            active: Mutex::new(Some(Vec::new())),
            scheduled: Mutex::new(Some(Vec::new())),
            fallback_image: Mutex::new(Some(None)),
            live_feed: Mutex::new(Some(LiveFeed::Empty)),
            general: Mutex::new(Some(Vec::new())),
            media: Mutex::new(Some(Vec::new())),
            settings: Mutex::new(Some(DisplaySettings::default())),
            emergency_calls: AtomicUsize::new(0),
            playlist_calls: AtomicUsize::new(0),
            media_calls: AtomicUsize::new(0),
            settings_calls: AtomicUsize::new(0),
            other_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeApi {
    pub fn offline() -> Self {
        let api = Self::default();
        *api.emergencies.lock().unwrap() = None;
        *api.active.lock().unwrap() = None;
        *api.scheduled.lock().unwrap() = None;
        *api.fallback_image.lock().unwrap() = None;
        *api.live_feed.lock().unwrap() = None;
        *api.general.lock().unwrap() = None;
        *api.media.lock().unwrap() = None;
        *api.settings.lock().unwrap() = None;
        api
    }

    pub fn set<T>(slot: &Canned<T>, value: T) {
        *slot.lock().unwrap() = Some(value);
    }

    pub fn fail<T>(slot: &Canned<T>) {
        *slot.lock().unwrap() = None;
    }

    pub fn non_emergency_calls(&self) -> usize {
        self.playlist_calls.load(Ordering::SeqCst)
            + self.media_calls.load(Ordering::SeqCst)
            + self.other_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignageApi for FakeApi {
    async fn active_emergencies(&self) -> Result<Vec<EmergencyMessage>, ApiError> {
        answer(&self.emergencies, &self.emergency_calls)
    }

    async fn playlists(&self, filter: PlaylistFilter) -> Result<Vec<Playlist>, ApiError> {
        match filter {
            PlaylistFilter::Active => answer(&self.active, &self.playlist_calls),
            PlaylistFilter::Scheduled => answer(&self.scheduled, &self.playlist_calls),
        }
    }

    async fn default_fallback_image(&self) -> Result<Option<FallbackImage>, ApiError> {
        answer(&self.fallback_image, &self.other_calls)
    }

    async fn live_message_feed(&self, _limit: u32) -> Result<LiveFeed, ApiError> {
        answer(&self.live_feed, &self.other_calls)
    }

    async fn general_content(&self) -> Result<Vec<GeneralContent>, ApiError> {
        answer(&self.general, &self.other_calls)
    }

    async fn list_media(&self) -> Result<Vec<MediaObject>, ApiError> {
        answer(&self.media, &self.media_calls)
    }

    async fn display_settings(&self) -> Result<DisplaySettings, ApiError> {
        answer(&self.settings, &self.settings_calls)
    }
}

pub fn media_object(id: &str, mime: &str) -> MediaObject {
    MediaObject {
        id: id.to_string(),
        file_name: format!("{}.bin", id),
        mime_type: mime.to_string(),
        object_url: format!("https://cdn.test/{}", id),
    }
}

pub fn item_ref(id: &str, media_object_id: &str) -> PlaylistItemRef {
    PlaylistItemRef {
        id: id.to_string(),
        media_object_id: Some(media_object_id.to_string()),
        name: None,
        title: Some(format!("Item {}", id)),
        duration: None,
    }
}

pub fn playlist(id: &str, active: bool, items: Vec<PlaylistItemRef>) -> Playlist {
    Playlist {
        id: id.to_string(),
        name: format!("Playlist {}", id),
        duration_per_item: Some(10),
        is_active: active,
        items,
        schedule: None,
    }
}

pub fn emergency(id: &str, priority: Priority, duration: u32) -> EmergencyMessage {
    EmergencyMessage {
        id: id.to_string(),
        message: format!("Emergency {}", id),
        priority,
        display_duration_seconds: Some(duration),
        is_active: true,
    }
}

/// Playlist `p` with image items a, b, c backed by media ma, mb, mc.
pub fn abc_api() -> FakeApi {
    let api = FakeApi::default();
    FakeApi::set(
        &api.active,
        vec![playlist(
            "p",
            true,
            vec![item_ref("a", "ma"), item_ref("b", "mb"), item_ref("c", "mc")],
        )],
    );
    FakeApi::set(
        &api.media,
        vec![
            media_object("ma", "image/png"),
            media_object("mb", "image/png"),
            media_object("mc", "image/png"),
        ],
    );
    api
}

#[derive(Debug, Clone, PartialEq)]
pub enum Presented {
    Content { generation: u64, item: ContentItem },
    Emergency(EmergencyDirective),
    Status(StatusKind, String),
    Fade,
}

/// Surface that records what it was asked to show. Asset signals are
/// injected by the test through the paired event sender, or answered right
/// away with `AssetReady` when built with [`RecordingSurface::auto_ready`].
/// A [`RecordingSurface::rejecting`] surface records and then refuses every
/// image or video.
pub struct RecordingSurface {
    pub log: Mutex<Vec<Presented>>,
    pub events: mpsc::Sender<SurfaceEvent>,
    auto_ready: bool,
    reject_assets: bool,
}

impl RecordingSurface {
    pub fn new(events: mpsc::Sender<SurfaceEvent>) -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            events,
            auto_ready: false,
            reject_assets: false,
        }
    }

    pub fn rejecting(events: mpsc::Sender<SurfaceEvent>) -> Self {
        Self {
            reject_assets: true,
            ..Self::new(events)
        }
    }

    pub fn auto_ready(events: mpsc::Sender<SurfaceEvent>) -> Self {
        Self {
            auto_ready: true,
            ..Self::new(events)
        }
    }

    pub fn statuses(&self) -> Vec<StatusKind> {
        self.presented()
            .into_iter()
            .filter_map(|p| match p {
                Presented::Status(kind, _) => Some(kind),
                _ => None,
            })
            .collect()
    }

    pub fn emergencies(&self) -> Vec<String> {
        self.presented()
            .into_iter()
            .filter_map(|p| match p {
                Presented::Emergency(d) => Some(d.id),
                _ => None,
            })
            .collect()
    }

    pub fn presented(&self) -> Vec<Presented> {
        self.log.lock().unwrap().clone()
    }

    pub fn content_ids(&self) -> Vec<String> {
        self.presented()
            .into_iter()
            .filter_map(|p| match p {
                Presented::Content { item, .. } => Some(item.id),
                _ => None,
            })
            .collect()
    }

    pub fn last_generation(&self) -> Option<u64> {
        self.presented().into_iter().rev().find_map(|p| match p {
            Presented::Content { generation, .. } => Some(generation),
            _ => None,
        })
    }
}

#[async_trait]
impl Surface for RecordingSurface {
    async fn present(&self, generation: u64, item: &ContentItem) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(Presented::Content {
            generation,
            item: item.clone(),
        });
        if self.reject_assets && item.kind.needs_asset() {
            anyhow::bail!("unsupported codec");
        }
        if self.auto_ready && item.kind.needs_asset() {
            let _ = self.events.try_send(SurfaceEvent {
                generation,
                signal: AssetSignal::AssetReady,
            });
        }
        Ok(())
    }

    async fn present_emergency(&self, directive: &EmergencyDirective) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(Presented::Emergency(directive.clone()));
        Ok(())
    }

    async fn present_status(&self, kind: StatusKind, text: &str) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(Presented::Status(kind, text.to_string()));
        Ok(())
    }

    async fn fade_out(&self, _duration: std::time::Duration) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(Presented::Fade);
        Ok(())
    }
}
