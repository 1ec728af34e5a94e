use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::schedule::ScheduleWindow;

/// Fixed display time of the static "no content" card.
pub const NO_CONTENT_DURATION_SECS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Image,
    Video,
    Text,
}

impl ContentKind {
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("video/") {
            ContentKind::Video
        } else {
            ContentKind::Image
        }
    }

    pub fn needs_asset(&self) -> bool {
        matches!(self, ContentKind::Image | ContentKind::Video)
    }
}

/// Which upstream feed produced a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentOrigin {
    #[serde(rename = "playlist")]
    Playlist,
    #[serde(rename = "playlist-fallback")]
    PlaylistFallback,
    #[serde(rename = "zoho_cliq")]
    ZohoCliq,
    #[serde(rename = "zoho_cliq_playlist")]
    ZohoCliqPlaylist,
    #[serde(rename = "content")]
    Content,
    #[serde(rename = "fallback")]
    Fallback,
    #[serde(rename = "error")]
    Error,
}

impl ContentOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentOrigin::Playlist => "playlist",
            ContentOrigin::PlaylistFallback => "playlist-fallback",
            ContentOrigin::ZohoCliq => "zoho_cliq",
            ContentOrigin::ZohoCliqPlaylist => "zoho_cliq_playlist",
            ContentOrigin::Content => "content",
            ContentOrigin::Fallback => "fallback",
            ContentOrigin::Error => "error",
        }
    }
}

/// One resolved, displayable unit. Built fresh on every resolution and never
/// mutated afterwards; `url` is set for image/video, `text` for text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub url: Option<String>,
    pub text: Option<String>,
    pub title: String,
    pub duration: u32,
    pub source: ContentOrigin,
    pub created_at: Option<DateTime<Utc>>,
}

impl ContentItem {
    pub fn media(
        id: impl Into<String>,
        kind: ContentKind,
        url: impl Into<String>,
        title: impl Into<String>,
        duration: u32,
        source: ContentOrigin,
    ) -> Self {
        debug_assert!(kind.needs_asset());
        Self {
            id: id.into(),
            kind,
            url: Some(url.into()),
            text: None,
            title: title.into(),
            duration: duration.max(1),
            source,
            created_at: None,
        }
    }

    pub fn text(
        id: impl Into<String>,
        text: impl Into<String>,
        title: impl Into<String>,
        duration: u32,
        source: ContentOrigin,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ContentKind::Text,
            url: None,
            text: Some(text.into()),
            title: title.into(),
            duration: duration.max(1),
            source,
            created_at: None,
        }
    }

    pub fn with_created_at(mut self, created_at: Option<DateTime<Utc>>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn no_content() -> Self {
        Self::text(
            "no-content",
            "No content available",
            "No content",
            NO_CONTENT_DURATION_SECS,
            ContentOrigin::Fallback,
        )
    }

    /// Placeholder cards are replaced by the next content refresh instead of
    /// waiting for their countdown.
    pub fn is_placeholder(&self) -> bool {
        self.kind == ContentKind::Text
            && matches!(self.source, ContentOrigin::Fallback | ContentOrigin::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    // Declaration order doubles as sort order: High sorts first.
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyMessage {
    #[serde(default, deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "lenient_priority")]
    pub priority: Priority,
    pub display_duration_seconds: Option<u32>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// An emergency chosen for display. While it is showing the normal rotation
/// is suspended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyDirective {
    pub id: String,
    pub message: String,
    pub priority: Priority,
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DisplaySettings {
    pub default_slide_timer_seconds: u32,
    pub cliq_message_min_duration_seconds: u32,
    pub cliq_message_max_duration_seconds: u32,
    pub emergency_default_duration_seconds: u32,
    pub enable_default_timer_override: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            default_slide_timer_seconds: 10,
            cliq_message_min_duration_seconds: 5,
            cliq_message_max_duration_seconds: 30,
            emergency_default_duration_seconds: 30,
            enable_default_timer_override: false,
        }
    }
}

impl DisplaySettings {
    /// Reading time at 2.5 words per second, clamped to the Cliq bounds.
    pub fn message_duration(&self, text: &str) -> u32 {
        let words = text.split_whitespace().count() as u32;
        let reading = (words * 2).div_ceil(5);
        let min = self.cliq_message_min_duration_seconds.max(1);
        let max = self.cliq_message_max_duration_seconds.max(min);
        reading.clamp(min, max)
    }

    pub fn emergency_duration(&self, message: &EmergencyMessage) -> u32 {
        message
            .display_duration_seconds
            .unwrap_or(self.emergency_default_duration_seconds)
            .max(1)
    }
}

/// A reference to a media object inside a playlist.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemRef {
    #[serde(default, deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default, deserialize_with = "opaque_id_opt")]
    pub media_object_id: Option<String>,
    pub name: Option<String>,
    pub title: Option<String>,
    pub duration: Option<u32>,
}

impl PlaylistItemRef {
    pub fn display_name(&self) -> Option<&str> {
        self.title
            .as_deref()
            .or(self.name.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Playlist items arrive either as a JSON-encoded string or a native array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PlaylistItems {
    Encoded(String),
    List(Vec<PlaylistItemRef>),
}

impl Default for PlaylistItems {
    fn default() -> Self {
        PlaylistItems::List(Vec::new())
    }
}

impl PlaylistItems {
    pub fn normalize(self) -> Result<Vec<PlaylistItemRef>, serde_json::Error> {
        match self {
            PlaylistItems::List(items) => Ok(items),
            PlaylistItems::Encoded(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            PlaylistItems::Encoded(raw) => serde_json::from_str(&raw),
        }
    }
}

/// Playlist exactly as the control plane sends it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistRecord {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub duration: Option<u32>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub items: PlaylistItems,
    #[serde(default, deserialize_with = "time_of_day")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, deserialize_with = "time_of_day")]
    pub end_time: Option<NaiveTime>,
    pub days_of_week: Option<Vec<u32>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub duration_per_item: Option<u32>,
    pub is_active: bool,
    pub items: Vec<PlaylistItemRef>,
    pub schedule: Option<ScheduleWindow>,
}

impl From<PlaylistRecord> for Playlist {
    fn from(record: PlaylistRecord) -> Self {
        let items = match record.items.normalize() {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(
                    "Playlist '{}' has undecodable items, treating as empty: {}",
                    record.name,
                    e
                );
                Vec::new()
            }
        };

        let schedule = ScheduleWindow::from_parts(
            record.start_time,
            record.end_time,
            record.days_of_week,
            record.start_date,
            record.end_date,
        );

        Self {
            id: record.id,
            name: record.name,
            duration_per_item: record.duration,
            is_active: record.is_active,
            items,
            schedule,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaObject {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub mime_type: String,
    pub object_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackImage {
    #[serde(default, deserialize_with = "opaque_id")]
    pub id: String,
    pub url: Option<String>,
    #[serde(default)]
    pub title: String,
    pub duration: Option<u32>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// A general content record, also the legacy shape of live-feed messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralContent {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, deserialize_with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl GeneralContent {
    pub fn body(&self) -> &str {
        if self.content.trim().is_empty() {
            &self.title
        } else {
            &self.content
        }
    }
}

/// Newest first; records without a timestamp sink to the end.
pub fn sort_newest_first(records: &mut [GeneralContent]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// The live message feed in its canonical shape.
#[derive(Debug, Clone)]
pub enum LiveFeed {
    Playlist(Playlist),
    Messages(Vec<GeneralContent>),
    Empty,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Int(n) => n.to_string(),
            RawId::Float(f) => f.to_string(),
        }
    }
}

/// Ids arrive as strings or numbers depending on the backing table.
fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(RawId::deserialize(deserializer)?.into())
}

fn opaque_id_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?
        .map(String::from)
        .filter(|s| !s.is_empty()))
}

fn timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

/// Unknown priority labels are treated as medium rather than failing the batch.
/// Numeric levels run 1 (low) to 3 (high).
fn lenient_priority<'de, D>(deserializer: D) -> Result<Priority, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawId>::deserialize(deserializer)?.map(String::from);
    let label = raw.as_deref().map(str::trim).map(str::to_ascii_lowercase);
    if let Some(level) = label.as_deref().and_then(|l| l.parse::<f64>().ok()) {
        return Ok(if level >= 3.0 {
            Priority::High
        } else if level < 2.0 {
            Priority::Low
        } else {
            Priority::Medium
        });
    }
    Ok(match label.as_deref() {
        Some("high") | Some("critical") | Some("urgent") => Priority::High,
        Some("low") => Priority::Low,
        _ => Priority::Medium,
    })
}

fn time_of_day<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(|s| {
        NaiveTime::parse_from_str(s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
            .ok()
    }))
}

/// Lenient timestamp parsing: RFC 3339 first, then the SQL datetime form.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}
