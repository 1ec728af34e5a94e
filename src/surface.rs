use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::models::{ContentItem, EmergencyDirective};

/// Signals a surface reports back about the asset it is presenting.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetSignal {
    AssetReady,
    AssetFailed(String),
    MediaEnded,
}

/// An asset signal tagged with the generation of the item it belongs to, so
/// late signals for replaced content can be dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceEvent {
    pub generation: u64,
    pub signal: AssetSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Connecting,
    ConnectionError,
}

/// Where content ends up on screen.
#[async_trait]
pub trait Surface: Send + Sync {
    /// Show an item. Image/video surfaces must later report `AssetReady` or
    /// `AssetFailed` for `generation`; videos also report `MediaEnded`.
    async fn present(&self, generation: u64, item: &ContentItem) -> Result<()>;

    async fn present_emergency(&self, directive: &EmergencyDirective) -> Result<()>;

    async fn present_status(&self, kind: StatusKind, text: &str) -> Result<()>;

    async fn fade_out(&self, duration: Duration) -> Result<()>;
}
