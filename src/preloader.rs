//! Background warm-up of upcoming playlist assets.
//!
//! Images are downloaded in full into the on-disk cache, so the player can
//! hand mpv a local file. Videos only get a ranged read of their first
//! megabyte, which is enough to warm CDN and connection caches. Files for
//! urls that left the rotation are evicted by [`Preloader::retain`].

use anyhow::{Context, Result};
use futures::future::join_all;
use reqwest::header::RANGE;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::PreloadConfig;
use crate::content_source::PreloadTarget;
use crate::models::ContentKind;

const VIDEO_HEAD_BYTES: u64 = 1024 * 1024;

#[derive(Clone)]
pub struct Preloader {
    client: Client,
    cache_dir: PathBuf,
    image_timeout: Duration,
    video_timeout: Duration,
    warm: Arc<Mutex<HashSet<String>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Preloader {
    pub fn new(cache_dir: PathBuf, config: &PreloadConfig) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("creating asset cache {}", cache_dir.display()))?;

        Ok(Self {
            client: Client::new(),
            cache_dir,
            image_timeout: Duration::from_secs(config.image_timeout_secs),
            video_timeout: Duration::from_secs(config.video_timeout_secs),
            warm: Arc::new(Mutex::new(HashSet::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Local copy of a previously downloaded image.
    pub fn cached_path(&self, url: &str) -> Option<PathBuf> {
        let path = self.cache_path(url);
        path.is_file().then_some(path)
    }

    #[cfg(test)]
    pub fn is_warm(&self, url: &str) -> bool {
        lock(&self.warm).contains(url)
    }

    /// Fire-and-forget variant of [`Preloader::warm_up`].
    pub fn spawn_warm_up(&self, targets: Vec<PreloadTarget>) {
        if targets.is_empty() {
            return;
        }
        let preloader = self.clone();
        tokio::spawn(async move { preloader.warm_up(targets).await });
    }

    /// Fetches every target that is neither warm nor already being fetched.
    /// Failures are logged and never retried here; the next rotation pass
    /// tries again.
    pub async fn warm_up(&self, targets: Vec<PreloadTarget>) {
        let claimed: Vec<PreloadTarget> = {
            let warm = lock(&self.warm);
            let mut in_flight = lock(&self.in_flight);
            targets
                .into_iter()
                .filter(|t| !warm.contains(&t.url) && in_flight.insert(t.url.clone()))
                .collect()
        };

        join_all(claimed.into_iter().map(|target| self.fetch(target))).await;
    }

    async fn fetch(&self, target: PreloadTarget) {
        let outcome = match target.kind {
            ContentKind::Image => self.download_image(&target.url).await.map(|_| ()),
            ContentKind::Video => self.prefetch_video_head(&target.url).await,
            ContentKind::Text => Ok(()),
        };

        match outcome {
            Ok(()) => {
                tracing::debug!("Preloaded {}", target.url);
                lock(&self.warm).insert(target.url.clone());
            }
            Err(e) => tracing::warn!("Preload of {} failed: {:#}", target.url, e),
        }
        lock(&self.in_flight).remove(&target.url);
    }

    async fn download_image(&self, url: &str) -> Result<PathBuf> {
        let path = self.cache_path(url);
        if path.is_file() {
            return Ok(path);
        }

        let bytes = self
            .client
            .get(url)
            .timeout(self.image_timeout)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        // Write then rename so a half-written file is never served
        let partial = path.with_extension("part");
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, &path).await?;
        Ok(path)
    }

    async fn prefetch_video_head(&self, url: &str) -> Result<()> {
        let mut response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes=0-{}", VIDEO_HEAD_BYTES - 1))
            .timeout(self.video_timeout)
            .send()
            .await?
            .error_for_status()?;

        // Servers that ignore Range send the whole file; stop after the head
        let mut received = 0u64;
        while let Some(chunk) = response.chunk().await? {
            received += chunk.len() as u64;
            if received >= VIDEO_HEAD_BYTES {
                break;
            }
        }
        Ok(())
    }

    /// Deletes cached files for urls outside `keep` and forgets their warm
    /// state. Downloads still in flight are left alone. Returns the number
    /// of files removed.
    pub async fn retain(&self, keep: &[String]) -> Result<usize> {
        let mut wanted: HashSet<String> = keep.iter().map(|url| url_hash(url)).collect();
        wanted.extend(lock(&self.in_flight).iter().map(|url| url_hash(url)));
        lock(&self.warm).retain(|url| keep.contains(url));

        let mut entries = tokio::fs::read_dir(&self.cache_dir)
            .await
            .with_context(|| format!("reading asset cache {}", self.cache_dir.display()))?;
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let cached = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("asset") | Some("part")
            );
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !cached || wanted.contains(stem) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to evict {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }

    fn cache_path(&self, url: &str) -> PathBuf {
        cache_file(&self.cache_dir, url)
    }
}

fn cache_file(dir: &Path, url: &str) -> PathBuf {
    dir.join(format!("{}.asset", url_hash(url)))
}

/// Deterministic cache filename for a url.
fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let result = hasher.finalize();
    format!("{:x}", result)[..16].to_string()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
