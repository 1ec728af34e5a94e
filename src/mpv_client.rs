//! mpv as the display surface.
//!
//! mpv is driven over its JSON IPC socket. A writer task serialises
//! commands, a reader task routes replies back by `request_id` and forwards
//! everything else as events, which [`MpvSurface`] turns into asset signals
//! for the player.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::models::{ContentItem, ContentKind, EmergencyDirective};
use crate::surface::{AssetSignal, StatusKind, Surface, SurfaceEvent};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const FADE_STEPS: u32 = 10;
/// Backdrop for text, emergency and status screens.
const BLANK_SCREEN: &str = "av://lavfi:color=c=black:s=1920x1080";
/// OSD text that stays until replaced.
const STATUS_OSD_MILLIS: u64 = 24 * 60 * 60 * 1000;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

pub async fn spawn_mpv(socket_path: &str) -> Result<Child> {
    if Path::new(socket_path).exists() {
        // Stale socket from a previous run
        let _ = std::fs::remove_file(socket_path);
    }

    let child = Command::new("mpv")
        .arg("--idle=yes")
        .arg("--force-window=yes")
        .arg("--fullscreen")
        .arg("--no-osc")
        .arg("--no-input-default-bindings")
        .arg("--image-display-duration=inf")
        .arg("--keep-open=no")
        .arg(format!("--input-ipc-server={}", socket_path))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("failed to start mpv")?;

    for _ in 0..100 {
        if Path::new(socket_path).exists() {
            return Ok(child);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    bail!("mpv IPC socket {} did not appear", socket_path)
}

struct Request {
    id: u64,
    payload: String,
    reply: oneshot::Sender<Result<Value>>,
}

/// Cloneable command handle for one mpv IPC connection.
#[derive(Clone)]
pub struct MpvClient {
    tx: mpsc::Sender<Request>,
    next_id: Arc<AtomicU64>,
}

impl MpvClient {
    /// Connects to the socket; unsolicited mpv events go to `events`.
    pub async fn connect(socket_path: &str, events: mpsc::Sender<Value>) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("connecting to mpv socket {}", socket_path))?;
        let (read_half, write_half) = stream.into_split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(writer_task(write_half, rx, pending.clone()));
        tokio::spawn(reader_task(BufReader::new(read_half), pending, events));

        tracing::info!("Connected to mpv at {}", socket_path);
        Ok(Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub async fn send_command(&self, command: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut payload = serde_json::to_string(&json!({ "command": command, "request_id": id }))?;
        payload.push('\n');
        tracing::debug!("Sending mpv command: {}", payload.trim());

        let (reply, response) = oneshot::channel();
        self.tx
            .send(Request { id, payload, reply })
            .await
            .map_err(|_| anyhow!("mpv connection closed"))?;

        tokio::time::timeout(REPLY_TIMEOUT, response)
            .await
            .map_err(|_| anyhow!("mpv did not answer request {}", id))?
            .map_err(|_| anyhow!("mpv reply for request {} dropped", id))?
    }

    pub async fn load(&self, url: &str) -> Result<()> {
        self.send_command(json!(["loadfile", url, "replace"])).await?;
        Ok(())
    }

    pub async fn show_text(&self, text: &str, millis: u64) -> Result<()> {
        self.send_command(json!(["show-text", text, millis])).await?;
        Ok(())
    }

    pub async fn set_brightness(&self, value: i64) -> Result<()> {
        self.send_command(json!(["set_property", "brightness", value.clamp(-100, 100)]))
            .await?;
        Ok(())
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: Pending, events: mpsc::Sender<Value>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                tracing::warn!("mpv closed the IPC connection");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let value: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::debug!("Ignoring malformed mpv line '{}': {}", trimmed, e);
                        continue;
                    }
                };

                match value.get("request_id").and_then(Value::as_u64) {
                    Some(id) => {
                        let Some(reply) = pending.lock().await.remove(&id) else {
                            continue;
                        };
                        let result = match value["error"].as_str() {
                            Some("success") => Ok(value),
                            other => Err(anyhow!("mpv error: {}", other.unwrap_or("unknown"))),
                        };
                        let _ = reply.send(result);
                    }
                    None => {
                        if events.send(value).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("mpv IPC read error: {}", e);
                fail_pending(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<Request>, pending: Pending)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(request) = rx.recv().await {
        // Register before writing so the reader can always match the reply
        pending.lock().await.insert(request.id, request.reply);
        if let Err(e) = writer.write_all(request.payload.as_bytes()).await {
            tracing::warn!("mpv IPC write error: {}", e);
            if let Some(reply) = pending.lock().await.remove(&request.id) {
                let _ = reply.send(Err(anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
}

async fn fail_pending(pending: &Pending, reason: &str) {
    for (_, reply) in pending.lock().await.drain() {
        let _ = reply.send(Err(anyhow!("{}", reason)));
    }
}

/// What mpv is currently showing on behalf of the player.
#[derive(Debug, Default)]
struct Presentation {
    generation: u64,
    url: Option<String>,
    loaded: bool,
    /// Off for backdrops, whose load/end events mean nothing to the player.
    reports_signals: bool,
}

pub struct MpvSurface {
    client: MpvClient,
    presentation: Arc<std::sync::Mutex<Presentation>>,
    signals: mpsc::Sender<SurfaceEvent>,
}

impl MpvSurface {
    pub async fn connect(socket_path: &str, signals: mpsc::Sender<SurfaceEvent>) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::channel(64);
        let client = MpvClient::connect(socket_path, events_tx).await?;
        let presentation = Arc::new(std::sync::Mutex::new(Presentation::default()));

        tokio::spawn(forward_events(
            events_rx,
            presentation.clone(),
            signals.clone(),
        ));

        Ok(Self {
            client,
            presentation,
            signals,
        })
    }

    fn update<T>(&self, f: impl FnOnce(&mut Presentation) -> T) -> T {
        let mut presentation = self
            .presentation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut presentation)
    }

    async fn show_backdrop(&self, generation: u64) -> Result<()> {
        let already = self.update(|p| {
            let already = p.url.as_deref() == Some(BLANK_SCREEN);
            p.generation = generation;
            p.url = Some(BLANK_SCREEN.to_string());
            p.reports_signals = false;
            already
        });
        if !already {
            self.client.load(BLANK_SCREEN).await?;
        }
        self.client.set_brightness(0).await
    }
}

#[async_trait]
impl Surface for MpvSurface {
    async fn present(&self, generation: u64, item: &ContentItem) -> Result<()> {
        match item.kind {
            ContentKind::Text => {
                self.show_backdrop(generation).await?;
                let text = item.text.as_deref().unwrap_or(&item.title);
                self.client
                    .show_text(text, u64::from(item.duration) * 1000)
                    .await
            }
            ContentKind::Image | ContentKind::Video => {
                let url = item
                    .url
                    .as_deref()
                    .ok_or_else(|| anyhow!("item '{}' has no url", item.id))?;

                let reuse = self.update(|p| {
                    let reuse = p.loaded && p.url.as_deref() == Some(url);
                    p.generation = generation;
                    p.url = Some(url.to_string());
                    p.reports_signals = true;
                    if !reuse {
                        p.loaded = false;
                    }
                    reuse
                });

                if reuse {
                    let _ = self
                        .signals
                        .send(SurfaceEvent {
                            generation,
                            signal: AssetSignal::AssetReady,
                        })
                        .await;
                } else {
                    self.client.load(url).await?;
                }
                self.client.set_brightness(0).await
            }
        }
    }

    async fn present_emergency(&self, directive: &EmergencyDirective) -> Result<()> {
        self.show_backdrop(0).await?;
        let text = format!("EMERGENCY\n\n{}", directive.message);
        self.client
            .show_text(&text, u64::from(directive.duration) * 1000)
            .await
    }

    async fn present_status(&self, kind: StatusKind, text: &str) -> Result<()> {
        tracing::debug!("Showing {:?} screen", kind);
        self.show_backdrop(0).await?;
        self.client.show_text(text, STATUS_OSD_MILLIS).await
    }

    async fn fade_out(&self, duration: Duration) -> Result<()> {
        let step = duration / FADE_STEPS;
        for i in 1..=FADE_STEPS {
            self.client
                .set_brightness(-(i64::from(i) * 100 / i64::from(FADE_STEPS)))
                .await?;
            tokio::time::sleep(step).await;
        }
        Ok(())
    }
}

async fn forward_events(
    mut events: mpsc::Receiver<Value>,
    presentation: Arc<std::sync::Mutex<Presentation>>,
    signals: mpsc::Sender<SurfaceEvent>,
) {
    while let Some(event) = events.recv().await {
        let signal = match event.get("event").and_then(Value::as_str) {
            Some("file-loaded") => Some(AssetSignal::AssetReady),
            Some("end-file") => match event.get("reason").and_then(Value::as_str) {
                Some("eof") => Some(AssetSignal::MediaEnded),
                Some("error") => Some(AssetSignal::AssetFailed(
                    event
                        .get("file_error")
                        .and_then(Value::as_str)
                        .unwrap_or("playback error")
                        .to_string(),
                )),
                _ => None,
            },
            _ => None,
        };
        let Some(signal) = signal else {
            continue;
        };

        let generation = {
            let mut p = presentation
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !p.reports_signals {
                continue;
            }
            match signal {
                AssetSignal::AssetReady => p.loaded = true,
                AssetSignal::AssetFailed(_) | AssetSignal::MediaEnded => p.loaded = false,
            }
            p.generation
        };

        if signals.send(SurfaceEvent { generation, signal }).await.is_err() {
            break;
        }
    }
}
