//! The player task.
//!
//! Owns the [`PlayerStateMachine`] and is the only place it is mutated. All
//! slow work (content resolution, emergency checks, fades, delayed actions)
//! runs in spawned tasks that report back through the event channel, so a
//! late answer can be matched against the ticket it was issued for.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::SignageApi;
use crate::config::{NetworkConfig, PlaybackConfig};
use crate::connection::ConnectionMonitor;
use crate::content_source::{self, ContentSource, Resolution};
use crate::error::PlaybackError;
use crate::models::{ContentItem, ContentKind, ContentOrigin, DisplaySettings, EmergencyDirective};
use crate::player::{AdvanceTicket, AssetFailure, Commit, PlayerStateMachine, TickOutcome};
use crate::preloader::Preloader;
use crate::scheduler::{InFlight, InFlightGuard};
use crate::surface::{AssetSignal, StatusKind, Surface, SurfaceEvent};

const TICK_INTERVAL: Duration = Duration::from_millis(250);
const EVENT_BUFFER: usize = 64;

#[derive(Debug)]
pub enum PlayerEvent {
    /// Current item is done, resolve the next one.
    Advance,
    Resolved {
        ticket: AdvanceTicket,
        outcome: Result<Resolution, PlaybackError>,
    },
    ReleaseGuard(AdvanceTicket),
    /// Asset signal raised by the runtime itself (e.g. the surface refused
    /// the item outright).
    Surface(SurfaceEvent),
    RefreshContent,
    CheckEmergency,
    EmergencyFound(EmergencyDirective),
}

pub struct PlayerRuntime {
    machine: PlayerStateMachine,
    source: Arc<Mutex<ContentSource>>,
    api: Arc<dyn SignageApi>,
    settings: Arc<RwLock<DisplaySettings>>,
    surface: Arc<dyn Surface>,
    surface_events: Option<mpsc::Receiver<SurfaceEvent>>,
    preloader: Option<Preloader>,
    preload_ahead: usize,
    monitor: ConnectionMonitor,
    playback: PlaybackConfig,
    refresh: InFlight,
    emergency_check: InFlight,
    tx: mpsc::Sender<PlayerEvent>,
    rx: Option<mpsc::Receiver<PlayerEvent>>,
}

impl PlayerRuntime {
    pub fn new(
        api: Arc<dyn SignageApi>,
        settings: Arc<RwLock<DisplaySettings>>,
        surface: Arc<dyn Surface>,
        surface_events: mpsc::Receiver<SurfaceEvent>,
        playback: PlaybackConfig,
        network: &NetworkConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let source = ContentSource::new(api.clone(), settings.clone(), playback.live_feed_limit);

        Self {
            machine: PlayerStateMachine::new(
                playback.asset_retry_limit,
                playback.loading_watchdog(),
            ),
            source: Arc::new(Mutex::new(source)),
            api,
            settings,
            surface,
            surface_events: Some(surface_events),
            preloader: None,
            preload_ahead: 0,
            monitor: ConnectionMonitor::new(network),
            playback,
            refresh: InFlight::default(),
            emergency_check: InFlight::default(),
            tx,
            rx: Some(rx),
        }
    }

    pub fn with_preloader(mut self, preloader: Preloader, ahead: usize) -> Self {
        self.preloader = Some(preloader);
        self.preload_ahead = ahead;
        self
    }

    /// Channel for the scheduler and other outside producers.
    pub fn sender(&self) -> mpsc::Sender<PlayerEvent> {
        self.tx.clone()
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let (Some(mut rx), Some(mut surface_events)) = (self.rx.take(), self.surface_events.take())
        else {
            return;
        };
        tracing::info!("Player started");
        self.advance();

        let mut tick = interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => self.on_tick(),
                Some(event) = rx.recv() => self.handle(event).await,
                Some(event) = surface_events.recv() => self.on_surface(event).await,
            }
        }

        tracing::info!("Player stopped");
    }

    async fn handle(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Advance => self.advance(),
            PlayerEvent::Resolved { ticket, outcome } => self.on_resolved(ticket, outcome).await,
            PlayerEvent::ReleaseGuard(ticket) => {
                if self.machine.release_guard(ticket) {
                    tracing::debug!("Item finished while guarded, advancing now");
                    self.advance();
                }
            }
            PlayerEvent::Surface(event) => self.on_surface(event).await,
            PlayerEvent::RefreshContent => self.refresh_content(),
            PlayerEvent::CheckEmergency => self.check_emergency(),
            PlayerEvent::EmergencyFound(directive) => {
                if self.machine.preempt(directive.clone(), Instant::now()) {
                    self.show_emergency(&directive).await;
                }
            }
        }
    }

    fn on_tick(&mut self) {
        match self.machine.tick(Instant::now()) {
            TickOutcome::Nothing => {}
            TickOutcome::ContentExpired => self.transition(),
            TickOutcome::StuckLoad(err) => {
                tracing::error!("{}, moving on", err);
                self.after(self.playback.stuck_grace(), PlayerEvent::Advance);
            }
            TickOutcome::EmergencyExpired => self.advance(),
        }
    }

    fn advance(&mut self) {
        if let Some(ticket) = self.machine.begin_advance() {
            self.spawn_resolution(ticket, None);
        }
    }

    /// Background refresh: only replaces placeholders, never cuts a rotation
    /// item short.
    fn refresh_content(&mut self) {
        if !self.machine.wants_refresh() {
            return;
        }
        let Some(guard) = self.refresh.try_begin() else {
            tracing::debug!("Content refresh already in flight, skipping");
            return;
        };
        if let Some(ticket) = self.machine.begin_advance() {
            tracing::debug!("Refreshing placeholder content");
            self.spawn_resolution(ticket, Some(guard));
        }
    }

    fn spawn_resolution(&self, ticket: AdvanceTicket, guard: Option<InFlightGuard>) {
        let source = self.source.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let outcome = source.lock().await.resolve_next().await;
            let _ = tx.send(PlayerEvent::Resolved { ticket, outcome }).await;
            drop(guard);
        });
    }

    async fn on_resolved(
        &mut self,
        ticket: AdvanceTicket,
        outcome: Result<Resolution, PlaybackError>,
    ) {
        if !self.machine.is_current(ticket) {
            tracing::debug!("Ignoring superseded resolution");
            return;
        }

        let resolution = match outcome {
            Ok(resolution) => {
                if self.monitor.record_success() {
                    tracing::info!("Connection to server restored");
                }
                resolution
            }
            Err(e) => {
                if let Some(err) = self.monitor.record_failure() {
                    tracing::error!("{}", err);
                }
                tracing::warn!("{} (failure {} in a row)", e, self.monitor.failures());
                // The card stays up for the backoff delay, then the next
                // advance retries
                let delay = self.monitor.next_delay();
                Resolution::Content(ContentItem::text(
                    "connection-error",
                    "Unable to reach the server",
                    "Offline",
                    u32::try_from(delay.as_secs()).unwrap_or(u32::MAX),
                    ContentOrigin::Error,
                ))
            }
        };

        match self.machine.commit(ticket, resolution, Instant::now()) {
            Commit::Stale => return,
            Commit::Emergency(directive) => self.show_emergency(&directive).await,
            Commit::Present { generation, item } => self.render(generation, item).await,
        }

        self.after(self.playback.guard_release(), PlayerEvent::ReleaseGuard(ticket));
    }

    async fn render(&mut self, generation: u64, item: ContentItem) {
        if item.source == ContentOrigin::Error && self.monitor.is_down() {
            let text = item.text.as_deref().unwrap_or_default();
            if let Err(e) = self
                .surface
                .present_status(StatusKind::ConnectionError, text)
                .await
            {
                tracing::warn!("Failed to show connection error screen: {}", e);
            }
            return;
        }

        self.present(generation, &item).await;

        if matches!(
            item.source,
            ContentOrigin::Playlist | ContentOrigin::ZohoCliqPlaylist
        ) {
            self.preload_upcoming();
        }
    }

    async fn present(&self, generation: u64, item: &ContentItem) {
        let item = self.with_cached_asset(item);
        if let Err(e) = self.surface.present(generation, &item).await {
            tracing::warn!("Surface rejected '{}': {:#}", item.id, e);
            if item.kind.needs_asset() {
                self.notify(PlayerEvent::Surface(SurfaceEvent {
                    generation,
                    signal: AssetSignal::AssetFailed(e.to_string()),
                }));
            }
        }
    }

    /// Points cached images at their local copy.
    fn with_cached_asset(&self, item: &ContentItem) -> ContentItem {
        let mut item = item.clone();
        if item.kind != ContentKind::Image {
            return item;
        }
        let local = match (&self.preloader, &item.url) {
            (Some(preloader), Some(url)) => preloader.cached_path(url),
            _ => None,
        };
        if let Some(path) = local {
            item.url = Some(path.to_string_lossy().into_owned());
        }
        item
    }

    fn preload_upcoming(&self) {
        let Some(preloader) = self.preloader.clone() else {
            return;
        };
        let source = self.source.clone();
        let ahead = self.preload_ahead;

        tokio::spawn(async move {
            let (keep, targets) = {
                let source = source.lock().await;
                (source.rotation_urls(), source.upcoming(ahead))
            };
            match preloader.retain(&keep).await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!("Evicted {} cached assets", removed),
                Err(e) => tracing::warn!("Asset cache cleanup failed: {:#}", e),
            }
            preloader.spawn_warm_up(targets);
        });
    }

    async fn on_surface(&mut self, event: SurfaceEvent) {
        let SurfaceEvent { generation, signal } = event;
        let now = Instant::now();

        match signal {
            AssetSignal::AssetReady => {
                if self.machine.asset_ready(generation, now) {
                    tracing::debug!("Asset ready for generation {}", generation);
                }
            }
            AssetSignal::AssetFailed(reason) => {
                match self.machine.asset_failed(generation, &reason, now) {
                    AssetFailure::Ignored => {
                        tracing::debug!("Ignoring asset failure for generation {}", generation)
                    }
                    AssetFailure::Retry { attempt } => {
                        tracing::debug!(
                            "Presenting generation {} again, attempt {}",
                            generation,
                            attempt
                        );
                        if let Some(item) = self.machine.current().cloned() {
                            // Retry from the origin, the cached copy may be the problem
                            if let Err(e) = self.surface.present(generation, &item).await {
                                self.notify(PlayerEvent::Surface(SurfaceEvent {
                                    generation,
                                    signal: AssetSignal::AssetFailed(e.to_string()),
                                }));
                            }
                        }
                    }
                    AssetFailure::GiveUp(err) => {
                        tracing::warn!("{}, skipping", err);
                        self.transition();
                    }
                }
            }
            AssetSignal::MediaEnded => {
                if self.machine.media_ended(generation) {
                    self.transition();
                }
            }
        }
    }

    fn check_emergency(&self) {
        if self.machine.emergency().is_some() {
            return;
        }
        let Some(guard) = self.emergency_check.try_begin() else {
            tracing::debug!("Emergency check already in flight, skipping");
            return;
        };
        let api = self.api.clone();
        let settings = self.settings.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let _guard = guard;
            match content_source::check_emergency(api.as_ref(), &settings).await {
                Ok(Some(directive)) => {
                    let _ = tx.send(PlayerEvent::EmergencyFound(directive)).await;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Emergency check failed: {}", e),
            }
        });
    }

    async fn show_emergency(&self, directive: &EmergencyDirective) {
        if let Err(e) = self.surface.present_emergency(directive).await {
            tracing::error!("Failed to show emergency '{}': {:#}", directive.id, e);
        }
    }

    /// Fades the current item out, then asks for the next one.
    fn transition(&self) {
        let surface = self.surface.clone();
        let tx = self.tx.clone();
        let fade = self.playback.fade();

        tokio::spawn(async move {
            if let Err(e) = surface.fade_out(fade).await {
                tracing::warn!("Fade out failed: {}", e);
            }
            let _ = tx.send(PlayerEvent::Advance).await;
        });
    }

    fn after(&self, delay: Duration, event: PlayerEvent) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event).await;
        });
    }

    fn notify(&self, event: PlayerEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!("Dropping player event: {}", e);
        }
    }
}
