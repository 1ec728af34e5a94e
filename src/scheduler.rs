use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::SignageApi;
use crate::config::PollingConfig;
use crate::models::DisplaySettings;
use crate::runtime::PlayerEvent;

/// Debounce flag for a background job. A second job is skipped while the
/// guard of the first one is alive.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<AtomicBool>);

pub struct InFlightGuard(Arc<AtomicBool>);

impl InFlight {
    pub fn try_begin(&self) -> Option<InFlightGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(self.0.clone()))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives the three background timers: content refresh, emergency check and
/// display settings refresh.
pub struct PollingScheduler {
    config: PollingConfig,
    events: mpsc::Sender<PlayerEvent>,
    api: Arc<dyn SignageApi>,
    settings: Arc<RwLock<DisplaySettings>>,
    settings_refresh: InFlight,
}

impl PollingScheduler {
    pub fn new(
        config: PollingConfig,
        events: mpsc::Sender<PlayerEvent>,
        api: Arc<dyn SignageApi>,
        settings: Arc<RwLock<DisplaySettings>>,
    ) -> Self {
        Self {
            config,
            events,
            api,
            settings,
            settings_refresh: InFlight::default(),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut content = every(self.config.content_refresh_secs);
        let mut emergency = every(self.config.emergency_check_secs);
        let mut settings = every(self.config.settings_refresh_secs);

        tracing::info!(
            "Polling every {}s (content), {}s (emergency), {}s (settings)",
            self.config.content_refresh_secs,
            self.config.emergency_check_secs,
            self.config.settings_refresh_secs
        );

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = content.tick() => PlayerEvent::RefreshContent,
                _ = emergency.tick() => PlayerEvent::CheckEmergency,
                _ = settings.tick() => {
                    self.refresh_settings();
                    continue;
                }
            };

            if self.events.send(event).await.is_err() {
                tracing::debug!("Player gone, stopping scheduler");
                break;
            }
        }
    }

    fn refresh_settings(&self) {
        let Some(guard) = self.settings_refresh.try_begin() else {
            tracing::debug!("Settings refresh already in flight, skipping");
            return;
        };
        let api = self.api.clone();
        let settings = self.settings.clone();

        tokio::spawn(async move {
            let _guard = guard;
            match api.display_settings().await {
                Ok(fresh) => {
                    let mut current = settings.write().await;
                    if *current != fresh {
                        tracing::info!("Display settings updated: {:?}", fresh);
                        *current = fresh;
                    }
                }
                Err(e) => tracing::warn!("Failed to refresh display settings: {}", e),
            }
        });
    }
}

/// First tick one full period from now; startup does its own initial work.
fn every(secs: u64) -> tokio::time::Interval {
    let period = Duration::from_secs(secs.max(1));
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;

    #[test]
    fn test_in_flight_debounce() {
        let flag = InFlight::default();
        let guard = flag.try_begin();
        assert!(guard.is_some());
        assert!(flag.try_begin().is_none());
        assert!(flag.clone().try_begin().is_none());

        drop(guard);
        assert!(flag.try_begin().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_emit_events_and_refresh_settings() {
        let api = Arc::new(FakeApi::default());
        let fresh = DisplaySettings {
            default_slide_timer_seconds: 42,
            ..DisplaySettings::default()
        };
        FakeApi::set(&api.settings, fresh.clone());

        let settings = Arc::new(RwLock::new(DisplaySettings::default()));
        let (tx, mut rx) = mpsc::channel(64);
        let config = PollingConfig {
            content_refresh_secs: 30,
            emergency_check_secs: 10,
            settings_refresh_secs: 60,
        };
        let cancel = CancellationToken::new();
        let scheduler = PollingScheduler::new(config, tx, api.clone(), settings.clone());
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(60_500)).await;
        cancel.cancel();
        handle.await.unwrap();

        let mut refresh = 0;
        let mut emergency = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                PlayerEvent::RefreshContent => refresh += 1,
                PlayerEvent::CheckEmergency => emergency += 1,
                _ => {}
            }
        }
        assert_eq!(refresh, 2);
        assert_eq!(emergency, 6);
        assert_eq!(*settings.read().await, fresh);
    }
}
