use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::SignageApi;
use crate::config::NetworkConfig;
use crate::error::PlaybackError;
use crate::models::DisplaySettings;
use crate::surface::{StatusKind, Surface};

/// Doubling retry delay, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

/// Counts consecutive whole-resolution failures. After `limit` of them the
/// player is considered disconnected and shows the connection error screen.
#[derive(Debug)]
pub struct ConnectionMonitor {
    failures: u32,
    limit: u32,
    backoff: Backoff,
}

impl ConnectionMonitor {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            failures: 0,
            limit: config.connection_retry_limit.max(1),
            backoff: Backoff::new(
                Duration::from_secs(config.initial_backoff_secs),
                Duration::from_secs(config.max_backoff_secs),
            ),
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_down(&self) -> bool {
        self.failures >= self.limit
    }

    /// Returns the connection error once the limit is first reached.
    pub fn record_failure(&mut self) -> Option<PlaybackError> {
        self.failures += 1;
        if self.failures == self.limit {
            Some(PlaybackError::ConnectionError {
                attempts: self.failures,
            })
        } else {
            None
        }
    }

    /// Returns true when this success ends an outage.
    pub fn record_success(&mut self) -> bool {
        let recovered = self.is_down();
        self.failures = 0;
        self.backoff.reset();
        recovered
    }

    pub fn next_delay(&mut self) -> Duration {
        self.backoff.next_delay()
    }
}

/// Blocks until the control plane answers a settings request, showing a
/// connecting (then connection error) screen meanwhile. `None` if cancelled.
pub async fn wait_for_server(
    api: &dyn SignageApi,
    surface: &dyn Surface,
    monitor: &mut ConnectionMonitor,
    cancel: &CancellationToken,
) -> Option<DisplaySettings> {
    loop {
        match api.display_settings().await {
            Ok(settings) => {
                if monitor.record_success() {
                    tracing::info!("Connection to server restored");
                } else {
                    tracing::info!("Connected to server");
                }
                return Some(settings);
            }
            Err(e) => {
                tracing::warn!("Server not reachable: {}", e);
                if let Some(err) = monitor.record_failure() {
                    tracing::error!("{}", err);
                }
            }
        }

        let (kind, text) = if monitor.is_down() {
            (StatusKind::ConnectionError, "Unable to reach the server")
        } else {
            (StatusKind::Connecting, "Connecting...")
        };
        if let Err(e) = surface.present_status(kind, text).await {
            tracing::warn!("Failed to show status screen: {}", e);
        }

        let delay = monitor.next_delay();
        tracing::info!("Retrying in {:?}...", delay);
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeApi, RecordingSurface};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn monitor() -> ConnectionMonitor {
        ConnectionMonitor::new(&NetworkConfig::default())
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(300));
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 300, 300]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_error_raised_once_at_limit() {
        let mut m = monitor();
        assert!(m.record_failure().is_none());
        assert!(m.record_failure().is_none());
        assert!(!m.is_down());

        assert!(matches!(
            m.record_failure(),
            Some(PlaybackError::ConnectionError { attempts: 3 })
        ));
        assert!(m.is_down());
        assert!(m.record_failure().is_none());

        assert!(m.record_success());
        assert_eq!(m.failures(), 0);
        assert!(!m.record_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_server_shows_error_screen_then_recovers() {
        let api = Arc::new(FakeApi::offline());
        let (tx, _rx) = mpsc::channel(8);
        let surface = RecordingSurface::new(tx);
        let cancel = CancellationToken::new();

        let recover = api.clone();
        tokio::spawn(async move {
            // Attempts at 0s, 5s and 15s fail, the one at 35s succeeds
            tokio::time::sleep(Duration::from_secs(30)).await;
            FakeApi::set(&recover.settings, DisplaySettings::default());
        });

        let mut m = monitor();
        let settings = wait_for_server(api.as_ref(), &surface, &mut m, &cancel).await;

        assert!(settings.is_some());
        assert_eq!(api.settings_calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            surface.statuses(),
            vec![
                StatusKind::Connecting,
                StatusKind::Connecting,
                StatusKind::ConnectionError
            ]
        );
        assert!(!m.is_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_server_stops_on_cancel() {
        let api = FakeApi::offline();
        let (tx, _rx) = mpsc::channel(8);
        let surface = RecordingSurface::new(tx);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut m = monitor();
        assert!(wait_for_server(&api, &surface, &mut m, &cancel)
            .await
            .is_none());
    }
}
