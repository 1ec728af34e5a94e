use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server_url: String,
    pub screen_id: Option<String>,
    #[serde(default = "default_mpv_socket_path")]
    pub mpv_socket_path: String,
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub preload: PreloadConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub content_refresh_secs: u64,
    pub emergency_check_secs: u64,
    pub settings_refresh_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub loading_watchdog_secs: u64,
    pub stuck_grace_millis: u64,
    pub asset_retry_limit: u32,
    pub fade_millis: u64,
    pub guard_release_millis: u64,
    pub live_feed_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    pub enabled: bool,
    pub ahead: usize,
    pub image_timeout_secs: u64,
    pub video_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub request_timeout_secs: u64,
    pub connection_retry_limit: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

fn default_mpv_socket_path() -> String {
    "/tmp/signage-mpv-socket".to_string()
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            content_refresh_secs: 30,
            emergency_check_secs: 30,
            settings_refresh_secs: 300,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            loading_watchdog_secs: 15,
            stuck_grace_millis: 1000,
            asset_retry_limit: 3,
            fade_millis: 300,
            guard_release_millis: 500,
            live_feed_limit: 20,
        }
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ahead: 3,
            image_timeout_secs: 10,
            video_timeout_secs: 5,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 12,
            connection_retry_limit: 3,
            initial_backoff_secs: 5,
            max_backoff_secs: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PlaybackConfig {
    pub fn loading_watchdog(&self) -> Duration {
        Duration::from_secs(self.loading_watchdog_secs)
    }

    pub fn stuck_grace(&self) -> Duration {
        Duration::from_millis(self.stuck_grace_millis)
    }

    pub fn fade(&self) -> Duration {
        Duration::from_millis(self.fade_millis)
    }

    pub fn guard_release(&self) -> Duration {
        Duration::from_millis(self.guard_release_millis)
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Asset cache directory, defaulting to `$HOME/.signage-player/asset_cache`.
    pub fn cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".signage-player/asset_cache")
            }
        }
    }

    pub fn default_template() -> &'static str {
        r#"server_url = "http://127.0.0.1:8080"
# screen_id = "lobby-1"
mpv_socket_path = "/tmp/signage-mpv-socket"
# cache_dir = "/var/cache/signage-player"

[polling]
content_refresh_secs = 30
emergency_check_secs = 30
settings_refresh_secs = 300

[playback]
loading_watchdog_secs = 15
stuck_grace_millis = 1000
asset_retry_limit = 3
fade_millis = 300
guard_release_millis = 500
live_feed_limit = 20

[preload]
enabled = true
ahead = 3
image_timeout_secs = 10
video_timeout_secs = 5

[network]
request_timeout_secs = 12
connection_retry_limit = 3
initial_backoff_secs = 5
max_backoff_secs = 300

[logging]
level = "info"
"#
    }
}
