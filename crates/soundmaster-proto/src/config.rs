use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;
use crate::protocol::QualityTier;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub streams: StreamsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Where listener preferences (volume, mute, quality) are kept.
    #[serde(default = "default_preferences_file")]
    pub preferences_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    #[serde(default)]
    pub default_quality: QualityTier,
    /// Title shown until the stream reports its own metadata.
    #[serde(default = "default_station_title")]
    pub station_title: String,
}

/// Candidate stream URLs.  The primary is the healthy default; fallbacks are
/// tried in order when it keeps failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamsConfig {
    #[serde(default = "default_primary")]
    pub primary: String,
    #[serde(default = "default_fallbacks")]
    pub fallbacks: Vec<String>,
    /// Optional m3u file whose entries are appended to `fallbacks`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_playlist: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_restore_primary_secs")]
    pub restore_primary_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_play_timeout_ms")]
    pub play_timeout_ms: u64,
    #[serde(default = "default_init_window_ms")]
    pub init_window_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            preferences_file: default_preferences_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            default_quality: QualityTier::default(),
            station_title: default_station_title(),
        }
    }
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            fallbacks: default_fallbacks(),
            fallback_playlist: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_retries: default_max_retries(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            restore_primary_secs: default_restore_primary_secs(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            play_timeout_ms: default_play_timeout_ms(),
            init_window_ms: default_init_window_ms(),
        }
    }
}

impl RotationConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn restore_primary_after(&self) -> Duration {
        Duration::from_secs(self.restore_primary_secs)
    }
}

impl WatchdogConfig {
    pub fn play_timeout(&self) -> Duration {
        Duration::from_millis(self.play_timeout_ms)
    }

    pub fn init_window(&self) -> Duration {
        Duration::from_millis(self.init_window_ms)
    }
}

fn default_preferences_file() -> PathBuf {
    platform::data_dir().join("preferences.json")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_volume() -> f32 {
    0.8
}

fn default_station_title() -> String {
    "Soundmaster Live".to_string()
}

fn default_primary() -> String {
    "https://stream.soundmaster.example/live.mp3".to_string()
}

fn default_fallbacks() -> Vec<String> {
    vec![
        "https://mirror1.soundmaster.example/live.mp3".to_string(),
        "https://mirror2.soundmaster.example/live.mp3".to_string(),
    ]
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_jitter_ms() -> u64 {
    1_000
}

fn default_debounce_ms() -> u64 {
    5_000
}

fn default_restore_primary_secs() -> u64 {
    300
}

fn default_play_timeout_ms() -> u64 {
    5_000
}

fn default_init_window_ms() -> u64 {
    1_000
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.streams.primary.trim().is_empty() {
            anyhow::bail!("streams.primary must not be empty");
        }
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
