use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub stations: StationsConfig,
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

/// Playback controller tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Volume (0-100) the player starts with.
    #[serde(default = "default_volume")]
    pub default_volume: u8,
    /// Level assigned when unmuting while the volume sits at 0.
    #[serde(default = "default_unmute_volume")]
    pub unmute_volume: u8,
    /// Fallback delay before playing a freshly selected station that never
    /// signalled readiness.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// After this delay a station switch stops listening for readiness.
    #[serde(default = "default_listener_expiry_ms")]
    pub listener_expiry_ms: u64,
}

impl PlayerConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn listener_expiry(&self) -> Duration {
        Duration::from_millis(self.listener_expiry_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MpvConfig {
    /// Use mpv from PATH instead of a binary shipped beside the daemon.
    #[serde(default)]
    pub use_system_binary: bool,
}

/// Station list source: a local TOML file, with an optional m3u fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationsConfig {
    /// Path to a local TOML station file (highest priority).
    /// Defaults to `~/.config/lofi/stations.toml`.
    #[serde(default = "default_stations_toml")]
    pub stations_toml: PathBuf,
    /// URL or file path of an m3u station list.  Empty disables it and the
    /// built-in stations are used.
    #[serde(default)]
    pub m3u_url: String,
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
            unmute_volume: default_unmute_volume(),
            ready_timeout_ms: default_ready_timeout_ms(),
            listener_expiry_ms: default_listener_expiry_ms(),
        }
    }
}

impl Default for StationsConfig {
    fn default() -> Self {
        Self {
            stations_toml: default_stations_toml(),
            m3u_url: String::new(),
        }
    }
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_volume() -> u8 {
    70
}

fn default_unmute_volume() -> u8 {
    30
}

fn default_ready_timeout_ms() -> u64 {
    2000
}

fn default_listener_expiry_ms() -> u64 {
    5000
}

fn default_stations_toml() -> PathBuf {
    platform::config_dir().join("stations.toml")
}

impl Config {
    /// Load the default config file, writing one with defaults on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.player.default_volume = config.player.default_volume.min(100);
        config.player.unmute_volume = config.player.unmute_volume.clamp(1, 100);
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
