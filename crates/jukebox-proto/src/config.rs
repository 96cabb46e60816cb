use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub cache: CacheConfig,
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
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// Consecutive playback failures before auto-skip gives up.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    /// Delay before skipping past a track the output device failed on.
    #[serde(default = "default_skip_delay_ms")]
    pub skip_delay_ms: u64,
    /// Delay between attaching a new playlist and resuming playback.
    #[serde(default = "default_resume_delay_ms")]
    pub resume_delay_ms: u64,
    /// Publish now-playing metadata to the OS media controls.
    #[serde(default = "default_media_controls")]
    pub media_controls: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SanitizePolicy {
    /// Drop the first resolved track whenever more than one was resolved.
    #[default]
    DropFirst,
    Keep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_playlist_id")]
    pub default_playlist_id: String,
    /// Number of tracks requested per acquisition.
    #[serde(default = "default_window_size")]
    pub window_size: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// `{id}` is replaced by the track identifier.
    #[serde(default = "default_fallback_url_template")]
    pub fallback_url_template: String,
    #[serde(default = "default_placeholder_cover")]
    pub placeholder_cover: String,
    #[serde(default)]
    pub sanitize: SanitizePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CacheKeyMode {
    /// One key holds the snapshot of whichever playlist was fetched last.
    #[default]
    Single,
    PerPlaylist,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_file")]
    pub file: PathBuf,
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,
    #[serde(default)]
    pub key: CacheKeyMode,
    /// Key name for `single` mode, key prefix for `per-playlist` mode.
    #[serde(default = "default_key_name")]
    pub key_name: String,
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
            error_threshold: default_error_threshold(),
            skip_delay_ms: default_skip_delay_ms(),
            resume_delay_ms: default_resume_delay_ms(),
            media_controls: default_media_controls(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            default_playlist_id: default_playlist_id(),
            window_size: default_window_size(),
            request_timeout_secs: default_request_timeout_secs(),
            fallback_url_template: default_fallback_url_template(),
            placeholder_cover: default_placeholder_cover(),
            sanitize: SanitizePolicy::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file: default_cache_file(),
            freshness_secs: default_freshness_secs(),
            key: CacheKeyMode::default(),
            key_name: default_key_name(),
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
    8989
}

fn default_volume() -> f32 {
    0.5
}

fn default_error_threshold() -> u32 {
    5
}

fn default_skip_delay_ms() -> u64 {
    500
}

fn default_resume_delay_ms() -> u64 {
    500
}

fn default_media_controls() -> bool {
    true
}

fn default_api_base_url() -> String {
    "https://cloudmusic-api-three.vercel.app".to_string()
}

fn default_playlist_id() -> String {
    "6654477071".to_string()
}

fn default_window_size() -> u32 {
    50
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_fallback_url_template() -> String {
    "https://music.163.com/song/media/outer/url?id={id}.mp3".to_string()
}

fn default_placeholder_cover() -> String {
    "https://images.unsplash.com/photo-1614613535308-eb5fbd3d2c17?q=80&w=200".to_string()
}

fn default_cache_file() -> PathBuf {
    platform::cache_dir().join("playlist_cache.json")
}

fn default_freshness_secs() -> u64 {
    3600
}

fn default_key_name() -> String {
    "jukebox_playlist_cache".to_string()
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
        let config: Self = toml::from_str(&content)?;
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
