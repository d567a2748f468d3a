use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Where the acquisition backend lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// Bitrate preselected in the quality dialog.
    #[serde(default = "default_quality")]
    pub default_quality: String,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
}

/// Remote catalog used to resolve album/playlist contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_url")]
    pub base_url: String,
    /// Bearer token handed over by the host; never obtained by us.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_album_page_size")]
    pub album_page_size: u32,
    #[serde(default = "default_playlist_page_size")]
    pub playlist_page_size: u32,
    /// Resolution stops once this many items are collected.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Overlay repaint cadence; faster than polling so spinners stay live.
    #[serde(default = "default_render_tick_ms")]
    pub render_tick_ms: u64,
    #[serde(default = "default_completed_grace_ms")]
    pub completed_grace_ms: u64,
    #[serde(default = "default_failed_grace_ms")]
    pub failed_grace_ms: u64,
    #[serde(default = "default_capture_offer_delay_ms")]
    pub capture_offer_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_slice_ms")]
    pub slice_ms: u64,
    /// Recordings smaller than this are treated as noise and dropped.
    #[serde(default = "default_min_upload_bytes")]
    pub min_upload_bytes: usize,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    /// How long a stopped recorder may still deliver its last slice.
    #[serde(default = "default_tail_drain_ms")]
    pub tail_drain_ms: u64,
}

/// Local bridge API the in-player adapter talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            default_quality: default_quality(),
            health_interval_secs: default_health_interval_secs(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalog_url(),
            access_token: None,
            album_page_size: default_album_page_size(),
            playlist_page_size: default_playlist_page_size(),
            max_items: default_max_items(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            render_tick_ms: default_render_tick_ms(),
            completed_grace_ms: default_completed_grace_ms(),
            failed_grace_ms: default_failed_grace_ms(),
            capture_offer_delay_ms: default_capture_offer_delay_ms(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            slice_ms: default_slice_ms(),
            min_upload_bytes: default_min_upload_bytes(),
            mime_type: default_mime_type(),
            tail_drain_ms: default_tail_drain_ms(),
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

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn render_tick(&self) -> Duration {
        Duration::from_millis(self.render_tick_ms)
    }

    pub fn completed_grace(&self) -> Duration {
        Duration::from_millis(self.completed_grace_ms)
    }

    pub fn failed_grace(&self) -> Duration {
        Duration::from_millis(self.failed_grace_ms)
    }

    pub fn capture_offer_delay(&self) -> Duration {
        Duration::from_millis(self.capture_offer_delay_ms)
    }
}

impl CaptureConfig {
    pub fn slice(&self) -> Duration {
        Duration::from_millis(self.slice_ms.max(1))
    }

    pub fn tail_drain(&self) -> Duration {
        Duration::from_millis(self.tail_drain_ms)
    }
}

fn default_backend_url() -> String {
    "http://localhost:8765".to_string()
}

fn default_quality() -> String {
    "320".to_string()
}

fn default_health_interval_secs() -> u64 {
    5
}

fn default_catalog_url() -> String {
    "https://api.spotify.com".to_string()
}

fn default_album_page_size() -> u32 {
    50
}

fn default_playlist_page_size() -> u32 {
    100
}

fn default_max_items() -> usize {
    500
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_render_tick_ms() -> u64 {
    250
}

fn default_completed_grace_ms() -> u64 {
    8000
}

fn default_failed_grace_ms() -> u64 {
    10_000
}

fn default_capture_offer_delay_ms() -> u64 {
    1500
}

fn default_slice_ms() -> u64 {
    1000
}

fn default_min_upload_bytes() -> usize {
    16 * 1024
}

fn default_mime_type() -> String {
    "audio/webm".to_string()
}

fn default_tail_drain_ms() -> u64 {
    2000
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8766
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8766);
        assert_eq!(config.backend.url, "http://localhost:8765");
        assert_eq!(config.catalog.max_items, 500);
        assert!(config.timing.render_tick_ms < config.timing.poll_interval_ms);
        assert!(config.timing.capture_offer_delay_ms < config.timing.completed_grace_ms);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [backend]
            url = "http://127.0.0.1:9000"

            [catalog]
            max_items = 200
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.url, "http://127.0.0.1:9000");
        assert_eq!(config.backend.default_quality, "320");
        assert_eq!(config.catalog.max_items, 200);
        assert_eq!(config.catalog.album_page_size, 50);
        assert_eq!(config.capture.mime_type, "audio/webm");
        assert!(config.capture.tail_drain() > config.capture.slice());
    }
}
