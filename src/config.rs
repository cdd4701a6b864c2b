//! Configuration types for vidqueue
//!
//! The config file is JSON. Every field has a default, so a partial file
//! (or one written by an older version) loads with the missing keys filled in.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Download behavior configuration (directory, quality, container formats)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Default download directory (default: "./downloads")
    #[serde(default = "default_download_dir", alias = "default_path")]
    pub download_dir: PathBuf,

    /// Video quality: "best", "worst" or a height such as "1080p" (default: "best")
    #[serde(default = "default_best")]
    pub video_quality: String,

    /// Audio quality: "best", "worst" or a bitrate such as "192k" (default: "best")
    #[serde(default = "default_best")]
    pub audio_quality: String,

    /// Container the video and audio streams are merged into (default: "mp4")
    #[serde(default = "default_format")]
    pub format: String,

    /// Codec audio-only downloads are extracted to (default: "mp3")
    #[serde(default = "default_audio_format")]
    pub audio_format: String,

    /// Download subtitles, including automatic ones
    #[serde(default)]
    pub subtitle: bool,

    /// Download the thumbnail next to the media file (default: true)
    #[serde(default = "default_true")]
    pub thumbnail: bool,

    /// How long a cancelled session may keep draining engine callbacks
    /// before it reports Cancelled (default: 10 seconds)
    #[serde(default = "default_cancel_grace", with = "duration_serde")]
    pub cancel_grace: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            video_quality: default_best(),
            audio_quality: default_best(),
            format: default_format(),
            audio_format: default_audio_format(),
            subtitle: false,
            thumbnail: true,
            cancel_grace: default_cancel_grace(),
        }
    }
}

/// Network settings handed to the engine, plus ledger-level retry policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Proxy URL such as "http://host:port" (empty = no proxy)
    #[serde(default)]
    pub proxy: String,

    /// Socket timeout (default: 30 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// How many times a download that failed in transfer is retried (default: 3)
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,

    /// Maximum number of sessions running at once (default: 1)
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,

    /// Backoff between retries
    #[serde(default)]
    pub retry_backoff: RetryConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: String::new(),
            timeout: default_timeout(),
            retry_times: default_retry_times(),
            concurrent_downloads: default_concurrent_downloads(),
            retry_backoff: RetryConfig::default(),
        }
    }
}

/// Backoff configuration for retrying failed transfers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Initial delay before first retry (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Cookies, user agent and audio extraction
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Pass `cookies_file` to the engine
    #[serde(default)]
    pub use_cookies: bool,

    /// Netscape-format cookies file (ignored unless `use_cookies` is set and the file exists)
    #[serde(default)]
    pub cookies_file: String,

    /// Custom User-Agent header (empty = engine default)
    #[serde(default)]
    pub user_agent: String,

    /// New tasks default to audio-only
    #[serde(default)]
    pub extract_audio: bool,
}

/// External tool paths
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Whether to search PATH for yt-dlp if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            search_path: true,
        }
    }
}

/// Record store location
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./vidqueue.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for vidqueue
///
/// Sections mirror the on-disk JSON layout:
/// - [`download`](DownloadConfig): directory, quality and formats
/// - [`network`](NetworkConfig): proxy, timeouts, retries, concurrency
/// - [`advanced`](AdvancedConfig): cookies, user agent, audio extraction
/// - [`tools`](ToolsConfig): yt-dlp discovery
/// - [`persistence`](PersistenceConfig): record store path
///
/// Unknown sections (such as the GUI's own `ui` block) are ignored.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Advanced engine settings
    #[serde(default)]
    pub advanced: AdvancedConfig,

    /// External tools
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Read and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Write the config as pretty-printed JSON, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Load the config, writing the defaults first if the file does not exist
    ///
    /// A file that exists but cannot be parsed falls back to the defaults
    /// (with a warning) and is left untouched on disk.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "Created default configuration");
            return Ok(config);
        }

        match Config::load(path) {
            Ok(config) => Ok(config),
            Err(e @ (Error::Serialization(_) | Error::Config { .. })) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Invalid configuration file, using defaults"
                );
                Ok(Config::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Check values the engine and the ledger cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.network.concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "concurrent_downloads must be at least 1".to_string(),
                key: Some("network.concurrent_downloads".to_string()),
            });
        }
        if !is_valid_quality(&self.download.video_quality, 'p') {
            return Err(Error::Config {
                message: format!(
                    "invalid video quality '{}' (expected best, worst or e.g. 1080p)",
                    self.download.video_quality
                ),
                key: Some("download.video_quality".to_string()),
            });
        }
        if !is_valid_quality(&self.download.audio_quality, 'k') {
            return Err(Error::Config {
                message: format!(
                    "invalid audio quality '{}' (expected best, worst or e.g. 192k)",
                    self.download.audio_quality
                ),
                key: Some("download.audio_quality".to_string()),
            });
        }
        if self.network.retry_backoff.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "backoff_multiplier must be at least 1.0".to_string(),
                key: Some("network.retry_backoff.backoff_multiplier".to_string()),
            });
        }
        Ok(())
    }
}

fn is_valid_quality(value: &str, suffix: char) -> bool {
    match value {
        "best" | "worst" => true,
        other => other
            .strip_suffix(suffix)
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())),
    }
}

// Default value functions
fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("vidqueue.db")
}

fn default_best() -> String {
    "best".to_string()
}

fn default_format() -> String {
    "mp4".to_string()
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cancel_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_times() -> u32 {
    3
}

fn default_concurrent_downloads() -> usize {
    1
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
