//! Download engine contract
//!
//! The engine is the black box that extracts, transfers and transcodes media.
//! vidqueue only starts it and observes the callbacks it produces. The
//! production implementation is [`YtDlpEngine`], which drives the `yt-dlp`
//! command-line tool; tests use scripted engines.

use crate::config::Config;
use crate::error::EngineError;
use crate::progress::RawProgress;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod ytdlp;

#[cfg(test)]
// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod testing;

pub use ytdlp::YtDlpEngine;

/// Callback stream returned by [`Engine::invoke`]
///
/// The stream ends after a terminal callback ([`EngineCallback::Completed`] or
/// [`EngineCallback::Error`]), or early if the engine dies without reporting one.
pub type CallbackStream = BoxStream<'static, EngineCallback>;

/// Metadata reported when the engine finishes successfully
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineMetadata {
    /// Media title
    pub title: Option<String>,
    /// Output file as reported by the engine (may be pre-transcode)
    pub filepath: Option<PathBuf>,
}

/// One callback from the engine
#[derive(Clone, Debug, PartialEq)]
pub enum EngineCallback {
    /// Transfer progress
    Progress(RawProgress),
    /// A postprocessing step (merge, audio extraction, ...) started or finished
    Postprocess {
        /// Postprocessor name as reported by the engine
        stage: String,
        /// File the step writes, if known
        destination: Option<PathBuf>,
    },
    /// The download finished
    Completed(EngineMetadata),
    /// The download failed
    Error {
        /// Whether another attempt can succeed
        class: ErrorClass,
        /// Error message as reported by the engine
        message: String,
    },
    /// Free-form engine output
    Log(String),
}

/// Kind of failure an engine reports through [`EngineCallback::Error`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The connection or the transfer broke off
    Transfer,
    /// The engine will not fetch this media at all (unsupported URL, private or removed video, region lock)
    Rejected,
}

/// Format and container settings for one download
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityOptions {
    /// "best", "worst" or a height such as "1080p"
    pub video_quality: String,
    /// "best", "worst" or a bitrate such as "192k"
    pub audio_quality: String,
    /// Merge container for video downloads
    pub format: String,
    /// Codec for audio-only downloads
    pub audio_format: String,
    /// Fetch subtitles, including automatic ones
    pub subtitle: bool,
    /// Fetch the thumbnail
    pub thumbnail: bool,
}

impl QualityOptions {
    /// Take the quality settings from the `download` section
    pub fn from_config(config: &Config) -> Self {
        let d = &config.download;
        Self {
            video_quality: d.video_quality.clone(),
            audio_quality: d.audio_quality.clone(),
            format: d.format.clone(),
            audio_format: d.audio_format.clone(),
            subtitle: d.subtitle,
            thumbnail: d.thumbnail,
        }
    }

    /// Format selector for video downloads
    pub fn video_format_selector(&self) -> String {
        match self.video_quality.as_str() {
            "best" => "bestvideo+bestaudio/best".to_string(),
            "worst" => "worstvideo+worstaudio/worst".to_string(),
            q => {
                let height = q.trim_end_matches('p');
                format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]")
            }
        }
    }

    /// Format selector for audio-only downloads
    pub fn audio_format_selector(&self) -> String {
        match self.audio_quality.as_str() {
            "best" => "bestaudio/best".to_string(),
            "worst" => "worstaudio/worst".to_string(),
            q => format!("bestaudio[abr<={}]/best", q.trim_end_matches('k')),
        }
    }

    /// Bitrate handed to the audio extractor: the configured bitrate, or 192
    pub fn extract_audio_quality(&self) -> String {
        match self.audio_quality.as_str() {
            "best" | "worst" => "192".to_string(),
            q => q.trim_end_matches('k').to_string(),
        }
    }
}

/// Network settings for one download
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkOptions {
    /// Proxy URL
    pub proxy: Option<String>,
    /// Socket timeout
    pub timeout: Option<Duration>,
    /// Cookies file, only set if enabled and present on disk
    pub cookies_file: Option<PathBuf>,
    /// Custom User-Agent header
    pub user_agent: Option<String>,
}

impl NetworkOptions {
    /// Take the network settings from the `network` and `advanced` sections
    pub fn from_config(config: &Config) -> Self {
        let non_empty = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };

        let cookies_file = if config.advanced.use_cookies {
            non_empty(&config.advanced.cookies_file)
                .map(PathBuf::from)
                .filter(|p| p.exists())
        } else {
            None
        };
        if config.advanced.use_cookies && cookies_file.is_none() {
            tracing::warn!(
                cookies_file = %config.advanced.cookies_file,
                "Cookies enabled but the cookies file does not exist, continuing without"
            );
        }

        Self {
            proxy: non_empty(&config.network.proxy),
            timeout: (!config.network.timeout.is_zero()).then_some(config.network.timeout),
            cookies_file,
            user_agent: non_empty(&config.advanced.user_agent),
        }
    }
}

/// Everything an engine needs to run one download
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineRequest {
    /// Source URL
    pub url: String,
    /// Directory the output is written into
    pub destination: PathBuf,
    /// Extract audio instead of downloading video
    pub audio_only: bool,
    /// Format selection
    pub quality: QualityOptions,
    /// Network settings
    pub network: NetworkOptions,
}

/// A download-and-transcode engine
#[async_trait]
pub trait Engine: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    /// Start one download
    ///
    /// Returns once the engine is running; progress and the outcome arrive on
    /// the returned stream. When `cancel` fires the engine should stop as soon
    /// as it can and end the stream; it may still report `Completed` if the
    /// download finished in the meantime.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine could not be started at all.
    async fn invoke(
        &self,
        request: EngineRequest,
        cancel: CancellationToken,
    ) -> Result<CallbackStream, EngineError>;
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn quality(video: &str, audio: &str) -> QualityOptions {
        let mut config = Config::default();
        config.download.video_quality = video.to_string();
        config.download.audio_quality = audio.to_string();
        QualityOptions::from_config(&config)
    }

    #[test]
    fn video_selectors() {
        assert_eq!(
            quality("best", "best").video_format_selector(),
            "bestvideo+bestaudio/best"
        );
        assert_eq!(
            quality("worst", "best").video_format_selector(),
            "worstvideo+worstaudio/worst"
        );
        assert_eq!(
            quality("1080p", "best").video_format_selector(),
            "bestvideo[height<=1080]+bestaudio/best[height<=1080]"
        );
    }

    #[test]
    fn audio_selectors() {
        let best = quality("best", "best");
        assert_eq!(best.audio_format_selector(), "bestaudio/best");
        assert_eq!(best.extract_audio_quality(), "192");

        let worst = quality("best", "worst");
        assert_eq!(worst.audio_format_selector(), "worstaudio/worst");
        assert_eq!(worst.extract_audio_quality(), "192");

        let kbps = quality("best", "128k");
        assert_eq!(kbps.audio_format_selector(), "bestaudio[abr<=128]/best");
        assert_eq!(kbps.extract_audio_quality(), "128");
    }

    #[test]
    fn network_options_skip_empty_values() {
        let config = Config::default();
        let network = NetworkOptions::from_config(&config);
        assert_eq!(network.proxy, None);
        assert_eq!(network.user_agent, None);
        assert_eq!(network.cookies_file, None);
        assert_eq!(network.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn cookies_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let cookies = dir.path().join("cookies.txt");

        let mut config = Config::default();
        config.advanced.use_cookies = true;
        config.advanced.cookies_file = cookies.to_string_lossy().into_owned();
        assert_eq!(NetworkOptions::from_config(&config).cookies_file, None);

        std::fs::write(&cookies, "# Netscape HTTP Cookie File\n").unwrap();
        assert_eq!(
            NetworkOptions::from_config(&config).cookies_file,
            Some(cookies.clone())
        );

        config.advanced.use_cookies = false;
        assert_eq!(NetworkOptions::from_config(&config).cookies_file, None);
    }
}
