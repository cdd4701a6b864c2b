//! Platform detection for submitted URLs
//!
//! Only links that point at a single video are accepted: YouTube watch pages
//! and `youtu.be` short links, YouTube Music watch pages, Bilibili `BV`/`av`
//! video pages and `b23.tv` short links.

use crate::error::{Error, Result};
use crate::types::Platform;
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

fn video_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERN.get_or_init(|| Regex::new(r"^[\w-]+$").expect("static regex is valid"))
}

fn bilibili_path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERN.get_or_init(|| {
        Regex::new(r"^/video/(BV\w+|av\d+)/?").expect("static regex is valid")
    })
}

/// Detect the platform of `url`, or `None` if it is not a supported video link
pub fn detect(url: &str) -> Option<Platform> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    match host {
        "youtube.com" | "m.youtube.com" => has_watch_id(&parsed).then_some(Platform::YouTube),
        "music.youtube.com" => has_watch_id(&parsed).then_some(Platform::YouTubeMusic),
        "youtu.be" => first_segment(&parsed)
            .filter(|id| video_id_pattern().is_match(id))
            .map(|_| Platform::YouTube),
        "bilibili.com" | "m.bilibili.com" => bilibili_path_pattern()
            .is_match(parsed.path())
            .then_some(Platform::Bilibili),
        "b23.tv" => first_segment(&parsed)
            .filter(|id| id.chars().all(|c| c.is_alphanumeric() || c == '_'))
            .map(|_| Platform::Bilibili),
        _ => None,
    }
}

/// Like [`detect`], but returns [`Error::UnsupportedUrl`] for unsupported links
pub fn require(url: &str) -> Result<Platform> {
    detect(url).ok_or_else(|| Error::UnsupportedUrl(url.trim().to_string()))
}

fn has_watch_id(url: &Url) -> bool {
    url.path() == "/watch"
        && url
            .query_pairs()
            .any(|(k, v)| k == "v" && video_id_pattern().is_match(&v))
}

fn first_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
