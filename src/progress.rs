//! Progress normalization
//!
//! Engines report progress in whatever shape is at hand: byte counts with an
//! exact or estimated total, a 0–1 fraction, or a 0–100 percentage. The
//! functions here turn any of those into one integer percentage in 0..=100.

use crate::types::{ProgressEvent, Stage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// Absorbs binary rounding error when scaling a fraction to a percentage
const FRACTION_EPSILON: f64 = 1e-9;

/// Progress payload as reported by an engine, before normalization
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawProgress {
    /// Bytes transferred so far
    pub downloaded_bytes: Option<u64>,
    /// Exact total size
    pub total_bytes: Option<u64>,
    /// Estimated total size, used when the exact total is unknown
    pub total_bytes_estimate: Option<u64>,
    /// Progress as a fraction (0–1) or a percentage (0–100)
    pub fraction: Option<f64>,
    /// File the engine is currently writing
    pub filename: Option<String>,
    /// Transfer speed in bytes per second
    pub speed: Option<f64>,
    /// Estimated seconds remaining
    pub eta: Option<f64>,
}

impl RawProgress {
    /// Total size, exact if known, otherwise the estimate
    pub fn total(&self) -> Option<u64> {
        self.total_bytes.or(self.total_bytes_estimate)
    }
}

/// Integer percentage of `downloaded` out of `total`
///
/// Returns `None` when `total` is zero. Values beyond the total clamp to 100.
pub fn percentage(downloaded: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let pct = (u128::from(downloaded) * 100) / u128::from(total);
    Some(pct.min(100) as u8)
}

/// Integer percentage from a value that is either a 0–1 fraction or a 0–100 percentage
///
/// Values up to and including 1.0 are fractions (`0.5` → 50, `1.0` → 100);
/// larger values are percentages (`37.9` → 37). NaN and negative values yield 0.
pub fn percentage_from_fraction(value: f64) -> u8 {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    // 0.29 * 100.0 is 28.999999999999996
    let pct = if value <= 1.0 {
        value * 100.0 + FRACTION_EPSILON
    } else {
        value
    };
    pct.floor().min(100.0) as u8
}

/// Normalize an engine progress payload
///
/// Byte counts take precedence (exact total, then estimate), then the
/// fraction. Returns `None` if neither is usable.
pub fn normalize(raw: &RawProgress) -> Option<u8> {
    if let (Some(downloaded), Some(total)) = (raw.downloaded_bytes, raw.total())
        && let Some(pct) = percentage(downloaded, total)
    {
        return Some(pct);
    }
    raw.fraction.map(percentage_from_fraction)
}

fn ansi_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERN.get_or_init(|| {
        Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("static regex is valid")
    })
}

/// Strip ANSI color codes and control sequences from engine output
pub fn clean_ansi_codes(text: &str) -> String {
    ansi_pattern().replace_all(text, "").into_owned()
}

/// Human-readable size: `0B`, `512.0B`, `1.5KB`, `3.2GB`
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0B".to_string();
    }
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1}{}", size, UNITS[unit])
}

fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

impl ProgressEvent {
    /// Progress event for the downloading stage, carrying speed and ETA from `raw`
    pub fn downloading(percent: u8, raw: &RawProgress) -> Self {
        Self {
            percent,
            downloaded_bytes: raw.downloaded_bytes,
            total_bytes: raw.total(),
            stage: Stage::Downloading,
            speed_bps: raw.speed.filter(|s| s.is_finite() && *s >= 0.0),
            eta: raw
                .eta
                .filter(|e| e.is_finite() && *e >= 0.0)
                .map(Duration::from_secs_f64),
        }
    }

    /// Progress event for the postprocessing stage
    pub fn postprocessing(percent: u8) -> Self {
        Self {
            percent,
            downloaded_bytes: None,
            total_bytes: None,
            stage: Stage::Postprocessing,
            speed_bps: None,
            eta: None,
        }
    }

    /// Log line for this event, e.g. `[downloading] 37% | speed: 1.2MB/s | eta: 00:12`
    pub fn log_line(&self) -> String {
        match self.stage {
            Stage::Downloading => {
                let speed = self
                    .speed_bps
                    .map(|s| format!("{}/s", format_file_size(s as u64)))
                    .unwrap_or_else(|| "--".to_string());
                let eta = self.eta.map(format_eta).unwrap_or_else(|| "--".to_string());
                format!(
                    "[downloading] {}% | speed: {} | eta: {}",
                    self.percent, speed, eta
                )
            }
            Stage::Postprocessing => format!("[postprocessing] {}%", self.percent),
        }
    }
}
