//! `yt-dlp` command-line engine
//!
//! yt-dlp is started with machine-readable progress templates so that every
//! progress and postprocessing hook becomes one tab-separated line tagged with
//! a marker. Lines without a marker are passed through as log output; a few
//! well-known human-readable lines (`[download] Destination:`, `[Merger]`,
//! `[ExtractAudio]`) are recognized as path hints as well.

use super::{CallbackStream, Engine, EngineCallback, EngineMetadata, EngineRequest, ErrorClass};
use crate::config::ToolsConfig;
use crate::error::EngineError;
use crate::progress::{RawProgress, clean_ansi_codes};
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

const PROGRESS_MARKER: &str = "__VQ_DL__";
const POSTPROCESS_MARKER: &str = "__VQ_PP__";
const DONE_MARKER: &str = "__VQ_DONE__";

/// Placeholder yt-dlp prints for missing template fields
const NOT_AVAILABLE: &str = "NA";

const PROGRESS_TEMPLATE: &str = "download:__VQ_DL__ %(progress.status)s\t%(progress.downloaded_bytes)s\t%(progress.total_bytes)s\t%(progress.total_bytes_estimate)s\t%(progress.speed)s\t%(progress.eta)s\t%(progress.filename)s";
const POSTPROCESS_TEMPLATE: &str =
    "postprocess:__VQ_PP__ %(progress.status)s\t%(progress.postprocessor)s\t%(info.filepath)s";
const DONE_TEMPLATE: &str = "after_move:__VQ_DONE__ %(title)s\t%(filepath)s";

/// Channel capacity between the reader task and the session
const CALLBACK_BUFFER: usize = 256;

fn destination_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[download\]\s+Destination:\s+(.+)$").expect("static regex is valid")
    })
}

fn merger_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERN.get_or_init(|| {
        Regex::new(r#"^\[Merger\]\s+Merging formats into "(.+)"$"#).expect("static regex is valid")
    })
}

fn extract_audio_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[ExtractAudio\]\s+Destination:\s+(.+)$").expect("static regex is valid")
    })
}

fn rejection_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)unsupported url|is not a valid url|incomplete youtube id|video unavailable|private video|this video is private|available in your country|geo.?restrict|has been removed|account associated with this video has been terminated|sign in to confirm your age|members.only|requested format is not available|http error 404",
        )
        .expect("static regex is valid")
    })
}

/// Classify a yt-dlp error message
///
/// Extractor and availability errors are [`ErrorClass::Rejected`]: retrying
/// them gets the same answer. Everything else is treated as a transfer problem.
pub fn classify_error(message: &str) -> ErrorClass {
    if rejection_pattern().is_match(message) {
        ErrorClass::Rejected
    } else {
        ErrorClass::Transfer
    }
}

/// Engine backed by the external `yt-dlp` binary
///
/// # Examples
///
/// ```no_run
/// use vidqueue::engine::YtDlpEngine;
///
/// let engine = YtDlpEngine::from_path().expect("yt-dlp not found in PATH");
/// ```
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    binary_path: PathBuf,
}

impl YtDlpEngine {
    /// Create an engine with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find yt-dlp in PATH
    pub fn from_path() -> Option<Self> {
        which::which("yt-dlp").ok().map(Self::new)
    }

    /// Resolve the binary from the `tools` config section
    ///
    /// An explicit path wins; otherwise PATH is searched if `search_path` is set.
    pub fn from_config(tools: &ToolsConfig) -> Result<Self, EngineError> {
        if let Some(path) = &tools.ytdlp_path {
            return Ok(Self::new(path.clone()));
        }
        if tools.search_path
            && let Some(engine) = Self::from_path()
        {
            return Ok(engine);
        }
        Err(EngineError::Unavailable(
            "yt-dlp not found (set tools.ytdlp_path or install it in PATH)".to_string(),
        ))
    }

    /// Path of the binary this engine runs
    pub fn binary_path(&self) -> &PathBuf {
        &self.binary_path
    }

    /// Command-line arguments for one request
    pub fn build_args(request: &EngineRequest) -> Vec<String> {
        let output = request.destination.join("%(title)s.%(ext)s");
        let mut args: Vec<String> = vec![
            "--newline".into(),
            "--progress".into(),
            "--no-simulate".into(),
            "--no-playlist".into(),
            "--output".into(),
            output.to_string_lossy().into_owned(),
            "--progress-template".into(),
            PROGRESS_TEMPLATE.into(),
            "--progress-template".into(),
            POSTPROCESS_TEMPLATE.into(),
            "--print".into(),
            DONE_TEMPLATE.into(),
        ];

        let quality = &request.quality;
        if request.audio_only {
            args.extend([
                "--format".into(),
                quality.audio_format_selector(),
                "--extract-audio".into(),
                "--audio-format".into(),
                quality.audio_format.clone(),
                "--audio-quality".into(),
                format!("{}K", quality.extract_audio_quality()),
            ]);
        } else {
            args.extend([
                "--format".into(),
                quality.video_format_selector(),
                "--merge-output-format".into(),
                quality.format.clone(),
            ]);
        }
        if quality.subtitle {
            args.extend(["--write-subs".into(), "--write-auto-subs".into()]);
        }
        if quality.thumbnail {
            args.push("--write-thumbnail".into());
        }

        let network = &request.network;
        if let Some(proxy) = &network.proxy {
            args.extend(["--proxy".into(), proxy.clone()]);
        }
        if let Some(timeout) = network.timeout {
            args.extend(["--socket-timeout".into(), timeout.as_secs().to_string()]);
        }
        if let Some(cookies) = &network.cookies_file {
            args.extend(["--cookies".into(), cookies.to_string_lossy().into_owned()]);
        }
        if let Some(user_agent) = &network.user_agent {
            args.extend(["--user-agent".into(), user_agent.clone()]);
        }

        args.push("--".into());
        args.push(request.url.clone());
        args
    }
}

#[async_trait]
impl Engine for YtDlpEngine {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn invoke(
        &self,
        request: EngineRequest,
        cancel: CancellationToken,
    ) -> Result<CallbackStream, EngineError> {
        let args = Self::build_args(&request);
        tracing::debug!(
            binary = %self.binary_path.display(),
            url = %request.url,
            ?args,
            "Spawning yt-dlp"
        );

        let mut child = Command::new(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => EngineError::Unavailable(format!(
                    "{} not found",
                    self.binary_path.display()
                )),
                _ => EngineError::Spawn(e),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Unavailable("yt-dlp stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Unavailable("yt-dlp stderr unavailable".to_string()))?;

        let (tx, rx) = mpsc::channel(CALLBACK_BUFFER);

        tokio::spawn(async move {
            let mut out_reader = BufReader::new(stdout).lines();
            let mut err_reader = BufReader::new(stderr).lines();
            let mut stdout_done = false;
            let mut stderr_done = false;
            let mut cancelled = false;
            let mut completed = false;
            let mut last_error: Option<String> = None;

            while !(stdout_done && stderr_done) {
                let line = tokio::select! {
                    _ = cancel.cancelled(), if !cancelled => {
                        cancelled = true;
                        tracing::info!("Cancellation requested, stopping yt-dlp");
                        if let Err(e) = child.start_kill() {
                            tracing::warn!(error = %e, "Failed to kill yt-dlp process");
                        }
                        continue;
                    }
                    res = out_reader.next_line(), if !stdout_done => match res {
                        Ok(Some(line)) => line,
                        Ok(None) => { stdout_done = true; continue; }
                        Err(e) => {
                            tracing::warn!(error = %e, "Error reading yt-dlp stdout");
                            stdout_done = true;
                            continue;
                        }
                    },
                    res = err_reader.next_line(), if !stderr_done => match res {
                        Ok(Some(line)) => line,
                        Ok(None) => { stderr_done = true; continue; }
                        Err(e) => {
                            tracing::warn!(error = %e, "Error reading yt-dlp stderr");
                            stderr_done = true;
                            continue;
                        }
                    },
                };

                let Some(callback) = parse_line(&line) else {
                    continue;
                };
                match &callback {
                    EngineCallback::Completed(_) => completed = true,
                    EngineCallback::Log(text) if text.starts_with("ERROR:") => {
                        last_error = Some(text.trim_start_matches("ERROR:").trim().to_string());
                    }
                    _ => {}
                }
                if tx.send(callback).await.is_err() {
                    // Receiver gone: nobody is listening, stop the download
                    let _ = child.start_kill();
                    return;
                }
            }

            let status = child.wait().await;
            if completed || cancelled {
                return;
            }
            let terminal = match status {
                Ok(status) if status.success() => {
                    EngineCallback::Completed(EngineMetadata::default())
                }
                Ok(status) => {
                    let message =
                        last_error.unwrap_or_else(|| format!("yt-dlp exited with {}", status));
                    EngineCallback::Error {
                        class: classify_error(&message),
                        message,
                    }
                }
                Err(e) => EngineCallback::Error {
                    class: ErrorClass::Transfer,
                    message: format!("failed to wait for yt-dlp: {}", e),
                },
            };
            let _ = tx.send(terminal).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

fn field(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty() && value != NOT_AVAILABLE).then_some(value)
}

fn number(value: &str) -> Option<f64> {
    field(value)?.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn bytes(value: &str) -> Option<u64> {
    number(value).filter(|n| *n >= 0.0).map(|n| n as u64)
}

/// Parse one line of yt-dlp output into a callback
///
/// Returns `None` for blank lines.
pub fn parse_line(line: &str) -> Option<EngineCallback> {
    let line = clean_ansi_codes(line);
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    if let Some(rest) = line.strip_prefix(PROGRESS_MARKER) {
        let parts: Vec<&str> = rest.trim_start().splitn(7, '\t').collect();
        if parts.len() == 7 {
            return Some(EngineCallback::Progress(RawProgress {
                downloaded_bytes: bytes(parts[1]),
                total_bytes: bytes(parts[2]),
                total_bytes_estimate: bytes(parts[3]),
                fraction: None,
                speed: number(parts[4]),
                eta: number(parts[5]),
                filename: field(parts[6]).map(str::to_string),
            }));
        }
    }

    if let Some(rest) = line.strip_prefix(POSTPROCESS_MARKER) {
        let parts: Vec<&str> = rest.trim_start().splitn(3, '\t').collect();
        if parts.len() == 3 {
            let finished = parts[0].trim() == "finished";
            return Some(EngineCallback::Postprocess {
                stage: field(parts[1]).unwrap_or("postprocess").to_string(),
                destination: finished
                    .then(|| field(parts[2]).map(PathBuf::from))
                    .flatten(),
            });
        }
    }

    if let Some(rest) = line.strip_prefix(DONE_MARKER) {
        let (title, path) = rest.trim_start().split_once('\t').unwrap_or((rest, ""));
        return Some(EngineCallback::Completed(EngineMetadata {
            title: field(title).map(str::to_string),
            filepath: field(path).map(PathBuf::from),
        }));
    }

    if let Some(caps) = merger_pattern().captures(line) {
        return Some(EngineCallback::Postprocess {
            stage: "Merger".to_string(),
            destination: Some(PathBuf::from(&caps[1])),
        });
    }
    if let Some(caps) = extract_audio_pattern().captures(line) {
        return Some(EngineCallback::Postprocess {
            stage: "ExtractAudio".to_string(),
            destination: Some(PathBuf::from(caps[1].trim())),
        });
    }
    if let Some(caps) = destination_pattern().captures(line) {
        return Some(EngineCallback::Progress(RawProgress {
            filename: Some(caps[1].trim().to_string()),
            ..Default::default()
        }));
    }

    Some(EngineCallback::Log(line.to_string()))
}
