//! Core types for vidqueue

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Identifier of a task in the [`TaskLedger`](crate::TaskLedger)
///
/// Ids are handed out in increasing order, so sorting by id yields insertion order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a persisted [`DownloadRecord`](crate::db::DownloadRecord)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<RecordId> for i64 {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for RecordId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for RecordId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for RecordId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Streaming platform a URL belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// bilibili.com / b23.tv
    Bilibili,
    /// youtube.com / youtu.be
    YouTube,
    /// music.youtube.com
    YouTubeMusic,
}

impl Platform {
    /// Label stored in the record store
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Bilibili => "bilibili",
            Platform::YouTube => "youtube",
            Platform::YouTubeMusic => "youtube_music",
        }
    }

    /// Parse a stored label (case-insensitive). Unknown labels yield `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "bilibili" => Some(Platform::Bilibili),
            "youtube" => Some(Platform::YouTube),
            "youtube_music" | "youtube music" | "youtubemusic" => Some(Platform::YouTubeMusic),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a [`DownloadTask`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting to be started, or waiting for a concurrency slot
    Queued,
    /// The engine invocation is running
    Running,
    /// Finished with a verified output path
    Completed,
    /// Finished with an error (see [`DownloadTask::failure`])
    Failed,
    /// Stopped at the user's request
    Cancelled,
}

impl TaskState {
    /// Completed, Failed and Cancelled allow no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Engine stage a progress value belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Raw transfer
    Downloading,
    /// Transcoding / muxing after the transfer
    Postprocessing,
}

/// Canonical progress value delivered to the UI. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Integer percentage in 0..=100
    pub percent: u8,
    /// Bytes transferred so far, if the engine reported them
    pub downloaded_bytes: Option<u64>,
    /// Total bytes (exact or estimated), if known
    pub total_bytes: Option<u64>,
    /// Stage this value belongs to
    pub stage: Stage,
    /// Transfer speed in bytes per second, if reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_bps: Option<f64>,
    /// Estimated time remaining, if reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<Duration>,
}

/// Why a task ended up Failed (or, for `CancelledByUser`, Cancelled)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The engine could not start or refused the media (bad URL, unavailable video, missing binary)
    EngineInvocation,
    /// The transfer was interrupted
    NetworkTransfer,
    /// The engine reported success but no output path could be verified
    OutputPathUnknown,
    /// Stopped at the user's request
    CancelledByUser,
    /// The session itself crashed while handling engine callbacks
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::EngineInvocation => "engine invocation error",
            FailureKind::NetworkTransfer => "network transfer error",
            FailureKind::OutputPathUnknown => "output path unknown",
            FailureKind::CancelledByUser => "cancelled by user",
            FailureKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of one session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Finished with a verified file on disk
    Completed {
        /// Final output file
        path: PathBuf,
    },
    /// Finished with an error
    Failed {
        /// Error category
        kind: FailureKind,
        /// Human-readable message
        message: String,
    },
    /// Stopped at the user's request
    Cancelled,
}

impl Outcome {
    /// Task state this outcome moves a task into
    pub fn state(&self) -> TaskState {
        match self {
            Outcome::Completed { .. } => TaskState::Completed,
            Outcome::Failed { .. } => TaskState::Failed,
            Outcome::Cancelled => TaskState::Cancelled,
        }
    }

    /// Failure category, `CancelledByUser` for cancellations, `None` on success
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Completed { .. } => None,
            Outcome::Failed { kind, .. } => Some(*kind),
            Outcome::Cancelled => Some(FailureKind::CancelledByUser),
        }
    }

    /// Output file, only set for `Completed`
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Outcome::Completed { path } => Some(path),
            _ => None,
        }
    }

    /// Message shown to the user
    pub fn message(&self) -> String {
        match self {
            Outcome::Completed { path } => format!("download complete: {}", path.display()),
            Outcome::Failed { message, .. } => message.clone(),
            Outcome::Cancelled => "download cancelled".to_string(),
        }
    }
}

/// Options for [`TaskLedger::add`](crate::TaskLedger::add)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AddOptions {
    /// Target directory (default: `download.download_dir` from config)
    #[serde(default)]
    pub target_dir: Option<PathBuf>,

    /// Download audio only (default: `advanced.extract_audio` from config)
    #[serde(default)]
    pub audio_only: Option<bool>,
}

/// One user-requested download
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Ledger identifier
    pub id: TaskId,
    /// Source URL
    pub url: String,
    /// Directory the engine writes into
    pub target_dir: PathBuf,
    /// Extract audio instead of downloading video
    pub audio_only: bool,
    /// Platform detected from the URL
    pub platform: Platform,
    /// Lifecycle state
    pub state: TaskState,
    /// Last known percentage (0..=100)
    pub percent: u8,
    /// Final output file; set iff `state == Completed`
    pub file_path: Option<PathBuf>,
    /// Title reported by the engine
    pub title: Option<String>,
    /// Failure category of the last terminal outcome
    pub failure: Option<FailureKind>,
    /// Message of the last terminal outcome
    pub message: Option<String>,
    /// Number of sessions started for this task
    pub attempt: u32,
    /// Persisted record backing this task, once one exists
    pub record_id: Option<RecordId>,
}

impl DownloadTask {
    /// Create a fresh Queued task
    pub fn new(
        id: TaskId,
        url: impl Into<String>,
        target_dir: PathBuf,
        audio_only: bool,
        platform: Platform,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            target_dir,
            audio_only,
            platform,
            state: TaskState::Queued,
            percent: 0,
            file_path: None,
            title: None,
            failure: None,
            message: None,
            attempt: 0,
            record_id: None,
        }
    }

    /// Move the task into the state described by `outcome`
    pub(crate) fn apply_outcome(&mut self, outcome: &Outcome) {
        self.state = outcome.state();
        self.failure = outcome.failure_kind();
        self.message = Some(outcome.message());
        self.file_path = outcome.path().cloned();
        if matches!(outcome, Outcome::Completed { .. }) {
            self.percent = 100;
        }
    }

    /// Reset a terminal task so a fresh session can drive it again
    pub(crate) fn requeue(&mut self) {
        self.state = TaskState::Queued;
        self.percent = 0;
        self.file_path = None;
        self.failure = None;
        self.message = None;
    }
}

/// Event broadcast to subscribers (the UI layer)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task added to the ledger
    Queued {
        /// Task ID
        id: TaskId,
        /// Source URL
        url: String,
        /// Detected platform
        platform: Platform,
    },

    /// Engine invocation started (task is Running)
    Started {
        /// Task ID
        id: TaskId,
        /// Attempt number, starting at 1
        attempt: u32,
    },

    /// Log line for the task's log view
    Log {
        /// Task ID
        id: TaskId,
        /// Log text (ANSI codes stripped)
        line: String,
    },

    /// Progress update
    Progress {
        /// Task ID
        id: TaskId,
        /// Normalized progress
        progress: ProgressEvent,
    },

    /// A transfer failed and a fresh session will be started after `delay`
    Retrying {
        /// Task ID
        id: TaskId,
        /// Attempt number of the upcoming session
        attempt: u32,
        /// Backoff before the retry
        delay: Duration,
        /// Error that triggered the retry
        error: String,
    },

    /// Terminal notification, exactly one per finished task
    Finished {
        /// Task ID
        id: TaskId,
        /// True only for Completed
        success: bool,
        /// Failure category (`None` on success)
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<FailureKind>,
        /// Human-readable message
        message: String,
        /// Final output path (only on success)
        #[serde(skip_serializing_if = "Option::is_none")]
        file_path: Option<PathBuf>,
    },

    /// Task removed from the ledger
    Removed {
        /// Task ID
        id: TaskId,
    },

    /// Ledger shut down
    Shutdown,
}

impl Event {
    /// Task this event refers to, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Event::Queued { id, .. }
            | Event::Started { id, .. }
            | Event::Log { id, .. }
            | Event::Progress { id, .. }
            | Event::Retrying { id, .. }
            | Event::Finished { id, .. }
            | Event::Removed { id } => Some(*id),
            Event::Shutdown => None,
        }
    }
}
