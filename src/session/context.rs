//! Session context: options, the event sink trait, the cancel gate and the handle.

use crate::config::Config;
use crate::engine::{Engine, EngineRequest, NetworkOptions, QualityOptions};
use crate::types::{Outcome, ProgressEvent, TaskId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

/// Immutable per-session options, shared as `Arc<SessionOptions>`
#[derive(Clone, Debug, PartialEq)]
pub struct SessionOptions {
    /// Directory the engine writes into
    pub destination: PathBuf,
    /// Extract audio instead of downloading video
    pub audio_only: bool,
    /// Format selection
    pub quality: QualityOptions,
    /// Network settings
    pub network: NetworkOptions,
    /// How long a cancelled session keeps draining callbacks
    pub cancel_grace: Duration,
}

impl SessionOptions {
    /// Options for a download into `destination`, everything else from `config`
    pub fn from_config(config: &Config, destination: PathBuf, audio_only: bool) -> Self {
        Self {
            destination,
            audio_only,
            quality: QualityOptions::from_config(config),
            network: NetworkOptions::from_config(config),
            cancel_grace: config.download.cancel_grace,
        }
    }

    pub(super) fn request(&self, url: &str) -> EngineRequest {
        EngineRequest {
            url: url.to_string(),
            destination: self.destination.clone(),
            audio_only: self.audio_only,
            quality: self.quality.clone(),
            network: self.network.clone(),
        }
    }
}

/// Notification from a session to its owner
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The engine is running
    Started,
    /// Log line for the task's log view
    Log(String),
    /// Progress update (percentages never decrease within a session)
    Progress(ProgressEvent),
    /// Terminal outcome, delivered exactly once
    Finished {
        /// What happened
        outcome: Outcome,
        /// Title reported by the engine
        title: Option<String>,
    },
}

/// Receiver of session events (the [`TaskLedger`](crate::TaskLedger) in production)
#[async_trait::async_trait]
pub trait SessionEventSink: Send + Sync {
    /// Apply one event for task `id`
    async fn on_event(&self, id: TaskId, event: SessionEvent);
}

/// Emission gate shared between a session and its handle
///
/// Every Log/Progress emission happens while holding the gate, so once
/// [`SessionHandle::cancel`] has taken it and set `cancelled`, no further
/// non-terminal event can reach the sink.
#[derive(Debug, Default)]
pub(super) struct Gate {
    pub(super) cancelled: bool,
    pub(super) finished: bool,
}

/// Shared state of one running session
#[derive(Clone)]
pub(super) struct SessionContext {
    pub(super) id: TaskId,
    pub(super) url: String,
    pub(super) options: Arc<SessionOptions>,
    pub(super) engine: Arc<dyn Engine>,
    pub(super) sink: Arc<dyn SessionEventSink>,
    pub(super) limiter: Arc<Semaphore>,
    pub(super) gate: Arc<Mutex<Gate>>,
    pub(super) cancel: CancellationToken,
}

impl SessionContext {
    /// Deliver non-terminal events unless the session was cancelled or has finished.
    ///
    /// Returns false if the events were dropped.
    pub(super) async fn emit(&self, events: impl IntoIterator<Item = SessionEvent>) -> bool {
        let gate = self.gate.lock().await;
        if gate.cancelled || gate.finished {
            return false;
        }
        for event in events {
            self.sink.on_event(self.id, event).await;
        }
        true
    }

    /// Deliver the terminal event. Only the first call has any effect.
    pub(super) async fn finish(&self, outcome: Outcome, title: Option<String>) -> bool {
        let mut gate = self.gate.lock().await;
        if gate.finished {
            return false;
        }
        gate.finished = true;

        match &outcome {
            Outcome::Completed { path } => {
                tracing::info!(task_id = self.id.0, path = %path.display(), "Download completed")
            }
            Outcome::Failed { kind, message } => {
                tracing::warn!(task_id = self.id.0, kind = %kind, error = %message, "Download failed")
            }
            Outcome::Cancelled => tracing::info!(task_id = self.id.0, "Download cancelled"),
        }

        self.sink
            .on_event(self.id, SessionEvent::Finished { outcome, title })
            .await;
        true
    }

    pub(super) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Handle to a running session
///
/// Cloning is cheap; all clones control the same session.
#[derive(Clone)]
pub struct SessionHandle {
    pub(super) id: TaskId,
    pub(super) gate: Arc<Mutex<Gate>>,
    pub(super) cancel: CancellationToken,
    pub(super) done: CancellationToken,
}

impl SessionHandle {
    /// Task this session drives
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Request cooperative cancellation
    ///
    /// After this returns no further Log/Progress event is delivered for the
    /// task. Exactly one terminal event follows: Cancelled, or Completed if
    /// the engine finishes while the session drains. Returns `false` (and does
    /// nothing) if the session already finished or was already cancelled.
    pub async fn cancel(&self) -> bool {
        let mut gate = self.gate.lock().await;
        if gate.finished || gate.cancelled {
            return false;
        }
        gate.cancelled = true;
        self.cancel.cancel();
        tracing::info!(task_id = self.id.0, "Cancellation requested");
        true
    }

    /// True once the session task has exited and its terminal event was delivered
    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Wait until the session task has exited
    pub async fn wait(&self) {
        self.done.cancelled().await;
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}
