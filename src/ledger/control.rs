//! Download control: start, cancel, retry.

use crate::error::{DownloadError, Error, Result};
use crate::session::{self, SessionEventSink, SessionOptions};
use crate::types::{Event, FailureKind, Outcome, TaskId, TaskState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{TaskEntry, TaskLedger};

impl TaskLedger {
    /// Start a download session for a Queued task
    ///
    /// The session waits for a free download slot before invoking the engine;
    /// the task stays Queued until then.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::NotFound`] if no task has this id
    /// - [`DownloadError::AlreadyActive`] if a session is running or a retry is scheduled
    /// - [`DownloadError::InvalidState`] if the task is not Queued
    /// - [`DownloadError::OutputDirectory`] if the target directory cannot be created
    /// - [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) has begun
    pub async fn start(&self, id: TaskId) -> Result<()> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or(Error::Download(DownloadError::NotFound { id }))?;
        if entry.is_active() {
            return Err(Error::Download(DownloadError::AlreadyActive { id }));
        }
        self.spawn_session(entry).await
    }

    /// Start every Queued task that has no session yet
    ///
    /// Tasks whose session cannot be started are logged and skipped.
    /// Returns the ids of the tasks that were started.
    pub async fn start_all(&self) -> Result<Vec<TaskId>> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        let mut state = self.state.lock().await;
        let mut started = Vec::new();
        for (id, entry) in state.entries.iter_mut() {
            if entry.task.state != TaskState::Queued || entry.is_active() {
                continue;
            }
            match self.spawn_session(entry).await {
                Ok(()) => started.push(*id),
                Err(e) => {
                    tracing::warn!(task_id = id.0, error = %e, "Failed to start queued task");
                }
            }
        }

        tracing::info!(count = started.len(), "Started queued tasks");
        Ok(started)
    }

    /// Cancel a task
    ///
    /// A running session is cancelled cooperatively and reports its terminal
    /// outcome on its own (Cancelled, or Completed if the engine finishes
    /// first). A Queued task that was never started, or whose retry is
    /// scheduled, becomes Cancelled immediately.
    ///
    /// Returns `false` if the task has already finished or is already being
    /// cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::NotFound`] if no task has this id.
    pub async fn cancel(&self, id: TaskId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or(Error::Download(DownloadError::NotFound { id }))?;

        if let Some(token) = entry.pending_retry.take() {
            token.cancel();
            tracing::info!(task_id = id.0, "Scheduled retry cancelled");
            self.finish_task(entry, Outcome::Cancelled).await;
            return Ok(true);
        }

        if entry.task.state == TaskState::Queued && entry.session.is_none() {
            tracing::info!(task_id = id.0, "Queued task cancelled before it started");
            self.finish_task(entry, Outcome::Cancelled).await;
            return Ok(true);
        }

        // the session's gate must not be awaited under the ledger lock
        let session = entry.session.clone();
        drop(state);

        match session {
            Some(session) => Ok(session.cancel().await),
            None => Ok(false),
        }
    }

    /// Run a Failed or Cancelled task again with a fresh session
    ///
    /// The automatic retry budget starts over.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::NotFound`] if no task has this id
    /// - [`DownloadError::AlreadyActive`] if a session is still running
    /// - [`DownloadError::InvalidState`] if the task is not Failed or Cancelled
    /// - [`DownloadError::OutputDirectory`] if the target directory cannot be
    ///   created (the task is left Queued)
    /// - [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) has begun
    pub async fn retry(&self, id: TaskId) -> Result<()> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or(Error::Download(DownloadError::NotFound { id }))?;
        if entry.is_active() {
            return Err(Error::Download(DownloadError::AlreadyActive { id }));
        }
        if !matches!(entry.task.state, TaskState::Failed | TaskState::Cancelled) {
            return Err(Error::Download(DownloadError::InvalidState {
                id,
                operation: "retry".to_string(),
                current_state: entry.task.state,
            }));
        }

        entry.task.requeue();
        entry.task.attempt = 0;
        self.emit_event(Event::Queued {
            id,
            url: entry.task.url.clone(),
            platform: entry.task.platform,
        });
        tracing::info!(task_id = id.0, "Retrying task");

        // on error the task stays Queued and can be started later
        self.spawn_session(entry).await
    }

    /// Start a session for `entry` and remember its handle
    ///
    /// Called with the ledger lock held, so the session's first event is
    /// applied only after the handle is stored.
    pub(crate) async fn spawn_session(&self, entry: &mut TaskEntry) -> Result<()> {
        let task = &entry.task;
        let options = Arc::new(SessionOptions::from_config(
            &self.config,
            task.target_dir.clone(),
            task.audio_only,
        ));
        let sink: Arc<dyn SessionEventSink> = Arc::new(self.clone());

        let handle = session::start(
            task,
            options,
            self.engine.clone(),
            sink,
            self.limiter.clone(),
        )
        .await?;
        entry.session = Some(handle);
        Ok(())
    }

    /// Start the session of a retry whose backoff has elapsed
    ///
    /// `token` is the one handed out when the retry was scheduled; if it was
    /// cancelled meanwhile, a later retry may own the entry and is left alone.
    pub(crate) async fn resume_retry(&self, id: TaskId, token: &CancellationToken) {
        let mut state = self.state.lock().await;
        if token.is_cancelled() {
            return;
        }
        let Some(entry) = state.entries.get_mut(&id) else {
            return;
        };
        if entry.pending_retry.take().is_none() || !self.is_accepting() {
            return;
        }

        tracing::info!(
            task_id = id.0,
            attempt = entry.task.attempt + 1,
            "Starting retry"
        );
        if let Err(e) = self.spawn_session(entry).await {
            tracing::error!(task_id = id.0, error = %e, "Failed to start retry");
            self.finish_task(
                entry,
                Outcome::Failed {
                    kind: FailureKind::EngineInvocation,
                    message: e.to_string(),
                },
            )
            .await;
        }
    }
}
