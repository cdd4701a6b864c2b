//! Task collection: add, remove, list.

use crate::error::{Error, Result};
use crate::platform;
use crate::types::{AddOptions, DownloadTask, Event, TaskId};
use std::sync::atomic::Ordering;

use super::{TaskEntry, TaskLedger};

impl TaskLedger {
    /// Add a download task in the Queued state
    ///
    /// The URL must belong to a supported platform. The target directory
    /// defaults to `download.download_dir` and the audio-only flag to
    /// `advanced.extract_audio`. The task is not started; call
    /// [`start`](Self::start) or [`start_all`](Self::start_all).
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedUrl`] if the URL is not a Bilibili, YouTube or YouTube Music link
    /// - [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) has begun
    pub async fn add(&self, url: &str, options: AddOptions) -> Result<DownloadTask> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        let platform = platform::require(url)?;
        let url = url.trim();
        let target_dir = options
            .target_dir
            .unwrap_or_else(|| self.config.download_dir().clone());
        let audio_only = options
            .audio_only
            .unwrap_or(self.config.advanced.extract_audio);

        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let task = DownloadTask::new(id, url, target_dir, audio_only, platform);

        let mut state = self.state.lock().await;
        state.entries.insert(id, TaskEntry::new(task.clone()));
        self.emit_event(Event::Queued {
            id,
            url: task.url.clone(),
            platform,
        });
        drop(state);

        tracing::info!(task_id = id.0, url = %task.url, platform = %platform, "Task added");
        Ok(task)
    }

    /// Remove a task from the ledger
    ///
    /// A live session is cancelled and a pending retry is dropped. Events the
    /// session still produces for this id are discarded. The persisted
    /// download history is left untouched.
    ///
    /// Returns `false` if no task has this id.
    pub async fn remove(&self, id: TaskId) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.entries.remove(&id) else {
            return false;
        };
        self.emit_event(Event::Removed { id });
        drop(state);

        if let Some(token) = entry.pending_retry {
            token.cancel();
        }
        if let Some(session) = entry.session {
            session.cancel().await;
        }

        tracing::info!(task_id = id.0, "Task removed");
        true
    }

    /// All tasks in insertion order
    pub async fn list(&self) -> Vec<DownloadTask> {
        let state = self.state.lock().await;
        state.entries.values().map(|e| e.task.clone()).collect()
    }

    /// One task by id
    pub async fn get(&self, id: TaskId) -> Option<DownloadTask> {
        let state = self.state.lock().await;
        state.entries.get(&id).map(|e| e.task.clone())
    }

    /// Number of tasks in the ledger
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// True if the ledger holds no tasks
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }
}
