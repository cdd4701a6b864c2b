//! Download history: restoring tasks from the record store and writing outcomes back.

use crate::db::NewRecord;
use crate::error::Result;
use crate::platform;
use crate::types::{DownloadTask, Outcome, TaskId, TaskState};
use std::collections::HashSet;
use std::sync::atomic::Ordering;

use super::{TaskEntry, TaskLedger};

impl TaskLedger {
    /// Load the download history into the ledger
    ///
    /// Finished records with a file path become Completed tasks; every other
    /// record becomes a Queued task that can be started again. Records whose
    /// URL is already in the ledger, or whose platform cannot be determined,
    /// are skipped. No events are broadcast; call [`list`](Self::list) afterwards.
    ///
    /// Returns the number of tasks added.
    ///
    /// # Errors
    ///
    /// Returns an error if the record store cannot be read.
    pub async fn load_history(&self) -> Result<usize> {
        let records = self.store.list_all().await?;

        let mut state = self.state.lock().await;
        let mut known: HashSet<String> = state.entries.values().map(|e| e.task.url.clone()).collect();
        let mut loaded = 0;

        // oldest first, so task ids follow record age
        for record in records.into_iter().rev() {
            if !known.insert(record.url.clone()) {
                continue;
            }
            let Some(platform) = record.platform().or_else(|| platform::detect(&record.url)) else {
                tracing::warn!(record_id = record.id.0, url = %record.url, "Skipping record with unknown platform");
                continue;
            };

            let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
            let mut task = DownloadTask::new(
                id,
                record.url.clone(),
                self.config.download_dir().clone(),
                self.config.advanced.extract_audio,
                platform,
            );
            task.title = record.title().map(str::to_string);
            task.record_id = Some(record.id);

            if record.is_finished
                && let Some(path) = record.path()
            {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    task.target_dir = parent.to_path_buf();
                }
                task.apply_outcome(&Outcome::Completed { path });
            }

            state.entries.insert(id, TaskEntry::new(task));
            loaded += 1;
        }

        tracing::info!(loaded, "Download history loaded");
        Ok(loaded)
    }

    /// Write the task's current outcome to the record store
    ///
    /// Completed tasks are stored as finished with their path; anything else
    /// is stored as unfinished. A task without a record (or whose record was
    /// deleted meanwhile) gets one; the new id is kept on the task.
    pub(crate) async fn persist_task(&self, task: &mut DownloadTask) -> Result<()> {
        let finished_path = match task.state {
            TaskState::Completed => task.file_path.as_deref(),
            _ => None,
        };

        // a bare status update cannot carry a newly learned title
        if let Some(record_id) = task.record_id
            && task.title.is_none()
            && self
                .store
                .update_status(record_id, finished_path.is_some(), finished_path)
                .await?
        {
            tracing::debug!(task_id = task.id.0, record_id = record_id.0, "Download record updated");
            return Ok(());
        }

        let mut record = NewRecord::new(task.url.as_str(), task.platform).with_title(task.title.as_deref());
        if let Some(path) = finished_path {
            record = record.finished(path);
        }
        let record_id = self.store.insert(&record).await?;
        task.record_id = Some(record_id);
        tracing::debug!(task_id = task.id.0, record_id = record_id.0, "Download record stored");
        Ok(())
    }
}
