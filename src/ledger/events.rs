//! Session events: task mutation and UI notification.

use crate::retry::{IsRetryable, backoff_delay};
use crate::session::{SessionEvent, SessionEventSink};
use crate::types::{Event, Outcome, TaskId, TaskState};
use tokio_util::sync::CancellationToken;

use super::{TaskEntry, TaskLedger};

#[async_trait::async_trait]
impl SessionEventSink for TaskLedger {
    /// Apply one session event under the ledger lock and broadcast the matching notification
    ///
    /// Events for tasks that are no longer in the ledger are discarded.
    async fn on_event(&self, id: TaskId, event: SessionEvent) {
        let mut state = self.state.lock().await;
        let Some(entry) = state.entries.get_mut(&id) else {
            tracing::trace!(task_id = id.0, "Dropping event for removed task");
            return;
        };

        match event {
            SessionEvent::Started => {
                entry.task.state = TaskState::Running;
                entry.task.attempt += 1;
                self.emit_event(Event::Started {
                    id,
                    attempt: entry.task.attempt,
                });
            }
            SessionEvent::Log(line) => {
                self.emit_event(Event::Log { id, line });
            }
            SessionEvent::Progress(mut progress) => {
                progress.percent = progress.percent.max(entry.task.percent);
                entry.task.percent = progress.percent;
                self.emit_event(Event::Progress { id, progress });
            }
            SessionEvent::Finished { outcome, title } => {
                if title.is_some() {
                    entry.task.title = title;
                }
                self.handle_finished(entry, outcome).await;
            }
        }
    }
}

impl TaskLedger {
    /// Either schedule an automatic retry or make the outcome final
    async fn handle_finished(&self, entry: &mut TaskEntry, outcome: Outcome) {
        if let Outcome::Failed { kind, message } = &outcome
            && kind.is_retryable()
            && entry.task.attempt <= self.config.network.retry_times
            && self.is_accepting()
        {
            self.schedule_retry(entry, message.clone());
            return;
        }
        self.finish_task(entry, outcome).await;
    }

    /// Requeue a task whose transfer failed and start a fresh session after a backoff
    fn schedule_retry(&self, entry: &mut TaskEntry, error: String) {
        let id = entry.task.id;
        let attempt = entry.task.attempt;
        let delay = backoff_delay(&self.config.network.retry_backoff, attempt);

        entry.task.requeue();
        entry.session = None;
        let token = CancellationToken::new();
        entry.pending_retry = Some(token.clone());

        tracing::warn!(
            task_id = id.0,
            attempt,
            max_retries = self.config.network.retry_times,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Download failed, retrying"
        );
        self.emit_event(Event::Retrying {
            id,
            attempt: attempt + 1,
            delay,
            error,
        });

        let ledger = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => ledger.resume_retry(id, &token).await,
            }
        });
    }

    /// Apply a terminal outcome, persist it and broadcast `Event::Finished`
    pub(crate) async fn finish_task(&self, entry: &mut TaskEntry, outcome: Outcome) {
        let id = entry.task.id;
        entry.task.apply_outcome(&outcome);
        entry.session = None;
        entry.pending_retry = None;

        if let Err(e) = self.persist_task(&mut entry.task).await {
            tracing::error!(task_id = id.0, error = %e, "Failed to persist download record");
        }

        self.emit_event(Event::Finished {
            id,
            success: entry.task.state == TaskState::Completed,
            failure: entry.task.failure,
            message: entry.task.message.clone().unwrap_or_default(),
            file_path: entry.task.file_path.clone(),
        });
    }
}
