//! Shutdown coordination.

use crate::error::Result;
use crate::types::{Event, TaskState};
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::TaskLedger;

/// Extra time granted on top of `download.cancel_grace` for sessions to report back
const SHUTDOWN_SLACK: Duration = Duration::from_secs(5);

impl TaskLedger {
    /// Gracefully shut down the ledger
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new work (`add`, `start`, `retry` return [`Error::ShuttingDown`](crate::Error::ShuttingDown))
    /// 2. Drops scheduled retries and cancels all live sessions
    /// 3. Waits for the sessions to report their outcome, bounded by `cancel_grace` plus a few seconds
    /// 4. Persists still-queued tasks as unfinished records
    /// 5. Emits [`Event::Shutdown`]
    ///
    /// Persistence errors are logged and do not abort the sequence.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new work
        self.accepting_new.store(false, Ordering::SeqCst);

        // 2. Collect sessions and retries; gates are awaited after the lock is released
        let sessions = {
            let mut state = self.state.lock().await;
            let mut sessions = Vec::new();
            for entry in state.entries.values_mut() {
                if let Some(token) = entry.pending_retry.take() {
                    token.cancel();
                }
                if let Some(session) = &entry.session
                    && !session.is_finished()
                {
                    sessions.push(session.clone());
                }
            }
            sessions
        };

        tracing::debug!(active_count = sessions.len(), "Cancelling active sessions");
        for session in &sessions {
            session.cancel().await;
        }

        // 3. Wait for sessions to finish
        let timeout = self.config.download.cancel_grace + SHUTDOWN_SLACK;
        let wait_all = async {
            for session in &sessions {
                session.wait().await;
            }
        };
        match tokio::time::timeout(timeout, wait_all).await {
            Ok(()) => tracing::info!("All active sessions finished"),
            Err(_) => tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "Timeout waiting for sessions to finish, proceeding with shutdown"
            ),
        }

        // 4. Persist queued tasks
        let mut state = self.state.lock().await;
        let mut persisted_count = 0;
        for entry in state.entries.values_mut() {
            if entry.task.state != TaskState::Queued {
                continue;
            }
            match self.persist_task(&mut entry.task).await {
                Ok(()) => persisted_count += 1,
                Err(e) => tracing::error!(
                    task_id = entry.task.id.0,
                    error = %e,
                    "Failed to persist queued task during shutdown"
                ),
            }
        }
        if persisted_count > 0 {
            tracing::info!(persisted_count, "Persisted queued tasks");
        }

        // 5. Emit shutdown event
        self.emit_event(Event::Shutdown);
        drop(state);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// True once [`shutdown`](Self::shutdown) has begun
    pub fn is_shutting_down(&self) -> bool {
        !self.is_accepting()
    }
}
