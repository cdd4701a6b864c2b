//! Task ledger: the collection of download tasks and the owner of their sessions.
//!
//! The `TaskLedger` struct and its methods are organized by domain:
//! - [`tasks`] - Adding, removing and listing tasks
//! - [`control`] - Starting, cancelling and retrying downloads
//! - [`events`] - Applying session events and broadcasting UI notifications
//! - [`history`] - Loading and persisting download records
//! - [`lifecycle`] - Shutdown coordination

mod control;
mod events;
mod history;
mod lifecycle;
mod tasks;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::db::RecordStore;
use crate::engine::Engine;
use crate::session::SessionHandle;
use crate::types::{DownloadTask, Event, TaskId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64};
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// One task plus whatever is currently driving it
#[derive(Debug)]
pub(crate) struct TaskEntry {
    pub(crate) task: DownloadTask,
    /// Live (or most recent) session
    pub(crate) session: Option<SessionHandle>,
    /// Set while an automatic retry waits out its backoff
    pub(crate) pending_retry: Option<CancellationToken>,
}

impl TaskEntry {
    pub(crate) fn new(task: DownloadTask) -> Self {
        Self {
            task,
            session: None,
            pending_retry: None,
        }
    }

    /// True while a session is running or a retry is scheduled
    pub(crate) fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_finished()) || self.pending_retry.is_some()
    }
}

/// Everything guarded by the ledger lock
#[derive(Debug, Default)]
pub(crate) struct LedgerState {
    /// Tasks keyed by id; ids increase monotonically so iteration is insertion order
    pub(crate) entries: BTreeMap<TaskId, TaskEntry>,
}

/// Download task ledger (cloneable - all fields are Arc-wrapped)
///
/// Owns the task collection, starts one session per download and applies the
/// sessions' events. Every mutation of the collection goes through a single
/// `tokio::sync::Mutex`; UI notifications are broadcast while holding it, so
/// subscribers see them in the order the mutations happened.
#[derive(Clone)]
pub struct TaskLedger {
    /// Task collection
    pub(crate) state: Arc<Mutex<LedgerState>>,
    /// Next task id
    pub(crate) next_id: Arc<AtomicU64>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Engine every session invokes
    pub(crate) engine: Arc<dyn Engine>,
    /// Download history
    pub(crate) store: Arc<dyn RecordStore>,
    /// Limits concurrent engine invocations (sized from `network.concurrent_downloads`)
    pub(crate) limiter: Arc<Semaphore>,
    /// Flag to indicate whether new work is accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl TaskLedger {
    /// Create an empty ledger
    ///
    /// Call [`load_history`](Self::load_history) afterwards to restore tasks
    /// from the record store.
    pub fn new(config: Config, engine: Arc<dyn Engine>, store: Arc<dyn RecordStore>) -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let permits = config.network.concurrent_downloads.max(1);

        tracing::info!(
            engine = engine.name(),
            concurrent_downloads = permits,
            "Task ledger initialized"
        );

        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            event_tx,
            config: Arc::new(config),
            engine,
            store,
            limiter: Arc::new(Semaphore::new(permits)),
            accepting_new: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Subscribe to task events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than 1000 events,
    /// it will receive a `RecvError::Lagged` error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use vidqueue::{Config, Database, TaskLedger, YtDlpEngine};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let config = Config::default();
    ///     let engine = Arc::new(YtDlpEngine::from_config(&config.tools)?);
    ///     let store = Arc::new(Database::new(&config.persistence.database_path).await?);
    ///     let ledger = TaskLedger::new(config, engine, store);
    ///
    ///     let mut events = ledger.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             println!("{:?}", event);
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Current configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting_new.load(std::sync::atomic::Ordering::SeqCst)
    }
}
