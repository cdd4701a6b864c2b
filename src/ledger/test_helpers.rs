//! Shared test helpers for creating TaskLedger instances in tests.

use crate::config::Config;
use crate::db::{DownloadRecord, NewRecord, RecordStore, now_text};
use crate::engine::Engine;
use crate::error::Result;
use crate::ledger::TaskLedger;
use crate::types::{Event, RecordId};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::broadcast;

/// Record store kept in memory, with the same upsert-by-URL behaviour as the database
#[derive(Default)]
pub(crate) struct MemoryStore {
    records: Mutex<Vec<DownloadRecord>>,
}

impl MemoryStore {
    pub(crate) fn records(&self) -> Vec<DownloadRecord> {
        self.records.lock().unwrap().clone()
    }

    pub(crate) fn by_url(&self, url: &str) -> Option<DownloadRecord> {
        self.records().into_iter().find(|r| r.url == url)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, record: &NewRecord) -> Result<RecordId> {
        let mut records = self.records.lock().unwrap();
        let now = now_text();
        if let Some(existing) = records.iter_mut().find(|r| r.url == record.url) {
            if !record.title.is_empty() {
                existing.title = record.title.clone();
            }
            existing.file_path = record.file_path.clone();
            existing.platform = record.platform.clone();
            existing.is_finished = record.is_finished;
            existing.updated_at = now;
            return Ok(existing.id);
        }
        let id = RecordId(records.len() as i64 + 1);
        records.push(DownloadRecord {
            id,
            url: record.url.clone(),
            title: record.title.clone(),
            file_path: record.file_path.clone(),
            platform: record.platform.clone(),
            download_time: now.clone(),
            is_finished: record.is_finished,
            created_at: now.clone(),
            updated_at: now,
        });
        Ok(id)
    }

    async fn update_status(
        &self,
        id: RecordId,
        is_finished: bool,
        file_path: Option<&Path>,
    ) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        record.is_finished = is_finished;
        record.file_path = file_path
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        record.updated_at = now_text();
        Ok(true)
    }

    async fn list_all(&self) -> Result<Vec<DownloadRecord>> {
        let mut records = self.records();
        records.reverse();
        Ok(records)
    }

    async fn delete(&self, id: RecordId) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }
}

/// Config pointing into `dir` with fast retries
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = dir.join("downloads");
    config.download.cancel_grace = Duration::from_millis(300);
    config.persistence.database_path = dir.join("test.db");
    config.network.concurrent_downloads = 2;
    config.network.retry_times = 0;
    config.network.retry_backoff.initial_delay = Duration::from_millis(10);
    config.network.retry_backoff.max_delay = Duration::from_millis(50);
    config.network.retry_backoff.jitter = false;
    config
}

/// Helper to create a test TaskLedger backed by a [`MemoryStore`].
/// Returns the ledger, the store and the tempdir (which must be kept alive).
pub(crate) fn create_test_ledger(
    engine: Arc<dyn Engine>,
    configure: impl FnOnce(&mut Config),
) -> (TaskLedger, Arc<MemoryStore>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    configure(&mut config);

    let store = Arc::new(MemoryStore::default());
    let ledger = TaskLedger::new(config, engine, store.clone());
    (ledger, store, temp_dir)
}

/// Receive events until one matches, failing after a few seconds
pub(crate) async fn wait_for_event(
    rx: &mut broadcast::Receiver<Event>,
    predicate: impl Fn(&Event) -> bool,
) -> Event {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Receive events up to and including the next `Finished`
pub(crate) async fn collect_until_finished(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut events = Vec::new();
        loop {
            let event = rx.recv().await.unwrap();
            let done = matches!(event, Event::Finished { .. });
            events.push(event);
            if done {
                return events;
            }
        }
    })
    .await
    .expect("timed out waiting for Finished")
}

pub(crate) const YOUTUBE_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
pub(crate) const BILIBILI_URL: &str = "https://www.bilibili.com/video/BV1xx411c7mD";
