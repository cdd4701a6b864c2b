//! Database layer for vidqueue
//!
//! Handles SQLite persistence of download records (the download history).
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`records`]: Download record CRUD, search, statistics and maintenance
//!
//! The ledger only talks to the store through the [`RecordStore`] trait, which
//! [`Database`] implements. Tests substitute in-memory stores.

use crate::Result;
use crate::types::{Platform, RecordId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

mod migrations;
mod records;

/// Timestamp format used for every text timestamp in the store
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time formatted with [`TIMESTAMP_FORMAT`]
pub(crate) fn now_text() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// New download record to be inserted into the database
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    /// Source URL (unique in the store)
    pub url: String,
    /// Title reported by the engine (empty if unknown)
    pub title: String,
    /// Final file path (empty unless finished)
    pub file_path: String,
    /// Platform label, see [`Platform::as_str`]
    pub platform: String,
    /// Whether the download completed
    pub is_finished: bool,
}

impl NewRecord {
    /// Build a record for `url` on `platform`
    pub fn new(url: impl Into<String>, platform: Platform) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            file_path: String::new(),
            platform: platform.as_str().to_string(),
            is_finished: false,
        }
    }

    /// Set the title
    pub fn with_title(mut self, title: Option<&str>) -> Self {
        self.title = title.unwrap_or_default().to_string();
        self
    }

    /// Mark finished with the given output path
    pub fn finished(mut self, file_path: &Path) -> Self {
        self.is_finished = true;
        self.file_path = file_path.to_string_lossy().into_owned();
        self
    }
}

/// Download record from database
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Unique database ID
    pub id: RecordId,
    /// Source URL
    pub url: String,
    /// Title (empty if unknown)
    pub title: String,
    /// Final file path (empty unless finished)
    pub file_path: String,
    /// Platform label
    pub platform: String,
    /// When the download was last recorded
    pub download_time: String,
    /// Whether the download completed
    pub is_finished: bool,
    /// When the record was created
    pub created_at: String,
    /// When the record was last updated
    pub updated_at: String,
}

impl DownloadRecord {
    /// Parsed platform label
    pub fn platform(&self) -> Option<Platform> {
        Platform::from_label(&self.platform)
    }

    /// File path, or `None` if empty
    pub fn path(&self) -> Option<PathBuf> {
        (!self.file_path.is_empty()).then(|| PathBuf::from(&self.file_path))
    }

    /// Title, or `None` if empty
    pub fn title(&self) -> Option<&str> {
        (!self.title.is_empty()).then_some(self.title.as_str())
    }
}

/// Aggregate counts over the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordStats {
    /// Number of records
    pub total: i64,
    /// Number of finished records
    pub finished: i64,
    /// Number of unfinished records
    pub unfinished: i64,
    /// Record count per platform label (records without a platform are not counted)
    pub platform_stats: BTreeMap<String, i64>,
    /// Finished records as a percentage of all records (0 when empty)
    pub success_rate: f64,
}

/// Persistence contract used by the [`TaskLedger`](crate::TaskLedger)
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a record; if the URL is already stored, update that row instead.
    /// Returns the row's id.
    async fn insert(&self, record: &NewRecord) -> Result<RecordId>;

    /// Set the completion flag and file path of a record. Returns false if no such record.
    async fn update_status(
        &self,
        id: RecordId,
        is_finished: bool,
        file_path: Option<&Path>,
    ) -> Result<bool>;

    /// All records, newest first
    async fn list_all(&self) -> Result<Vec<DownloadRecord>>;

    /// Delete a record. Returns false if no such record.
    async fn delete(&self, id: RecordId) -> Result<bool>;
}

/// Database handle for vidqueue
pub struct Database {
    pool: SqlitePool,
}

#[async_trait]
impl RecordStore for Database {
    async fn insert(&self, record: &NewRecord) -> Result<RecordId> {
        self.insert_record(record).await
    }

    async fn update_status(
        &self,
        id: RecordId,
        is_finished: bool,
        file_path: Option<&Path>,
    ) -> Result<bool> {
        self.update_record_status(id, is_finished, file_path).await
    }

    async fn list_all(&self) -> Result<Vec<DownloadRecord>> {
        self.list_records().await
    }

    async fn delete(&self, id: RecordId) -> Result<bool> {
        self.delete_record(id).await
    }
}
