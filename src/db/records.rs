//! Download record CRUD, search, statistics and maintenance.

use crate::error::DatabaseError;
use crate::types::RecordId;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

use super::{Database, DownloadRecord, NewRecord, RecordStats, now_text};

const SELECT_COLUMNS: &str = r#"
    SELECT id, url, title, file_path, platform, download_time,
           is_finished, created_at, updated_at
    FROM downloads
"#;

impl Database {
    /// Insert a download record, or update the row already stored for the same URL
    ///
    /// Leading/trailing whitespace is trimmed from every text field. An empty
    /// title never overwrites a stored one.
    pub async fn insert_record(&self, record: &NewRecord) -> Result<RecordId> {
        let url = record.url.trim();
        if url.is_empty() {
            return Err(Error::Database(DatabaseError::ConstraintViolation(
                "URL must not be empty".to_string(),
            )));
        }
        let now = now_text();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO downloads (
                url, title, file_path, platform, download_time,
                is_finished, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = CASE WHEN excluded.title <> '' THEN excluded.title ELSE downloads.title END,
                file_path = excluded.file_path,
                platform = excluded.platform,
                download_time = excluded.download_time,
                is_finished = excluded.is_finished,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(url)
        .bind(record.title.trim())
        .bind(record.file_path.trim())
        .bind(record.platform.trim())
        .bind(&now)
        .bind(record.is_finished)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert download record: {}",
                e
            )))
        })?;

        tracing::debug!(record_id = id, url = %url, "Download record stored");
        Ok(RecordId(id))
    }

    /// Set the completion flag and file path of a record
    ///
    /// Returns `false` if no record has this id.
    pub async fn update_record_status(
        &self,
        id: RecordId,
        is_finished: bool,
        file_path: Option<&Path>,
    ) -> Result<bool> {
        let file_path = file_path
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let result = sqlx::query(
            "UPDATE downloads SET is_finished = ?, file_path = ?, updated_at = ? WHERE id = ?",
        )
        .bind(is_finished)
        .bind(&file_path)
        .bind(now_text())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update download record: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            tracing::warn!(record_id = id.0, "No download record to update");
            return Ok(false);
        }
        Ok(true)
    }

    /// Get a record by ID
    pub async fn get_record(&self, id: RecordId) -> Result<Option<DownloadRecord>> {
        let row = sqlx::query_as::<_, DownloadRecord>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get download record: {}",
                    e
                )))
            })?;
        Ok(row)
    }

    /// All records, newest first
    pub async fn list_records(&self) -> Result<Vec<DownloadRecord>> {
        self.fetch_records(
            &format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC"),
            &[],
        )
        .await
    }

    /// Records of one platform label, newest first
    pub async fn list_by_platform(&self, platform: &str) -> Result<Vec<DownloadRecord>> {
        self.fetch_records(
            &format!("{SELECT_COLUMNS} WHERE platform = ? ORDER BY created_at DESC, id DESC"),
            &[platform],
        )
        .await
    }

    /// Finished records, most recently updated first
    pub async fn list_finished(&self) -> Result<Vec<DownloadRecord>> {
        self.fetch_records(
            &format!("{SELECT_COLUMNS} WHERE is_finished = 1 ORDER BY updated_at DESC, id DESC"),
            &[],
        )
        .await
    }

    /// Unfinished records, newest first
    pub async fn list_unfinished(&self) -> Result<Vec<DownloadRecord>> {
        self.fetch_records(
            &format!("{SELECT_COLUMNS} WHERE is_finished = 0 ORDER BY created_at DESC, id DESC"),
            &[],
        )
        .await
    }

    /// Records whose title, URL or platform contains `keyword`
    ///
    /// A blank keyword matches nothing.
    pub async fn search(&self, keyword: &str) -> Result<Vec<DownloadRecord>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!("%{}%", keyword);
        self.fetch_records(
            &format!(
                "{SELECT_COLUMNS} WHERE title LIKE ? OR url LIKE ? OR platform LIKE ? \
                 ORDER BY created_at DESC, id DESC"
            ),
            &[&pattern, &pattern, &pattern],
        )
        .await
    }

    async fn fetch_records(&self, sql: &str, binds: &[&str]) -> Result<Vec<DownloadRecord>> {
        let mut query = sqlx::query_as::<_, DownloadRecord>(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list download records: {}",
                e
            )))
        })?;
        Ok(rows)
    }

    /// Delete a record
    ///
    /// Returns `false` if no record has this id.
    pub async fn delete_record(&self, id: RecordId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete download record: {}",
                    e
                )))
            })?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every record, returning how many were removed
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM downloads")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear download records: {}",
                    e
                )))
            })?;
        tracing::info!(removed = result.rows_affected(), "Download history cleared");
        Ok(result.rows_affected())
    }

    /// Totals, per-platform counts and success rate
    pub async fn stats(&self) -> Result<RecordStats> {
        let (total, finished): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_finished = 1 THEN 1 ELSE 0 END), 0) FROM downloads",
        )
        .fetch_one(&self.pool)
        .await?;

        let per_platform: Vec<(String, i64)> = sqlx::query_as(
            "SELECT platform, COUNT(*) FROM downloads WHERE platform != '' GROUP BY platform",
        )
        .fetch_all(&self.pool)
        .await?;

        let success_rate = if total > 0 {
            finished as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Ok(RecordStats {
            total,
            finished,
            unfinished: total - finished,
            platform_stats: per_platform.into_iter().collect::<BTreeMap<_, _>>(),
            success_rate,
        })
    }

    /// Reclaim free pages and rebuild indexes
    pub async fn optimize(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        sqlx::query("REINDEX").execute(&self.pool).await?;
        tracing::info!("Database optimized");
        Ok(())
    }

    /// Write a consistent copy of the database to `path`
    ///
    /// Fails if `path` already exists.
    pub async fn backup_to(&self, path: &Path) -> Result<()> {
        if path.exists() {
            return Err(Error::Database(DatabaseError::ConstraintViolation(format!(
                "backup target already exists: {}",
                path.display()
            ))));
        }
        sqlx::query("VACUUM INTO ?")
            .bind(path.to_string_lossy().into_owned())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to back up database: {}",
                    e
                )))
            })?;
        tracing::info!(path = %path.display(), "Database backup written");
        Ok(())
    }
}
