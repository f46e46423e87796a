//! Local filesystem storage implementation.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! └── {category}/
//!     └── YYYY-MM/
//!         ├── {category}_snapshot_YYYYMMDD_HHMMSS.json
//!         └── {category}_changes_YYYYMMDD_HHMMSS.json
//! ```
//!
//! File names sort by capture time, so the latest snapshot is the
//! lexicographically greatest name across all month directories.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::Snapshot;
use crate::report::ChangeReport;
use crate::storage::{ReportStore, SnapshotSink, SnapshotSource};
use crate::utils::sanitize_file_component;

const SNAPSHOT_TAG: &str = "snapshot";
const CHANGES_TAG: &str = "changes";

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn category_dir(&self, category: &str) -> Result<PathBuf> {
        let name = sanitize_file_component(category);
        if name.is_empty() {
            return Err(AppError::storage(format!(
                "category id '{category}' is not usable as a directory name"
            )));
        }
        Ok(self.root_dir.join(name))
    }

    /// Relative key of a snapshot or report file.
    fn key(category: &str, tag: &str, captured_at: DateTime<Utc>) -> String {
        let category = sanitize_file_component(category);
        format!(
            "{category}/{}/{category}_{tag}_{}.json",
            captured_at.format("%Y-%m"),
            captured_at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8], overwrite: bool) -> Result<()> {
        let path = self.path(key);
        if !overwrite && tokio::fs::try_exists(&path).await? {
            return Err(AppError::storage(format!("{key} already exists")));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        overwrite: bool,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes, overwrite).await
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            AppError::storage(format!("{} is not readable: {e}", path.display()))
        })
    }

    /// Entries of a directory, empty when it does not exist.
    async fn list_dir(path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            out.push(entry.path());
        }
        Ok(out)
    }

    /// Files of one kind for a category across every month, sorted by name.
    async fn category_files(&self, category: &str, tag: &str) -> Result<Vec<PathBuf>> {
        let dir = self.category_dir(category)?;
        let prefix = format!("{}_{tag}_", sanitize_file_component(category));

        let mut files = Vec::new();
        for month_dir in Self::list_dir(&dir).await? {
            if !tokio::fs::metadata(&month_dir).await?.is_dir() {
                continue;
            }
            for path in Self::list_dir(&month_dir).await? {
                let matches = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".json"));
                if matches {
                    files.push(path);
                }
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// Category directories present under the root.
    pub async fn categories(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for path in Self::list_dir(&self.root_dir).await? {
            if !tokio::fs::metadata(&path).await?.is_dir() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                out.push(name.to_string());
            }
        }
        out.sort();
        Ok(out)
    }

    /// Number of snapshots stored for a category.
    pub async fn snapshot_count(&self, category: &str) -> Result<usize> {
        Ok(self.category_files(category, SNAPSHOT_TAG).await?.len())
    }
}

#[async_trait]
impl SnapshotSource for LocalStorage {
    async fn load_latest_previous(&self, category_id: &str) -> Result<Option<Snapshot>> {
        let files = self.category_files(category_id, SNAPSHOT_TAG).await?;
        let Some(latest) = files.last() else {
            log::info!("No previous snapshot for '{}'", category_id);
            return Ok(None);
        };
        log::debug!("Previous snapshot for '{}': {}", category_id, latest.display());
        Ok(Some(Self::read_json(latest).await?))
    }
}

#[async_trait]
impl SnapshotSink for LocalStorage {
    async fn store(&self, category_id: &str, snapshot: &Snapshot) -> Result<String> {
        if snapshot.category != category_id {
            return Err(AppError::storage(format!(
                "snapshot of '{}' cannot be stored under '{}'",
                snapshot.category, category_id
            )));
        }
        self.category_dir(category_id)?;
        let key = Self::key(category_id, SNAPSHOT_TAG, snapshot.captured_at);
        self.write_json(&key, snapshot, false).await?;
        log::info!("Stored {} records to {}", snapshot.len(), key);
        Ok(key)
    }
}

#[async_trait]
impl ReportStore for LocalStorage {
    async fn store_report(&self, report: &ChangeReport) -> Result<String> {
        let category = &report.summary.category;
        self.category_dir(category)?;
        let key = Self::key(category, CHANGES_TAG, report.summary.captured_at);
        self.write_json(&key, report, true).await?;
        Ok(key)
    }

    async fn load_reports_since(&self, since: DateTime<Utc>) -> Result<Vec<ChangeReport>> {
        let mut reports = Vec::new();
        for category in self.categories().await? {
            for path in self.category_files(&category, CHANGES_TAG).await? {
                match Self::read_json::<ChangeReport>(&path).await {
                    Ok(report) if report.summary.captured_at >= since => reports.push(report),
                    Ok(_) => {}
                    Err(e) => log::warn!("Skipping report: {}", e),
                }
            }
        }
        reports.sort_by(|a, b| {
            a.summary
                .captured_at
                .cmp(&b.summary.captured_at)
                .then_with(|| a.summary.category.cmp(&b.summary.category))
        });
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductRecord;
    use crate::pipeline::diff::detect_changes;
    use tempfile::TempDir;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn snapshot(category: &str, at: &str, ids: &[&str]) -> Snapshot {
        let captured_at = ts(at);
        let records = ids
            .iter()
            .map(|id| {
                let mut r = ProductRecord::new(captured_at).with_prices(Some(100.0), Some(80.0));
                r.product_id = Some(id.to_string());
                r
            })
            .collect();
        Snapshot::new(category, captured_at, records)
    }

    #[tokio::test]
    async fn test_no_previous_snapshot() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        assert!(storage.load_latest_previous("ofertas").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_layout_and_latest_across_months() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let feb = snapshot("ofertas", "2026-02-28T23:00:00Z", &["1"]);
        let mar = snapshot("ofertas", "2026-03-01T08:30:15Z", &["1", "2"]);

        let key = storage.store("ofertas", &mar).await.unwrap();
        assert_eq!(key, "ofertas/2026-03/ofertas_snapshot_20260301_083015.json");
        storage.store("ofertas", &feb).await.unwrap();

        let latest = storage.load_latest_previous("ofertas").await.unwrap().unwrap();
        assert_eq!(latest, mar);
        assert_eq!(storage.snapshot_count("ofertas").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_categories_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage
            .store("deportes", &snapshot("deportes", "2026-03-01T08:00:00Z", &["9"]))
            .await
            .unwrap();
        assert!(storage.load_latest_previous("ofertas").await.unwrap().is_none());
        assert_eq!(storage.categories().await.unwrap(), vec!["deportes".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshots_are_persisted_once() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let snap = snapshot("ofertas", "2026-03-01T08:00:00Z", &["1"]);

        storage.store("ofertas", &snap).await.unwrap();
        let err = storage.store("ofertas", &snap).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
    }

    #[tokio::test]
    async fn test_store_rejects_mismatched_category() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let snap = snapshot("ofertas", "2026-03-01T08:00:00Z", &["1"]);
        assert!(storage.store("deportes", &snap).await.is_err());
    }

    #[tokio::test]
    async fn test_reports_since() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let old = snapshot("ofertas", "2026-03-01T08:00:00Z", &["1"]);
        let new = snapshot("ofertas", "2026-03-02T08:00:00Z", &["1", "2"]);
        let other = snapshot("deportes", "2026-03-02T07:00:00Z", &["5"]);

        for (prev, curr) in [(None, &old), (Some(&old), &new), (None, &other)] {
            let changes = detect_changes(prev, curr, 0.01);
            let report = ChangeReport::new(&changes, changes.summary(prev, curr));
            storage.store_report(&report).await.unwrap();
        }

        let reports = storage
            .load_reports_since(ts("2026-03-02T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].summary.category, "deportes");
        assert_eq!(reports[1].summary.category, "ofertas");
        assert_eq!(reports[1].new.len(), 1);
    }
}
