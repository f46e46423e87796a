//! Storage abstractions for snapshot persistence.
//!
//! Snapshots are written once per run and only read afterwards, when the
//! next run of the same category needs something to compare against.
//! Change reports are kept next to the snapshot they were computed for.
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! └── ofertas/
//!     ├── 2026-02/
//!     │   ├── ofertas_snapshot_20260228_101500.json
//!     │   └── ofertas_changes_20260228_101500.json
//!     └── 2026-03/
//!         └── ofertas_snapshot_20260301_101500.json
//! ```

pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::Snapshot;
use crate::report::ChangeReport;

// Re-export for convenience
pub use local::LocalStorage;

/// Reads the snapshot a new capture should be compared against.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// The most recently persisted snapshot for a category, if any.
    async fn load_latest_previous(&self, category_id: &str) -> Result<Option<Snapshot>>;
}

/// Persists snapshots.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Store a snapshot. Storing the same category and capture time twice
    /// is an error.
    async fn store(&self, category_id: &str, snapshot: &Snapshot) -> Result<String>;
}

/// Persists change reports and reads them back for aggregation.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn store_report(&self, report: &ChangeReport) -> Result<String>;

    /// Every report captured at or after `since`, oldest first.
    async fn load_reports_since(&self, since: DateTime<Utc>) -> Result<Vec<ChangeReport>>;
}
