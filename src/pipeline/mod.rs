//! Change detection and the pipelines built on it.
//!
//! - `keys` / `compare` / `diff`: the pure snapshot comparison
//! - `alerts`: brand watchlist filtering
//! - `run_crawler`: crawl categories, compare, persist and notify
//! - `run_aggregate`: master report over recent change reports

pub mod aggregate;
pub mod alerts;
pub mod compare;
pub mod crawl;
pub mod diff;
pub mod keys;

pub use aggregate::{MasterReport, run_aggregate};
pub use alerts::Watchlist;
pub use compare::{DEFAULT_TOLERANCE, Field, FieldComparator};
pub use crawl::{CategoryRun, RunContext, run_category, run_crawler};
pub use diff::{ChangeDetector, ChangeSet, ChangeSetSummary, FieldChange, detect_changes};
pub use keys::{KeyField, KeyResolver, RecordKey, Side};
