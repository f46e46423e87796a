// src/pipeline/aggregate.rs

//! Master report over every change report of a recent window.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};
use crate::notify::{Attachment, Notifier};
use crate::pipeline::diff::ChangeSetSummary;
use crate::pipeline::keys::KeyField;
use crate::report::{ChangeReport, csv_writer, finish, sections_to_attachments};
use crate::storage::ReportStore;

/// Counts for one category across the window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryTotals {
    pub category: String,
    pub runs: usize,
    pub new: usize,
    pub changed: usize,
    pub removed: usize,
}

/// Change reports of every category captured in `[since, until]`.
#[derive(Debug, Clone)]
pub struct MasterReport {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub reports: Vec<ChangeReport>,
}

impl MasterReport {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>, reports: Vec<ChangeReport>) -> Self {
        let reports = reports
            .into_iter()
            .filter(|r| r.summary.captured_at >= since && r.summary.captured_at <= until)
            .collect();
        Self {
            since,
            until,
            reports,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reports.iter().all(ChangeReport::is_empty)
    }

    /// Per-category counts, sorted by category.
    pub fn totals(&self) -> Vec<CategoryTotals> {
        let mut by_category: BTreeMap<&str, CategoryTotals> = BTreeMap::new();
        for report in &self.reports {
            let entry = by_category
                .entry(report.summary.category.as_str())
                .or_insert_with(|| CategoryTotals {
                    category: report.summary.category.clone(),
                    ..CategoryTotals::default()
                });
            entry.runs += 1;
            entry.new += report.new.len();
            entry.changed += report.changed.len();
            entry.removed += report.removed.len();
        }
        by_category.into_values().collect()
    }

    /// Combined summary handed to notifiers.
    pub fn summary(&self) -> ChangeSetSummary {
        let sum = |f: fn(&ChangeSetSummary) -> usize| -> usize {
            self.reports.iter().map(|r| f(&r.summary)).sum()
        };

        let mut hasher = Sha256::new();
        for report in &self.reports {
            hasher.update(report.summary.fingerprint.as_bytes());
            hasher.update(b"\n");
        }

        ChangeSetSummary {
            category: "master".to_string(),
            key_field: self
                .reports
                .first()
                .map_or(KeyField::ProductId, |r| r.summary.key_field),
            captured_at: self.until,
            previous_captured_at: Some(self.since),
            current_count: sum(|s| s.current_count),
            previous_count: sum(|s| s.previous_count),
            new_count: self.reports.iter().map(|r| r.new.len()).sum(),
            changed_count: self.reports.iter().map(|r| r.changed.len()).sum(),
            removed_count: self.reports.iter().map(|r| r.removed.len()).sum(),
            unchanged_count: sum(|s| s.unchanged_count),
            cold_start: !self.reports.is_empty() && self.reports.iter().all(|r| r.summary.cold_start),
            fingerprint: hex::encode(hasher.finalize()),
        }
    }

    /// Per-category counts as CSV.
    pub fn totals_csv(&self) -> Result<Vec<u8>> {
        let mut wtr = csv_writer();
        wtr.write_record(["category", "runs", "new", "changed", "removed"])?;
        for t in self.totals() {
            wtr.write_record([
                t.category,
                t.runs.to_string(),
                t.new.to_string(),
                t.changed.to_string(),
                t.removed.to_string(),
            ])?;
        }
        finish(wtr)
    }

    /// `SUMMARY` plus the `NEW`/`CHANGES`/`REMOVED` sections of all reports.
    pub fn attachments(&self) -> Result<Vec<Attachment>> {
        let stem = format!("master_{}", self.until.format("%Y%m%d_%H%M"));
        let mut attachments = vec![Attachment::csv(format!("{stem}_SUMMARY.csv"), self.totals_csv()?)];
        attachments.extend(sections_to_attachments(&self.reports, &stem)?);
        Ok(attachments)
    }
}

/// Collect the reports of the last `hours` hours and notify the master report.
pub async fn run_aggregate(
    hours: u32,
    now: DateTime<Utc>,
    reports: &dyn ReportStore,
    notifier: &dyn Notifier,
) -> Result<MasterReport> {
    let since = Duration::try_hours(i64::from(hours))
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| AppError::validation(format!("aggregate window of {hours} hours is out of range")))?;
    let master = MasterReport::new(since, now, reports.load_reports_since(since).await?);

    let summary = master.summary();
    crate::utils::log::summary(
        &format!("Master report since {}", since.to_rfc3339()),
        &[
            ("Reports", master.reports.len().to_string()),
            ("New", summary.new_count.to_string()),
            ("Changed", summary.changed_count.to_string()),
            ("Removed", summary.removed_count.to_string()),
        ],
    );
    for t in master.totals() {
        crate::utils::log::sub_item(&format!(
            "{}: {} runs, {} new, {} changed, {} removed",
            t.category, t.runs, t.new, t.changed, t.removed
        ));
    }

    if master.reports.is_empty() {
        log::info!("No change reports in the last {} hours; nothing to send", hours);
        return Ok(master);
    }

    let subject = format!(
        "Master report ({}h): {} new, {} changed, {} removed",
        hours, summary.new_count, summary.changed_count, summary.removed_count
    );
    notifier.notify(&subject, &summary, &master.attachments()?).await?;
    Ok(master)
}
