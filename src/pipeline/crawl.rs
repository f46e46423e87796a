// src/pipeline/crawl.rs

//! Snapshot pipeline: crawl, compare, persist, notify.

use futures::stream::{self, StreamExt};

use crate::error::{AppError, Result};
use crate::models::{CategoryConfig, Config};
use crate::notify::{Attachment, Notifier};
use crate::pipeline::alerts::Watchlist;
use crate::pipeline::diff::{ChangeDetector, ChangeSetSummary};
use crate::pipeline::keys::KeyResolver;
use crate::report::ChangeReport;
use crate::services::ProductSource;
use crate::storage::{ReportStore, SnapshotSink, SnapshotSource};

/// Collaborators a run talks to.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub source: &'a dyn ProductSource,
    pub previous: &'a dyn SnapshotSource,
    pub sink: &'a dyn SnapshotSink,
    pub reports: &'a dyn ReportStore,
    pub notifier: &'a dyn Notifier,
}

/// Result of one category run.
#[derive(Debug, Clone)]
pub struct CategoryRun {
    pub summary: ChangeSetSummary,
    pub snapshot_key: String,
    pub report_key: String,
    pub notified: bool,
    pub alert_hits: usize,
}

/// Build the detector described by the configuration.
pub fn detector_from_config(config: &Config) -> ChangeDetector {
    ChangeDetector::with_tolerance(config.detector.tolerance)
        .with_resolver(KeyResolver::with_priority(config.detector.key_priority.clone()))
}

/// Run one category end to end.
///
/// The previous snapshot is looked up before the new one is stored, so a
/// run never compares a capture with itself.
pub async fn run_category(
    config: &Config,
    category: &CategoryConfig,
    ctx: RunContext<'_>,
) -> Result<CategoryRun> {
    log::info!("[{}] crawling {}", category.id, category.base_url);
    let outcome = ctx.source.fetch_category(category).await?;
    let current = outcome.snapshot;
    log::info!(
        "[{}] {} listings from {} pages ({} tiles, {} without key, {} repeated, {} failed pages)",
        category.id,
        current.len(),
        outcome.pages,
        outcome.tiles,
        outcome.keyless,
        outcome.repeated,
        outcome.page_failures
    );

    let previous = ctx.previous.load_latest_previous(&category.id).await?;
    let changes = detector_from_config(config).detect(previous.as_ref(), &current);
    let summary = changes.summary(previous.as_ref(), &current);
    if changes.duplicate_keys > 0 {
        log::warn!(
            "[{}] {} records shared a {} with an earlier record",
            category.id,
            changes.duplicate_keys,
            changes.key_field
        );
    }

    let snapshot_key = ctx.sink.store(&category.id, &current).await?;
    let report = ChangeReport::new(&changes, summary.clone());
    let report_key = ctx.reports.store_report(&report).await?;

    crate::utils::log::summary(&summary.headline(), &summary.items());

    let stem = format!(
        "{}_{}",
        category.id,
        summary.captured_at.format("%Y%m%d_%H%M%S")
    );

    let notified = summary.has_changes() || config.notify.notify_without_changes;
    if notified {
        let mut attachments = if config.notify.attach_csv {
            report.attachments(&stem)?
        } else {
            Vec::new()
        };
        attachments.push(Attachment::json(
            format!("{stem}_changes.json"),
            serde_json::to_vec_pretty(&report)?,
        ));
        ctx.notifier
            .notify(&summary.headline(), &summary, &attachments)
            .await?;
    }

    let watchlist = Watchlist::from_config(&config.notify);
    let mut alert_hits = 0;
    if !watchlist.is_empty() {
        log::debug!("[{}] checking watchlist: {}", category.id, watchlist.brands().join(", "));
        let hits = watchlist.filter(&report);
        alert_hits = hits.new.len() + hits.changed.len();
        if alert_hits > 0 {
            let subject = format!(
                "[Alert] {}: {} new, {} changed on watchlist",
                category.id,
                hits.new.len(),
                hits.changed.len()
            );
            let attachments = hits.attachments(&format!("alerts_{}", category.id))?;
            ctx.notifier.notify(&subject, &summary, &attachments).await?;
        }
    }

    Ok(CategoryRun {
        summary,
        snapshot_key,
        report_key,
        notified,
        alert_hits,
    })
}

/// Run every given category, at most `crawler.max_concurrent` at a time.
///
/// A failing category does not stop the others; the run fails afterwards
/// if any category did.
pub async fn run_crawler(
    config: &Config,
    categories: &[CategoryConfig],
    ctx: RunContext<'_>,
) -> Result<Vec<CategoryRun>> {
    crate::utils::log::header(&format!("Snapshot run: {} categories", categories.len()));

    let concurrency = config.crawler.max_concurrent.max(1);
    let mut results = stream::iter(categories)
        .map(|category| async move { (category, run_category(config, category, ctx).await) })
        .buffer_unordered(concurrency);

    let mut runs = Vec::new();
    let mut failed = Vec::new();
    while let Some((category, result)) = results.next().await {
        match result {
            Ok(run) => runs.push(run),
            Err(error) => {
                log::error!("[{}] run failed: {}", category.id, error);
                failed.push(category.id.clone());
            }
        }
    }

    runs.sort_by(|a, b| a.summary.category.cmp(&b.summary.category));
    crate::utils::log::summary(
        "Snapshot run complete",
        &[
            ("Categories", categories.len().to_string()),
            ("Succeeded", runs.len().to_string()),
            ("Failed", failed.len().to_string()),
            (
                "Changes",
                runs.iter()
                    .map(|r| r.summary.new_count + r.summary.changed_count + r.summary.removed_count)
                    .sum::<usize>()
                    .to_string(),
            ),
        ],
    );

    if !failed.is_empty() {
        return Err(AppError::crawl(
            "run",
            format!("{} of {} categories failed: {}", failed.len(), categories.len(), failed.join(", ")),
        ));
    }
    Ok(runs)
}
