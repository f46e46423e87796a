//! Shelfwatch CLI
//!
//! Local execution entry point.

use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, Subcommand};
use shelfwatch::{
    config::load_config,
    error::{AppError, Result},
    models::{CategoryConfig, Config, Snapshot},
    notify::{LogNotifier, Notifier, OutboxNotifier},
    pipeline::{self, RunContext},
    report::ChangeReport,
    services::CatalogCrawler,
    storage::{LocalStorage, SnapshotSource},
};

/// Shelfwatch - retail listing snapshots and change reports
#[derive(Parser, Debug)]
#[command(
    name = "shelfwatch",
    version,
    about = "Snapshots retail category listings and reports what changed"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl categories, compare with the previous snapshot and notify
    Crawl {
        /// Category ids to crawl (default: all configured)
        #[arg(short = 'C', long = "category")]
        categories: Vec<String>,
    },

    /// Compare two stored snapshot files
    Diff {
        previous: PathBuf,
        current: PathBuf,

        /// Absolute tolerance for prices and discounts
        #[arg(long)]
        tolerance: Option<f64>,

        /// Write NEW/CHANGES/REMOVED CSV files to this directory
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Send one master report over recent change reports
    Aggregate {
        /// Window in hours (default: notify.aggregate_hours)
        #[arg(long)]
        hours: Option<u32>,
    },

    /// Validate the configuration file
    Validate,

    /// Show configured categories and their stored snapshots
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, default_level: &str) {
    let level = if verbose { "debug" } else { default_level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn notifier(config: &Config) -> Box<dyn Notifier> {
    if config.notify.recipients.is_empty() {
        log::info!("No recipients configured; reports go to the log only");
        Box::new(LogNotifier)
    } else {
        Box::new(OutboxNotifier::new(
            &config.paths.outbox_dir,
            config.notify.recipients.clone(),
            config.notify.subject_prefix.clone(),
        ))
    }
}

fn select_categories(config: &Config, ids: &[String]) -> Result<Vec<CategoryConfig>> {
    if ids.is_empty() {
        return Ok(config.categories.clone());
    }
    ids.iter()
        .map(|id| {
            config
                .category(id)
                .cloned()
                .ok_or_else(|| AppError::config(format!("unknown category '{id}'")))
        })
        .collect()
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let content = std::fs::read_to_string(path)?;
    let snapshot: Snapshot = serde_json::from_str(&content)?;
    // Re-normalize in case the file was edited by hand.
    Ok(Snapshot::new(snapshot.category, snapshot.captured_at, snapshot.records))
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Validation reports its own errors, everything else needs a valid config.
    let config = match cli.command {
        Command::Validate => Config::load_or_default(&cli.config),
        _ => match load_config(&cli.config) {
            Ok(config) => config,
            Err(e) => {
                init_logging(cli.verbose, "info");
                log::error!("Config error in {}: {}", cli.config.display(), e);
                return Err(e);
            }
        },
    };
    init_logging(cli.verbose, &config.logging.level);

    log::info!("Shelfwatch starting...");
    let storage = LocalStorage::new(&config.paths.storage_dir);

    match cli.command {
        Command::Crawl { categories } => {
            let categories = select_categories(&config, &categories)?;
            let crawler = CatalogCrawler::new(config.crawler.clone(), &config.tiles)?;
            let notifier = notifier(&config);
            let ctx = RunContext {
                source: &crawler,
                previous: &storage,
                sink: &storage,
                reports: &storage,
                notifier: notifier.as_ref(),
            };

            let runs = pipeline::run_crawler(&config, &categories, ctx).await?;
            for run in &runs {
                log::info!(
                    "{} -> {} ({} alert hits)",
                    run.summary.headline(),
                    run.snapshot_key,
                    run.alert_hits
                );
            }
            log::info!("Crawl complete!");
        }

        Command::Diff {
            previous,
            current,
            tolerance,
            csv,
        } => {
            let previous = read_snapshot(&previous)?;
            let current = read_snapshot(&current)?;
            if previous.category != current.category {
                log::warn!(
                    "Comparing different categories: '{}' vs '{}'",
                    previous.category,
                    current.category
                );
            }

            let mut detector = pipeline::crawl::detector_from_config(&config);
            if let Some(tolerance) = tolerance {
                detector = pipeline::ChangeDetector::with_tolerance(tolerance).with_resolver(
                    pipeline::KeyResolver::with_priority(config.detector.key_priority.clone()),
                );
            }

            let changes = detector.detect(Some(&previous), &current);
            let summary = changes.summary(Some(&previous), &current);
            shelfwatch::utils::log::summary(&summary.headline(), &summary.items());

            if let Some(dir) = csv {
                let report = ChangeReport::new(&changes, summary.clone());
                let stem = format!(
                    "{}_{}",
                    summary.category,
                    summary.captured_at.format("%Y%m%d_%H%M%S")
                );
                std::fs::create_dir_all(&dir)?;
                for attachment in report.attachments(&stem)? {
                    let path = dir.join(&attachment.file_name);
                    std::fs::write(&path, &attachment.bytes)?;
                    shelfwatch::utils::log::sub_item(&format!("wrote {}", path.display()));
                }
            }
        }

        Command::Aggregate { hours } => {
            let hours = hours.unwrap_or(config.notify.aggregate_hours);
            let notifier = notifier(&config);
            let master =
                pipeline::run_aggregate(hours, Utc::now(), &storage, notifier.as_ref()).await?;
            log::info!("Aggregated {} change reports", master.reports.len());
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!(
                "✓ Config OK ({} categories, {} watched brands)",
                config.categories.len(),
                config.notify.watchlist_brands.len()
            );

            log::info!("All validations passed!");
        }

        Command::Info => {
            log::info!("Storage directory: {}", storage.root_dir().display());
            log::info!("Outbox directory: {}", config.paths.outbox_dir.display());

            for category in &config.categories {
                let count = storage.snapshot_count(&category.id).await?;
                match storage.load_latest_previous(&category.id).await? {
                    Some(latest) => log::info!(
                        "{}: {} snapshots, latest {} with {} listings",
                        category.id,
                        count,
                        latest.captured_at.to_rfc3339(),
                        latest.len()
                    ),
                    None => log::info!("{}: no snapshot yet ({})", category.id, category.base_url),
                }
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
