// src/models/mod.rs

//! Domain models for the snapshot application.
//!
//! This module contains the captured data (records and snapshots) and the
//! configuration that drives a run.

mod config;
pub mod product;
mod selectors;
mod snapshot;

// Re-export all public types
pub use config::{
    CategoryConfig, Config, CrawlerConfig, DetectorConfig, LoggingConfig, NotifyConfig,
    Pagination, PathsConfig,
};
pub use product::{ProductRecord, derive_discount, infer_gender, parse_price};
pub use selectors::{CompiledTileSelectors, TileSelectors};
pub use snapshot::Snapshot;
