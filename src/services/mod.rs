//! Service layer for the snapshot application.
//!
//! This module contains the business logic for:
//! - Listing page crawling (`CatalogCrawler`)
//! - Product tile parsing (`TileParser`)

mod catalog;
pub mod tiles;

pub use catalog::{CatalogCrawler, CrawlOutcome, ProductSource};
pub use tiles::{ParsedPage, TileParser};
