// src/services/catalog.rs

//! Category crawler service.
//!
//! Walks a category's listing pages (`start`/`sz` offsets or a page
//! number parameter) and collects the parsed tiles into one `Snapshot`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::{HeaderMap, USER_AGENT};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{CategoryConfig, CrawlerConfig, ProductRecord, Snapshot, TileSelectors, infer_gender};
use crate::services::tiles::TileParser;
use crate::utils::http::{create_async_client, retry_after};

/// Summary of one category crawl.
#[derive(Debug)]
pub struct CrawlOutcome {
    pub snapshot: Snapshot,
    pub pages: u32,
    pub tiles: usize,
    /// Tiles with neither a product id nor a link
    pub keyless: usize,
    /// Tiles already seen on an earlier page
    pub repeated: usize,
    pub page_failures: u32,
}

/// Produces the current snapshot of a category.
#[async_trait]
pub trait ProductSource: Send + Sync {
    async fn fetch_category(&self, category: &CategoryConfig) -> Result<CrawlOutcome>;
}

/// Fetches listing pages over HTTP.
pub struct CatalogCrawler {
    config: CrawlerConfig,
    client: Client,
    parser: TileParser,
    ua_cursor: AtomicUsize,
}

impl CatalogCrawler {
    /// Create a new crawler with the given configuration.
    pub fn new(config: CrawlerConfig, selectors: &TileSelectors) -> Result<Self> {
        let client = create_async_client(&config)?;
        let parser = TileParser::new(selectors, config.default_currency.clone())?;
        Ok(Self {
            config,
            client,
            parser,
            ua_cursor: AtomicUsize::new(0),
        })
    }

    fn next_user_agent(&self) -> &str {
        let agents = &self.config.user_agents;
        if agents.is_empty() {
            return "";
        }
        let idx = self.ua_cursor.fetch_add(1, Ordering::Relaxed) % agents.len();
        &agents[idx]
    }

    /// Page sizes to try for one page: the configured size, then the
    /// fallbacks that differ from it. Page-number listings get one try.
    fn page_sizes(&self, category: &CategoryConfig) -> Vec<u32> {
        let mut sizes = vec![category.page_size];
        if !category.has_page_size() {
            return sizes;
        }
        for size in &self.config.fallback_page_sizes {
            if *size > 0 && !sizes.contains(size) {
                sizes.push(*size);
            }
        }
        sizes
    }

    /// Wait before the next attempt: the server's `Retry-After`, capped at
    /// `max_retry_after_secs`, else the backoff.
    fn retry_wait(&self, headers: &HeaderMap, backoff: Duration) -> Duration {
        let cap = Duration::from_secs(self.config.max_retry_after_secs);
        retry_after(headers).map_or(backoff, |wait| wait.min(cap))
    }

    /// Fetch a single URL, retrying throttled and transient failures.
    async fn fetch_with_retry(&self, url: &Url) -> Result<(String, Url)> {
        let attempts = self.config.max_retries + 1;
        let mut last_error = None;

        for attempt in 0..attempts {
            let backoff = Duration::from_millis(
                self.config.retry_backoff_ms.saturating_mul(1 << attempt.min(6)),
            );
            let request = self
                .client
                .get(url.clone())
                .header(USER_AGENT, self.next_user_agent());

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let final_url = response.url().clone();
                        return Ok((response.text().await?, final_url));
                    }
                    let error = AppError::crawl(url.as_str(), format!("HTTP {status}"));
                    if !self.config.retry_statuses.contains(&status.as_u16()) {
                        return Err(error);
                    }
                    let wait = self.retry_wait(response.headers(), backoff);
                    log::warn!(
                        "{} returned {}; retry {}/{} in {:.1}s",
                        url,
                        status,
                        attempt + 1,
                        self.config.max_retries,
                        wait.as_secs_f64()
                    );
                    last_error = Some(error);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(wait).await;
                    }
                }
                Err(e) => {
                    log::warn!("Request to {} failed: {}", url, e);
                    last_error = Some(e.into());
                    if attempt + 1 < attempts {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::crawl(url.as_str(), "no attempts made")))
    }

    /// Fetch one listing page, falling back to smaller page sizes.
    async fn fetch_page(&self, category: &CategoryConfig, page_idx: u32) -> Result<(String, Url)> {
        let mut last_error = None;
        for size in self.page_sizes(category) {
            let url = category.page_url(page_idx, size)?;
            match self.fetch_with_retry(&url).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    log::warn!("[{}] {} failed: {}", category.id, url, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| AppError::crawl(&category.id, "no page sizes to try")))
    }

    async fn pause_after(&self, pages_done: u32) {
        let mut delay = Duration::from_millis(self.config.request_delay_ms);
        let every = self.config.long_pause_every;
        if every > 0 && pages_done % every == 0 {
            log::info!("Long pause after {} pages", pages_done);
            delay += Duration::from_millis(self.config.long_pause_ms);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Crawl a category, stamping every record with `captured_at`.
    pub async fn crawl(
        &self,
        category: &CategoryConfig,
        captured_at: DateTime<Utc>,
    ) -> Result<CrawlOutcome> {
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let mut outcome = CrawlOutcome {
            snapshot: Snapshot::new(&category.id, captured_at, Vec::new()),
            pages: 0,
            tiles: 0,
            keyless: 0,
            repeated: 0,
            page_failures: 0,
        };

        let mut empty_streak = 0;

        for page_idx in 0..category.max_pages {
            outcome.pages += 1;
            match self.fetch_page(category, page_idx).await {
                Ok((html, real_url)) => {
                    let page = self.parser.parse_page(&html, &real_url, page_idx, captured_at);
                    outcome.tiles += page.tiles;

                    let mut fresh = 0;
                    for mut record in page.records {
                        let Some(identity) = record.identity().map(str::to_string) else {
                            outcome.keyless += 1;
                            continue;
                        };
                        if !seen.insert(identity) {
                            outcome.repeated += 1;
                            continue;
                        }
                        apply_category(&mut record, category);
                        records.push(record);
                        fresh += 1;
                    }

                    log::info!(
                        "[{}] page {} ({}): tiles={}, new={}",
                        category.id,
                        page_idx,
                        real_url,
                        page.tiles,
                        fresh
                    );

                    if fresh == 0 {
                        empty_streak += 1;
                    } else {
                        empty_streak = 0;
                    }
                }
                Err(e) => {
                    log::warn!("[{}] page {} failed: {}", category.id, page_idx, e);
                    outcome.page_failures += 1;
                    empty_streak += 1;
                }
            }

            if empty_streak >= self.config.stop_after_empty {
                log::info!("[{}] stopping after {} empty pages", category.id, empty_streak);
                break;
            }

            self.pause_after(page_idx + 1).await;
        }

        if records.is_empty() && outcome.page_failures > 0 && outcome.tiles == 0 {
            return Err(AppError::crawl(
                &category.id,
                format!("all {} page requests failed", outcome.page_failures),
            ));
        }

        outcome.snapshot = Snapshot::new(&category.id, captured_at, records);
        Ok(outcome)
    }
}

/// Stamp category-level settings on a freshly parsed record.
fn apply_category(record: &mut ProductRecord, category: &CategoryConfig) {
    if category.omit_image_url {
        record.image_url = None;
    }
    if record.brand.is_none() {
        record.brand = category.default_brand.clone();
    }
    record.gender = category.gender.clone().or_else(|| {
        infer_gender(
            record.url.as_deref(),
            record.category.as_deref(),
            record.name.as_deref(),
        )
        .map(str::to_string)
    });
}

#[async_trait]
impl ProductSource for CatalogCrawler {
    async fn fetch_category(&self, category: &CategoryConfig) -> Result<CrawlOutcome> {
        self.crawl(category, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Pagination;

    fn crawler(config: CrawlerConfig) -> CatalogCrawler {
        CatalogCrawler::new(config, &TileSelectors::default()).unwrap()
    }

    #[test]
    fn test_page_sizes_dedupes_configured() {
        let c = crawler(CrawlerConfig::default());
        let mut category = CategoryConfig::new("ofertas", "https://example.com/ofertas/");
        assert_eq!(c.page_sizes(&category), vec![200, 120, 80]);
        category.page_size = 48;
        assert_eq!(c.page_sizes(&category), vec![48, 200, 120, 80]);
    }

    #[test]
    fn test_retry_after_is_capped() {
        use reqwest::header::{HeaderValue, RETRY_AFTER};

        let c = crawler(CrawlerConfig {
            max_retry_after_secs: 60,
            ..CrawlerConfig::default()
        });
        let backoff = Duration::from_millis(1200);

        let mut headers = HeaderMap::new();
        assert_eq!(c.retry_wait(&headers, backoff), backoff);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("86400"));
        assert_eq!(c.retry_wait(&headers, backoff), Duration::from_secs(60));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("100000000000000000000"));
        assert_eq!(c.retry_wait(&headers, backoff), backoff);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("5"));
        assert_eq!(c.retry_wait(&headers, backoff), Duration::from_secs(5));
    }

    #[test]
    fn test_page_number_listing_has_no_size_fallback() {
        let c = crawler(CrawlerConfig::default());
        let category = CategoryConfig {
            pagination: Pagination::Page,
            ..CategoryConfig::new("ad_mujer", "https://example.com/search")
        };
        assert_eq!(c.page_sizes(&category), vec![200]);
    }

    #[test]
    fn test_apply_category_forces_or_infers_gender() {
        let mut category = CategoryConfig::new("ad", "https://example.com/search");
        category.default_brand = Some("Adolfo Domínguez".into());

        let mut record = ProductRecord::new(Utc::now());
        record.url = Some("https://example.com/es-mx/hombre/camisa-1.html".into());
        apply_category(&mut record, &category);
        assert_eq!(record.gender.as_deref(), Some("hombre"));
        assert_eq!(record.brand.as_deref(), Some("Adolfo Domínguez"));

        category.gender = Some("mujer".into());
        category.omit_image_url = true;
        record.brand = Some("AD Basics".into());
        record.image_url = Some("https://cdn.example.com/1.jpg".into());
        apply_category(&mut record, &category);
        assert_eq!(record.gender.as_deref(), Some("mujer"));
        assert_eq!(record.brand.as_deref(), Some("AD Basics"));
        assert_eq!(record.image_url, None);
    }

    #[test]
    fn test_user_agents_rotate() {
        let config = CrawlerConfig {
            user_agents: vec!["a".into(), "b".into()],
            ..CrawlerConfig::default()
        };
        let c = crawler(config);
        assert_eq!(c.next_user_agent(), "a");
        assert_eq!(c.next_user_agent(), "b");
        assert_eq!(c.next_user_agent(), "a");
    }

    #[tokio::test]
    async fn test_unreachable_category_is_an_error() {
        let config = CrawlerConfig {
            max_retries: 0,
            request_delay_ms: 0,
            fallback_page_sizes: Vec::new(),
            connect_timeout_secs: 1,
            timeout_secs: 1,
            ..CrawlerConfig::default()
        };
        let category = CategoryConfig {
            page_size: 10,
            page_step: 10,
            max_pages: 3,
            ..CategoryConfig::new("nowhere", "http://127.0.0.1:9/listing/")
        };
        let err = crawler(config)
            .crawl(&category, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Crawl { .. }));
    }
}
