//! Application configuration structures.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::TileSelectors;
use crate::notify::split_recipients;
use crate::pipeline::keys::KeyField;
use crate::utils::{page_url, sanitize_file_component};

/// Longest window `aggregate` accepts from the configuration (one year).
const MAX_AGGREGATE_HOURS: u32 = 24 * 366;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP, pacing and retry settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Change detection settings
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Selector fallback chains for product tiles
    #[serde(default)]
    pub tiles: TileSelectors,

    /// Categories to snapshot
    #[serde(default = "defaults::categories")]
    pub categories: Vec<CategoryConfig>,

    /// Report and alert delivery
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Output locations
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Apply `EMAIL_TO` and `ALERT_BRANDS` from the environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var("EMAIL_TO").ok(),
            std::env::var("ALERT_BRANDS").ok(),
        );
    }

    fn apply_overrides(&mut self, email_to: Option<String>, alert_brands: Option<String>) {
        if let Some(raw) = email_to.filter(|s| !s.trim().is_empty()) {
            self.notify.recipients = split_recipients(&raw);
        }
        if let Some(raw) = alert_brands.filter(|s| !s.trim().is_empty()) {
            let mut brands: Vec<String> = Vec::new();
            for brand in split_recipients(&raw) {
                let brand = brand.to_lowercase();
                if !brands.contains(&brand) {
                    brands.push(brand);
                }
            }
            self.notify.watchlist_brands = brands;
        }
    }

    /// Find a category by id.
    pub fn category(&self, id: &str) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agents.iter().all(|ua| ua.trim().is_empty()) {
            return Err(AppError::validation("crawler.user_agents is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::validation("crawler.max_concurrent must be > 0"));
        }
        if self.crawler.stop_after_empty == 0 {
            return Err(AppError::validation("crawler.stop_after_empty must be > 0"));
        }
        if !self.detector.tolerance.is_finite() || self.detector.tolerance < 0.0 {
            return Err(AppError::validation(
                "detector.tolerance must be a non-negative number",
            ));
        }
        if self.notify.aggregate_hours == 0 || self.notify.aggregate_hours > MAX_AGGREGATE_HOURS {
            return Err(AppError::validation(format!(
                "notify.aggregate_hours must be between 1 and {MAX_AGGREGATE_HOURS}"
            )));
        }
        if self.categories.is_empty() {
            return Err(AppError::validation("No categories defined"));
        }

        // Storage directories use the sanitized id, so compare on that.
        let mut seen = HashSet::new();
        for category in &self.categories {
            let dir = sanitize_file_component(&category.id);
            if dir.is_empty() {
                return Err(AppError::validation(format!(
                    "category id '{}' is empty",
                    category.id
                )));
            }
            if !seen.insert(dir.clone()) {
                return Err(AppError::validation(format!(
                    "category id '{}' collides with another category (stored as '{dir}')",
                    category.id
                )));
            }
            Url::parse(&category.base_url).map_err(|e| {
                AppError::validation(format!("category '{}' base_url: {e}", category.id))
            })?;
            if category.page_size == 0 || category.page_step == 0 || category.max_pages == 0 {
                return Err(AppError::validation(format!(
                    "category '{}' needs page_size, page_step and max_pages > 0",
                    category.id
                )));
            }
            if category.pagination == Pagination::Page && category.page_param.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "category '{}' needs a page_param",
                    category.id
                )));
            }
        }

        self.tiles.compile()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawler: CrawlerConfig::default(),
            detector: DetectorConfig::default(),
            tiles: TileSelectors::default(),
            categories: defaults::categories(),
            notify: NotifyConfig::default(),
            paths: PathsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// HTTP client, pacing and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent headers, rotated per request
    #[serde(default = "defaults::user_agents")]
    pub user_agents: Vec<String>,

    #[serde(default = "defaults::accept_language")]
    pub accept_language: String,

    /// Connect timeout in seconds
    #[serde(default = "defaults::connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Overall request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Delay between page requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Take a longer pause after this many pages (0 disables)
    #[serde(default = "defaults::long_pause_every")]
    pub long_pause_every: u32,

    #[serde(default = "defaults::long_pause")]
    pub long_pause_ms: u64,

    /// Retries per request after the first attempt
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "defaults::retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Upper bound on a server-requested `Retry-After` wait
    #[serde(default = "defaults::max_retry_after")]
    pub max_retry_after_secs: u64,

    /// HTTP statuses worth retrying
    #[serde(default = "defaults::retry_statuses")]
    pub retry_statuses: Vec<u16>,

    /// Page sizes tried when the configured size keeps failing
    #[serde(default = "defaults::fallback_page_sizes")]
    pub fallback_page_sizes: Vec<u32>,

    /// Stop a category after this many consecutive empty or failed pages
    #[serde(default = "defaults::stop_after_empty")]
    pub stop_after_empty: u32,

    /// Categories crawled at the same time
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Currency assumed when a tile does not state one
    #[serde(default = "defaults::currency")]
    pub default_currency: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agents: defaults::user_agents(),
            accept_language: defaults::accept_language(),
            connect_timeout_secs: defaults::connect_timeout(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            long_pause_every: defaults::long_pause_every(),
            long_pause_ms: defaults::long_pause(),
            max_retries: defaults::max_retries(),
            retry_backoff_ms: defaults::retry_backoff(),
            max_retry_after_secs: defaults::max_retry_after(),
            retry_statuses: defaults::retry_statuses(),
            fallback_page_sizes: defaults::fallback_page_sizes(),
            stop_after_empty: defaults::stop_after_empty(),
            max_concurrent: defaults::max_concurrent(),
            default_currency: defaults::currency(),
        }
    }
}

/// Change detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Absolute tolerance for price and discount fields
    #[serde(default = "defaults::tolerance")]
    pub tolerance: f64,

    /// Join key candidates in order of preference
    #[serde(default = "defaults::key_priority")]
    pub key_priority: Vec<KeyField>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            tolerance: defaults::tolerance(),
            key_priority: defaults::key_priority(),
        }
    }
}

/// How listing pages are addressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pagination {
    /// `start=<offset>&sz=<page size>`
    #[default]
    Offset,
    /// `<page_param>=<page number>`
    Page,
}

/// One listing category to snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryConfig {
    /// Identifier, also used as the storage prefix
    pub id: String,

    /// First listing page
    pub base_url: String,

    #[serde(default)]
    pub pagination: Pagination,

    /// Offset of the first page, or its page number with `pagination = "page"`
    #[serde(default)]
    pub start: u32,

    /// Tiles requested per page (`sz`)
    #[serde(default = "defaults::page_size")]
    pub page_size: u32,

    /// Offset increment between pages (`start`)
    #[serde(default = "defaults::page_step")]
    pub page_step: u32,

    #[serde(default = "defaults::max_pages")]
    pub max_pages: u32,

    /// Query parameter carrying the page number
    #[serde(default = "defaults::page_param")]
    pub page_param: String,

    /// Fixed query parameters added to every page request
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,

    /// Gender stamped on every record instead of inferring it
    #[serde(default)]
    pub gender: Option<String>,

    /// Brand used for tiles that do not name one
    #[serde(default)]
    pub default_brand: Option<String>,

    /// Do not store image links for this category
    #[serde(default)]
    pub omit_image_url: bool,
}

impl CategoryConfig {
    /// Offset-paginated category with default paging.
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            pagination: Pagination::default(),
            start: 0,
            page_size: defaults::page_size(),
            page_step: defaults::page_step(),
            max_pages: defaults::max_pages(),
            page_param: defaults::page_param(),
            extra_params: BTreeMap::new(),
            gender: None,
            default_brand: None,
            omit_image_url: false,
        }
    }

    /// Whether requests carry a page size that can be lowered on failure.
    pub fn has_page_size(&self) -> bool {
        self.pagination == Pagination::Offset
    }

    /// URL of the `page_idx`-th listing page (zero-based).
    pub fn page_url(&self, page_idx: u32, page_size: u32) -> Result<Url> {
        let mut params: Vec<(String, String)> = self
            .extra_params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        match self.pagination {
            Pagination::Offset => {
                let start = self
                    .start
                    .saturating_add(page_idx.saturating_mul(self.page_step));
                params.push(("start".into(), start.to_string()));
                params.push(("sz".into(), page_size.to_string()));
            }
            Pagination::Page => {
                let page = self.start.saturating_add(page_idx);
                params.push((self.page_param.clone(), page.to_string()));
            }
        }

        Ok(page_url(&self.base_url, &params)?)
    }
}

/// Report and alert delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub recipients: Vec<String>,

    #[serde(default = "defaults::subject_prefix")]
    pub subject_prefix: String,

    /// Lower-cased brand names that trigger an immediate alert
    #[serde(default)]
    pub watchlist_brands: Vec<String>,

    /// Minimum discount (percent) for a watchlist hit
    #[serde(default)]
    pub alert_min_discount: f64,

    /// Attach NEW/CHANGES/REMOVED CSV files
    #[serde(default = "defaults::yes")]
    pub attach_csv: bool,

    /// Send the category report even when nothing changed
    #[serde(default)]
    pub notify_without_changes: bool,

    /// Window used by `aggregate` when no value is given
    #[serde(default = "defaults::aggregate_hours")]
    pub aggregate_hours: u32,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            subject_prefix: defaults::subject_prefix(),
            watchlist_brands: Vec::new(),
            alert_min_discount: 0.0,
            attach_csv: true,
            notify_without_changes: false,
            aggregate_hours: defaults::aggregate_hours(),
        }
    }
}

/// Output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root for snapshots and change reports
    #[serde(default = "defaults::storage_dir")]
    pub storage_dir: PathBuf,

    /// Root for queued messages
    #[serde(default = "defaults::outbox_dir")]
    pub outbox_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            storage_dir: defaults::storage_dir(),
            outbox_dir: defaults::outbox_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::CategoryConfig;
    use crate::pipeline::compare::DEFAULT_TOLERANCE;
    use crate::pipeline::keys::KeyField;

    // Crawler defaults
    pub fn user_agents() -> Vec<String> {
        vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".into(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15".into(),
            "Mozilla/5.0 (X11; Linux x86_64; rv:122.0) Gecko/20100101 Firefox/122.0".into(),
        ]
    }
    pub fn accept_language() -> String {
        "es-MX,es;q=0.9,en;q=0.8".into()
    }
    pub fn connect_timeout() -> u64 {
        20
    }
    pub fn timeout() -> u64 {
        180
    }
    pub fn request_delay() -> u64 {
        150
    }
    pub fn long_pause_every() -> u32 {
        15
    }
    pub fn long_pause() -> u64 {
        2500
    }
    pub fn max_retries() -> u32 {
        3
    }
    pub fn retry_backoff() -> u64 {
        1200
    }
    pub fn max_retry_after() -> u64 {
        120
    }
    pub fn retry_statuses() -> Vec<u16> {
        vec![429, 500, 502, 503, 504, 520, 522, 523, 524]
    }
    pub fn fallback_page_sizes() -> Vec<u32> {
        vec![200, 120, 80]
    }
    pub fn stop_after_empty() -> u32 {
        1
    }
    pub fn max_concurrent() -> usize {
        2
    }
    pub fn currency() -> String {
        "MXN".into()
    }

    // Detector defaults
    pub fn tolerance() -> f64 {
        DEFAULT_TOLERANCE
    }
    pub fn key_priority() -> Vec<KeyField> {
        vec![KeyField::ProductId, KeyField::Sku, KeyField::Url]
    }

    // Category defaults
    pub fn page_size() -> u32 {
        200
    }
    pub fn page_step() -> u32 {
        200
    }
    pub fn max_pages() -> u32 {
        200
    }
    pub fn page_param() -> String {
        "page".into()
    }
    pub fn categories() -> Vec<CategoryConfig> {
        let category = |id: &str, path: &str, step: u32, max_pages: u32| CategoryConfig {
            page_step: step,
            max_pages,
            ..CategoryConfig::new(id, format!("https://www.elpalaciodehierro.com/{path}/"))
        };
        vec![
            category("ofertas", "ofertas", 201, 200),
            category("electronica", "electronica", 201, 400),
            category("deportes", "deportes", 201, 800),
            category("productos-liquidacion", "productos-liquidacion", 201, 80),
        ]
    }

    // Notify defaults
    pub fn subject_prefix() -> String {
        "[Scraper]".into()
    }
    pub fn yes() -> bool {
        true
    }
    pub fn aggregate_hours() -> u32 {
        15
    }

    // Path defaults
    pub fn storage_dir() -> PathBuf {
        PathBuf::from("out")
    }
    pub fn outbox_dir() -> PathBuf {
        PathBuf::from("out/outbox")
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_negative_tolerance() {
        let mut config = Config::default();
        config.detector.tolerance = -0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_categories() {
        let mut config = Config::default();
        let first = config.categories[0].clone();
        config.categories.push(first);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_bounds_aggregate_window() {
        let mut config = Config::default();
        config.notify.aggregate_hours = 0;
        assert!(config.validate().is_err());
        config.notify.aggregate_hours = u32::MAX;
        assert!(config.validate().is_err());
        config.notify.aggregate_hours = 24;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_base_url() {
        let mut config = Config::default();
        config.categories[0].base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [detector]
            tolerance = 0.5
            key_priority = ["url", "product_id"]

            [[categories]]
            id = "hogar"
            base_url = "https://example.com/hogar/"
            page_step = 201
            "#,
        )
        .unwrap();

        assert_eq!(config.detector.tolerance, 0.5);
        assert_eq!(config.detector.key_priority, vec![KeyField::Url, KeyField::ProductId]);
        assert_eq!(config.categories.len(), 1);
        assert_eq!(config.categories[0].page_size, 200);
        assert_eq!(config.crawler.max_retries, 3);
        assert!(config.notify.attach_csv);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_split_and_dedupe() {
        let mut config = Config::default();
        config.apply_overrides(
            Some("a@example.com; b@example.com".into()),
            Some("Samsung, Polo Ralph Lauren;samsung".into()),
        );
        assert_eq!(config.notify.recipients.len(), 2);
        assert_eq!(
            config.notify.watchlist_brands,
            vec!["samsung".to_string(), "polo ralph lauren".to_string()]
        );
    }

    #[test]
    fn empty_env_leaves_config_alone() {
        let mut config = Config::default();
        config.notify.recipients = vec!["x@example.com".into()];
        config.apply_overrides(Some("  ".into()), None);
        assert_eq!(config.notify.recipients, vec!["x@example.com".to_string()]);
    }

    #[test]
    fn validate_rejects_ids_sharing_a_storage_dir() {
        let mut config = Config::default();
        config.categories = vec![
            CategoryConfig::new("más vendido", "https://example.com/a/"),
            CategoryConfig::new("más_vendido", "https://example.com/b/"),
        ];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("más_vendido"));
    }

    #[test]
    fn offset_page_urls() {
        let category = CategoryConfig {
            start: 1,
            page_step: 201,
            ..CategoryConfig::new("ofertas", "https://example.com/ofertas/?lang=es")
        };
        assert_eq!(
            category.page_url(0, 200).unwrap().as_str(),
            "https://example.com/ofertas/?lang=es&start=1&sz=200"
        );
        assert_eq!(
            category.page_url(2, 120).unwrap().as_str(),
            "https://example.com/ofertas/?lang=es&start=403&sz=120"
        );
        assert!(category.has_page_size());
    }

    #[test]
    fn page_number_urls_from_toml() {
        let config: Config = toml::from_str(
            r#"
            [[categories]]
            id = "ad_mujer"
            base_url = "https://shop.example.com/es-mx/search?page=9"
            pagination = "page"
            start = 1
            max_pages = 100
            gender = "mujer"
            default_brand = "Adolfo Domínguez"

            [categories.extra_params]
            q = "mujer"
            lang = "null"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());

        let category = &config.categories[0];
        assert_eq!(category.pagination, Pagination::Page);
        assert!(!category.has_page_size());
        assert_eq!(
            category.page_url(0, 200).unwrap().as_str(),
            "https://shop.example.com/es-mx/search?lang=null&q=mujer&page=1"
        );
        assert_eq!(
            category.page_url(4, 200).unwrap().as_str(),
            "https://shop.example.com/es-mx/search?lang=null&q=mujer&page=5"
        );
    }

    #[test]
    fn validate_rejects_blank_page_param() {
        let mut config = Config::default();
        config.categories[0].pagination = Pagination::Page;
        config.categories[0].page_param = " ".into();
        assert!(config.validate().is_err());
    }
}
