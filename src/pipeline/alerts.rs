// src/pipeline/alerts.rs

//! Brand watchlist alerts.
//!
//! A watchlist hit is a new or changed listing whose brand or name
//! mentions a watched brand and which currently carries a discount of at
//! least the configured threshold.

use crate::models::{NotifyConfig, ProductRecord};
use crate::report::ChangeReport;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Watchlist {
    brands: Vec<String>,
    min_discount: f64,
}

impl Watchlist {
    /// Build a watchlist; brands are lower-cased, blanks and repeats dropped.
    pub fn new<I, S>(brands: I, min_discount: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list: Vec<String> = Vec::new();
        for brand in brands {
            let brand = brand.as_ref().trim().to_lowercase();
            if !brand.is_empty() && !list.contains(&brand) {
                list.push(brand);
            }
        }
        Self {
            brands: list,
            min_discount: if min_discount.is_finite() { min_discount.max(0.0) } else { 0.0 },
        }
    }

    pub fn from_config(config: &NotifyConfig) -> Self {
        Self::new(&config.watchlist_brands, config.alert_min_discount)
    }

    pub fn is_empty(&self) -> bool {
        self.brands.is_empty()
    }

    pub fn brands(&self) -> &[String] {
        &self.brands
    }

    /// The watched brand a record matches, if it qualifies for an alert.
    pub fn matches(&self, record: &ProductRecord) -> Option<&str> {
        let discount = record.discount_pct?;
        if discount <= 0.0 || discount < self.min_discount {
            return None;
        }

        let brand = record.brand.as_deref().unwrap_or_default().to_lowercase();
        let name = record.name.as_deref().unwrap_or_default().to_lowercase();
        self.brands
            .iter()
            .find(|b| brand.contains(b.as_str()) || name.contains(b.as_str()))
            .map(String::as_str)
    }

    /// Narrow a report down to its watchlist hits.
    ///
    /// Removed listings never alert. A changed listing is judged on its
    /// current observation, falling back to the previous brand and name
    /// when the current ones are missing.
    pub fn filter(&self, report: &ChangeReport) -> ChangeReport {
        let new = report
            .new
            .iter()
            .filter(|row| self.matches(&row.record).is_some())
            .cloned()
            .collect();

        let changed = report
            .changed
            .iter()
            .filter(|row| {
                let mut candidate = row.current.clone();
                if candidate.brand.is_none() {
                    candidate.brand = row.previous.brand.clone();
                }
                if candidate.name.is_none() {
                    candidate.name = row.previous.name.clone();
                }
                self.matches(&candidate).is_some()
            })
            .cloned()
            .collect();

        ChangeReport {
            summary: report.summary.clone(),
            new,
            changed,
            removed: Vec::new(),
        }
    }
}
