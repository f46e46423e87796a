//! Product listing data structure.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One product tile observed on a listing page at capture time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductRecord {
    /// Site-assigned identifier
    #[serde(default)]
    pub product_id: Option<String>,

    /// Secondary identifier, often equal to `product_id`
    #[serde(default)]
    pub sku: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub brand: Option<String>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub department: Option<String>,

    /// Audience (`mujer`, `hombre`), forced per category or inferred
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    #[serde(default)]
    pub price_currency: Option<String>,

    #[serde(default)]
    pub list_price: Option<f64>,

    #[serde(default)]
    pub sale_price: Option<f64>,

    /// Percentage off `list_price`, present only when the item is on sale
    #[serde(default)]
    pub discount_pct: Option<f64>,

    #[serde(default)]
    pub availability: Option<String>,

    #[serde(default)]
    pub image_url: Option<String>,

    /// Canonical product link
    #[serde(default)]
    pub url: Option<String>,

    /// Zero-based listing page the tile was found on
    #[serde(default)]
    pub page_idx: Option<u32>,

    /// Capture time of the snapshot this record belongs to
    pub captured_at: DateTime<Utc>,
}

impl ProductRecord {
    /// Create an empty record stamped with the capture time.
    pub fn new(captured_at: DateTime<Utc>) -> Self {
        Self {
            product_id: None,
            sku: None,
            name: None,
            brand: None,
            category: None,
            department: None,
            gender: None,
            price_currency: None,
            list_price: None,
            sale_price: None,
            discount_pct: None,
            availability: None,
            image_url: None,
            url: None,
            page_idx: None,
            captured_at,
        }
    }

    /// Set both prices and derive the discount from them.
    pub fn with_prices(mut self, list_price: Option<f64>, sale_price: Option<f64>) -> Self {
        self.list_price = list_price;
        self.sale_price = sale_price;
        self.discount_pct = derive_discount(list_price, sale_price);
        self
    }

    /// Identity used for de-duplication within a snapshot: `product_id`, else `url`.
    pub fn identity(&self) -> Option<&str> {
        non_blank(self.product_id.as_deref()).or_else(|| non_blank(self.url.as_deref()))
    }

    /// Normalize the record before it enters a snapshot.
    ///
    /// Blank strings become `None`, non-finite prices become `None`, and the
    /// discount is recomputed from the prices.
    pub fn finalize(&mut self) {
        for field in [
            &mut self.product_id,
            &mut self.sku,
            &mut self.name,
            &mut self.brand,
            &mut self.category,
            &mut self.department,
            &mut self.gender,
            &mut self.price_currency,
            &mut self.availability,
            &mut self.image_url,
            &mut self.url,
        ] {
            if let Some(value) = field.take() {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    *field = Some(trimmed.to_string());
                }
            }
        }

        self.list_price = self.list_price.filter(|p| p.is_finite());
        self.sale_price = self.sale_price.filter(|p| p.is_finite());
        self.discount_pct = derive_discount(self.list_price, self.sale_price);
    }
}

/// Guess the audience of a listing from its link, category and name.
pub fn infer_gender(url: Option<&str>, category: Option<&str>, name: Option<&str>) -> Option<&'static str> {
    let haystack = format!(
        " {} {} {} ",
        url.unwrap_or_default(),
        category.unwrap_or_default(),
        name.unwrap_or_default()
    )
    .to_lowercase();

    if ["/mujer", "/woman", " mujer "].iter().any(|k| haystack.contains(k)) {
        Some("mujer")
    } else if ["/hombre", "/man", " hombre "].iter().any(|k| haystack.contains(k)) {
        Some("hombre")
    } else {
        None
    }
}

/// Treat empty strings the same as a missing value.
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Compute the discount percentage from list and sale price.
///
/// Returns `None` unless both prices are present, positive, and the sale
/// price is strictly below the list price. The result is rounded to two
/// decimals.
pub fn derive_discount(list_price: Option<f64>, sale_price: Option<f64>) -> Option<f64> {
    let (list, sale) = (list_price?, sale_price?);
    if !(list > 0.0 && sale > 0.0 && sale < list) {
        return None;
    }
    let pct = (1.0 - sale / list) * 100.0;
    Some((pct * 100.0).round() / 100.0)
}

fn money_noise() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\d.,]").expect("static regex"))
}

/// Parse a displayed price such as `"$1,299.00 MXN"`.
///
/// Anything that does not parse to a finite number is treated as missing.
pub fn parse_price(text: &str) -> Option<f64> {
    let digits = money_noise().replace_all(text, "").replace(',', "");
    let digits = digits.trim();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<f64>().ok().filter(|p| p.is_finite())
}
