//! Field-wise comparison of two observations of the same product.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::ProductRecord;
use crate::models::product::non_blank;

/// Default absolute tolerance for price fields (one cent).
pub const DEFAULT_TOLERANCE: f64 = 0.01;

/// Slack absorbing binary float error so a difference of exactly the
/// tolerance (e.g. `100.00` vs `100.01`) is not reported.
const FLOAT_SLACK: f64 = 1e-9;

/// A field that participates in change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    ListPrice,
    SalePrice,
    DiscountPct,
    Name,
    Brand,
    Url,
    Availability,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::ListPrice,
        Field::SalePrice,
        Field::DiscountPct,
        Field::Name,
        Field::Brand,
        Field::Url,
        Field::Availability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::ListPrice => "list_price",
            Field::SalePrice => "sale_price",
            Field::DiscountPct => "discount_pct",
            Field::Name => "name",
            Field::Brand => "brand",
            Field::Url => "url",
            Field::Availability => "availability",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether two values of a comparable field differ meaningfully.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldComparator {
    tolerance: f64,
}

impl Default for FieldComparator {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl FieldComparator {
    /// Create a comparator. Negative or non-finite tolerances are treated as zero.
    pub fn new(tolerance: f64) -> Self {
        let tolerance = if tolerance.is_finite() && tolerance > 0.0 {
            tolerance
        } else {
            0.0
        };
        Self { tolerance }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Return every field whose value changed between the two records.
    pub fn changed_fields(&self, old: &ProductRecord, new: &ProductRecord) -> BTreeSet<Field> {
        Field::ALL
            .into_iter()
            .filter(|&field| self.field_changed(field, old, new))
            .collect()
    }

    fn field_changed(&self, field: Field, old: &ProductRecord, new: &ProductRecord) -> bool {
        match field {
            Field::ListPrice => self.numeric_changed(old.list_price, new.list_price),
            Field::SalePrice => self.numeric_changed(old.sale_price, new.sale_price),
            Field::DiscountPct => self.numeric_changed(old.discount_pct, new.discount_pct),
            Field::Name => text_changed(old.name.as_deref(), new.name.as_deref()),
            Field::Brand => text_changed(old.brand.as_deref(), new.brand.as_deref()),
            Field::Url => text_changed(old.url.as_deref(), new.url.as_deref()),
            Field::Availability => {
                text_changed(old.availability.as_deref(), new.availability.as_deref())
            }
        }
    }

    /// Both missing is equal, one missing is a change, otherwise compare
    /// the absolute difference against the tolerance.
    pub fn numeric_changed(&self, a: Option<f64>, b: Option<f64>) -> bool {
        let a = a.filter(|v| v.is_finite());
        let b = b.filter(|v| v.is_finite());
        match (a, b) {
            (None, None) => false,
            (Some(_), None) | (None, Some(_)) => true,
            (Some(a), Some(b)) => (a - b).abs() > self.tolerance + FLOAT_SLACK,
        }
    }
}

/// Exact comparison where empty and missing are the same thing.
pub fn text_changed(a: Option<&str>, b: Option<&str>) -> bool {
    non_blank(a) != non_blank(b)
}
