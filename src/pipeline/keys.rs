//! Join key resolution for snapshot comparison.
//!
//! `product_id` is not reliably present across sources, so the resolver
//! picks exactly one field per comparison and uses it on both sides.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{ProductRecord, Snapshot};
use crate::models::product::non_blank;

/// Record field usable as a join key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyField {
    ProductId,
    Sku,
    Url,
}

impl KeyField {
    /// Read this field from a record, treating blank values as missing.
    pub fn value<'a>(&self, record: &'a ProductRecord) -> Option<&'a str> {
        let raw = match self {
            KeyField::ProductId => record.product_id.as_deref(),
            KeyField::Sku => record.sku.as_deref(),
            KeyField::Url => record.url.as_deref(),
        };
        non_blank(raw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyField::ProductId => "product_id",
            KeyField::Sku => "sku",
            KeyField::Url => "url",
        }
    }
}

impl fmt::Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which snapshot a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Previous,
    Current,
}

/// Key a record is filed under in a `ChangeSet`.
///
/// Records whose key field is blank get an `Unkeyed` key tied to their
/// side and position, so two blank keys can never join each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKey {
    Value(String),
    Unkeyed { side: Side, position: usize },
}

impl RecordKey {
    pub fn for_record(field: KeyField, record: &ProductRecord, side: Side, position: usize) -> Self {
        match field.value(record) {
            Some(v) => RecordKey::Value(v.to_string()),
            None => RecordKey::Unkeyed { side, position },
        }
    }

    pub fn is_unkeyed(&self) -> bool {
        matches!(self, RecordKey::Unkeyed { .. })
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Value(v) => f.write_str(v),
            RecordKey::Unkeyed { side, position } => {
                let side = match side {
                    Side::Previous => "previous",
                    Side::Current => "current",
                };
                write!(f, "<unkeyed {side} #{position}>")
            }
        }
    }
}

/// Chooses the join key for a pair of snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyResolver {
    priority: Vec<KeyField>,
}

impl Default for KeyResolver {
    fn default() -> Self {
        Self {
            priority: vec![KeyField::ProductId, KeyField::Sku, KeyField::Url],
        }
    }
}

impl KeyResolver {
    /// Create a resolver with a custom priority. An empty list falls back
    /// to the default order.
    pub fn with_priority(priority: Vec<KeyField>) -> Self {
        if priority.is_empty() {
            return Self::default();
        }
        Self { priority }
    }

    /// Pick the first field that has at least one value on both sides.
    ///
    /// With no previous snapshot only the current one is considered, and an
    /// empty snapshot does not rule a field out. When no field qualifies the
    /// last field in the priority list is used, and blank keys simply never
    /// match.
    pub fn resolve(&self, previous: Option<&Snapshot>, current: &Snapshot) -> KeyField {
        let usable = |field: KeyField, snap: &Snapshot| {
            snap.is_empty() || snap.records.iter().any(|r| field.value(r).is_some())
        };

        self.priority
            .iter()
            .copied()
            .find(|&field| {
                usable(field, current) && previous.is_none_or(|prev| usable(field, prev))
            })
            .unwrap_or_else(|| *self.priority.last().unwrap_or(&KeyField::Url))
    }
}
