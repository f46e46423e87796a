//! Snapshot of one category capture.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::ProductRecord;

/// One full capture of a category's listings at a point in time.
///
/// Snapshots are written once and only read afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    /// Category identifier (also the storage prefix)
    pub category: String,

    /// Capture time shared by every record
    pub captured_at: DateTime<Utc>,

    /// Records in page traversal order
    #[serde(default)]
    pub records: Vec<ProductRecord>,
}

impl Snapshot {
    /// Build a snapshot, normalizing records and dropping duplicates.
    ///
    /// Duplicates share the same `product_id` (or `url` when the id is
    /// missing); the first occurrence wins. Records with neither are kept.
    pub fn new(
        category: impl Into<String>,
        captured_at: DateTime<Utc>,
        records: Vec<ProductRecord>,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut deduped = Vec::with_capacity(records.len());

        for mut record in records {
            record.finalize();
            let fresh = match record.identity() {
                Some(id) => seen.insert(id.to_string()),
                None => true,
            };
            if fresh {
                deduped.push(record);
            }
        }

        Self {
            category: category.into(),
            captured_at,
            records: deduped,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// SHA-256 over the serialized records, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for record in &self.records {
            // Serializing a plain struct of strings and floats cannot fail.
            if let Ok(bytes) = serde_json::to_vec(record) {
                hasher.update(&bytes);
            }
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn record(id: Option<&str>, url: Option<&str>, name: &str) -> ProductRecord {
        let mut r = ProductRecord::new(ts());
        r.product_id = id.map(String::from);
        r.url = url.map(String::from);
        r.name = Some(name.to_string());
        r
    }

    #[test]
    fn test_first_occurrence_wins() {
        let snap = Snapshot::new(
            "ofertas",
            ts(),
            vec![
                record(Some("1"), Some("/p/1"), "first"),
                record(Some("1"), Some("/p/1-b"), "second"),
                record(None, Some("/p/2"), "by-url"),
                record(None, Some("/p/2"), "by-url-dup"),
            ],
        );

        assert_eq!(snap.len(), 2);
        assert_eq!(snap.records[0].name.as_deref(), Some("first"));
        assert_eq!(snap.records[1].name.as_deref(), Some("by-url"));
    }

    #[test]
    fn test_records_without_identity_are_kept() {
        let snap = Snapshot::new(
            "ofertas",
            ts(),
            vec![record(None, None, "a"), record(None, None, "b")],
        );
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = Snapshot::new("x", ts(), vec![record(Some("1"), None, "a")]);
        let b = Snapshot::new("x", ts(), vec![record(Some("1"), None, "a")]);
        let c = Snapshot::new("x", ts(), vec![record(Some("1"), None, "changed")]);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
