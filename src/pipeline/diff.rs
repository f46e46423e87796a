//! Change detection between two snapshots of the same category.
//!
//! Computes which listings appeared, disappeared, or changed price and
//! availability since the previous capture, for reports and alerts.
//!
//! The detector is a pure function of its two inputs: no I/O, no clock
//! reads, and deterministic ordering of every output map.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ProductRecord, Snapshot};
use crate::pipeline::compare::{Field, FieldComparator};
use crate::pipeline::keys::{KeyField, KeyResolver, RecordKey, Side};

/// Old and new observation of a product whose comparable fields differ.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub previous: ProductRecord,
    pub current: ProductRecord,
    pub fields: BTreeSet<Field>,
}

/// Output of comparing two snapshots.
///
/// `new`, `removed` and `changed` are pairwise disjoint; keys present on
/// both sides without differences are only counted in `unchanged`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    /// Field the two snapshots were joined on
    pub key_field: KeyField,
    /// Keys only in the current snapshot
    pub new: BTreeMap<RecordKey, ProductRecord>,
    /// Keys only in the previous snapshot
    pub removed: BTreeMap<RecordKey, ProductRecord>,
    /// Keys on both sides with at least one changed field
    pub changed: BTreeMap<RecordKey, FieldChange>,
    /// Keys on both sides with no changed field
    pub unchanged: usize,
    /// Records dropped because an earlier record had the same key
    pub duplicate_keys: usize,
    /// No previous snapshot existed
    pub cold_start: bool,
}

impl ChangeSet {
    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.changed.is_empty() || !self.removed.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.new.len() + self.changed.len() + self.removed.len()
    }

    /// Summarize this change set for logs and notifications.
    pub fn summary(&self, previous: Option<&Snapshot>, current: &Snapshot) -> ChangeSetSummary {
        ChangeSetSummary {
            category: current.category.clone(),
            key_field: self.key_field,
            captured_at: current.captured_at,
            previous_captured_at: previous.map(|p| p.captured_at),
            current_count: current.len(),
            previous_count: previous.map_or(0, Snapshot::len),
            new_count: self.new.len(),
            changed_count: self.changed.len(),
            removed_count: self.removed.len(),
            unchanged_count: self.unchanged,
            cold_start: self.cold_start,
            fingerprint: current.fingerprint(),
        }
    }
}

/// Human-oriented counts describing one comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeSetSummary {
    pub category: String,
    pub key_field: KeyField,
    pub captured_at: DateTime<Utc>,
    pub previous_captured_at: Option<DateTime<Utc>>,
    pub current_count: usize,
    pub previous_count: usize,
    pub new_count: usize,
    pub changed_count: usize,
    pub removed_count: usize,
    pub unchanged_count: usize,
    pub cold_start: bool,
    /// SHA-256 of the current snapshot's records
    pub fingerprint: String,
}

impl ChangeSetSummary {
    pub fn has_changes(&self) -> bool {
        self.new_count + self.changed_count + self.removed_count > 0
    }

    /// One-line subject for a report.
    pub fn headline(&self) -> String {
        format!(
            "{}: {} new, {} changed, {} removed",
            self.category, self.new_count, self.changed_count, self.removed_count
        )
    }

    /// Key/value pairs for console summaries and message bodies.
    pub fn items(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Category", self.category.clone()),
            ("Captured at", self.captured_at.to_rfc3339()),
            (
                "Previous capture",
                self.previous_captured_at
                    .map_or_else(|| "none (cold start)".to_string(), |t| t.to_rfc3339()),
            ),
            ("Join key", self.key_field.to_string()),
            ("Listings", format!("{} (previous {})", self.current_count, self.previous_count)),
            ("New", self.new_count.to_string()),
            ("Changed", self.changed_count.to_string()),
            ("Removed", self.removed_count.to_string()),
            ("Unchanged", self.unchanged_count.to_string()),
        ]
    }

    /// Plain-text message body.
    pub fn body(&self) -> String {
        self.items()
            .into_iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Computes change sets using a key policy and a field comparator.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    resolver: KeyResolver,
    comparator: FieldComparator,
}

impl ChangeDetector {
    /// Create a detector with the default key priority and tolerance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detector with a custom price tolerance.
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            resolver: KeyResolver::default(),
            comparator: FieldComparator::new(tolerance),
        }
    }

    /// Replace the key resolution policy.
    pub fn with_resolver(mut self, resolver: KeyResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Compare `current` against `previous`.
    ///
    /// Without a previous snapshot every current record is new.
    pub fn detect(&self, previous: Option<&Snapshot>, current: &Snapshot) -> ChangeSet {
        let key_field = self.resolver.resolve(previous, current);
        let (curr_index, curr_dups) = index_records(current, key_field, Side::Current);

        let Some(previous) = previous else {
            return ChangeSet {
                key_field,
                new: curr_index
                    .into_iter()
                    .map(|(k, r)| (k, r.clone()))
                    .collect(),
                removed: BTreeMap::new(),
                changed: BTreeMap::new(),
                unchanged: 0,
                duplicate_keys: curr_dups,
                cold_start: true,
            };
        };

        let (prev_index, prev_dups) = index_records(previous, key_field, Side::Previous);

        let mut new = BTreeMap::new();
        let mut changed = BTreeMap::new();
        let mut unchanged = 0;

        for (key, curr) in &curr_index {
            match prev_index.get(key) {
                None => {
                    new.insert(key.clone(), (*curr).clone());
                }
                Some(prev) => {
                    let fields = self.comparator.changed_fields(prev, curr);
                    if fields.is_empty() {
                        unchanged += 1;
                    } else {
                        changed.insert(
                            key.clone(),
                            FieldChange {
                                previous: (*prev).clone(),
                                current: (*curr).clone(),
                                fields,
                            },
                        );
                    }
                }
            }
        }

        // Removed: in previous but not in current
        let removed: BTreeMap<RecordKey, ProductRecord> = prev_index
            .iter()
            .filter(|(key, _)| !curr_index.contains_key(*key))
            .map(|(key, prev)| (key.clone(), (*prev).clone()))
            .collect();

        let duplicate_keys = prev_dups + curr_dups;
        if duplicate_keys > 0 {
            log::debug!(
                "{}: ignored {} record(s) sharing a {} with an earlier record",
                current.category,
                duplicate_keys,
                key_field
            );
        }

        ChangeSet {
            key_field,
            new,
            removed,
            changed,
            unchanged,
            duplicate_keys,
            cold_start: false,
        }
    }
}

/// Index records by key, keeping the first record seen for each key.
fn index_records(
    snapshot: &Snapshot,
    field: KeyField,
    side: Side,
) -> (BTreeMap<RecordKey, &ProductRecord>, usize) {
    let mut index = BTreeMap::new();
    let mut duplicates = 0;

    for (position, record) in snapshot.records.iter().enumerate() {
        let key = RecordKey::for_record(field, record, side, position);
        if index.contains_key(&key) {
            duplicates += 1;
        } else {
            index.insert(key, record);
        }
    }

    (index, duplicates)
}

/// Convenience function to compare two snapshots.
pub fn detect_changes(previous: Option<&Snapshot>, current: &Snapshot, tolerance: f64) -> ChangeSet {
    ChangeDetector::with_tolerance(tolerance).detect(previous, current)
}
