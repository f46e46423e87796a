// tests/change_properties.rs
//
// Behaviour of snapshot comparison through the public API.
//
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use shelfwatch::models::{ProductRecord, Snapshot, derive_discount};
use shelfwatch::pipeline::{ChangeDetector, Field, KeyField, RecordKey, detect_changes};

const TOL: f64 = 0.01;

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn rec(id: Option<&str>, url: Option<&str>, list: Option<f64>, sale: Option<f64>) -> ProductRecord {
    let mut r = ProductRecord::new(ts("2026-03-01T10:00:00Z")).with_prices(list, sale);
    r.product_id = id.map(String::from);
    r.url = url.map(String::from);
    r
}

fn snap(at: &str, records: Vec<ProductRecord>) -> Snapshot {
    Snapshot::new("ofertas", ts(at), records)
}

fn key(v: &str) -> RecordKey {
    RecordKey::Value(v.to_string())
}

#[test]
fn outcome_sets_partition_every_key() {
    let prev = snap(
        "2026-03-01T10:00:00Z",
        vec![
            rec(Some("1"), None, Some(100.0), Some(90.0)),
            rec(Some("2"), None, Some(100.0), Some(90.0)),
            rec(Some("3"), None, Some(100.0), Some(90.0)),
            rec(None, None, Some(5.0), None),
        ],
    );
    let curr = snap(
        "2026-03-02T10:00:00Z",
        vec![
            rec(Some("1"), None, Some(100.0), Some(90.0)),
            rec(Some("2"), None, Some(100.0), Some(80.0)),
            rec(Some("4"), None, Some(100.0), Some(90.0)),
            rec(None, None, Some(5.0), None),
        ],
    );

    let result = detect_changes(Some(&prev), &curr, TOL);

    let new: BTreeSet<_> = result.new.keys().cloned().collect();
    let removed: BTreeSet<_> = result.removed.keys().cloned().collect();
    let changed: BTreeSet<_> = result.changed.keys().cloned().collect();
    assert!(new.is_disjoint(&removed));
    assert!(new.is_disjoint(&changed));
    assert!(removed.is_disjoint(&changed));

    // previous: 3 keyed + 1 unkeyed; current: 3 keyed + 1 unkeyed
    assert_eq!(removed.len() + changed.len() + result.unchanged, prev.len());
    assert_eq!(new.len() + changed.len() + result.unchanged, curr.len());

    assert_eq!(changed, BTreeSet::from([key("2")]));
    assert!(new.contains(&key("4")));
    assert!(removed.contains(&key("3")));
    assert_eq!(result.unchanged, 1);
}

#[test]
fn cold_start_reports_everything_as_new() {
    let curr = snap(
        "2026-03-01T10:00:00Z",
        vec![
            rec(Some("1"), None, Some(10.0), None),
            rec(Some("2"), None, Some(20.0), None),
            rec(None, None, None, None),
        ],
    );

    let result = detect_changes(None, &curr, TOL);
    assert!(result.cold_start);
    assert_eq!(result.new.len(), 3);
    assert!(result.removed.is_empty());
    assert!(result.changed.is_empty());
}

#[test]
fn identical_snapshots_have_no_changes() {
    let s = snap(
        "2026-03-01T10:00:00Z",
        vec![
            rec(Some("1"), Some("/p/1"), Some(100.0), Some(75.0)),
            rec(Some("2"), Some("/p/2"), None, Some(40.0)),
            rec(Some("3"), None, None, None),
        ],
    );

    let result = detect_changes(Some(&s), &s, TOL);
    assert!(!result.has_changes());
    assert_eq!(result.unchanged, 3);
}

#[test]
fn tolerance_boundary() {
    let prev = snap("2026-03-01T10:00:00Z", vec![rec(Some("1"), None, Some(100.0), None)]);

    let at_tolerance = snap("2026-03-02T10:00:00Z", vec![rec(Some("1"), None, Some(100.01), None)]);
    assert!(!detect_changes(Some(&prev), &at_tolerance, TOL).has_changes());

    let beyond = snap("2026-03-02T10:00:00Z", vec![rec(Some("1"), None, Some(100.011), None)]);
    let result = detect_changes(Some(&prev), &beyond, TOL);
    let fields: Vec<_> = result.changed[&key("1")].fields.iter().copied().collect();
    assert_eq!(fields, vec![Field::ListPrice]);
}

#[test]
fn sale_price_appearing_is_a_change() {
    let prev = snap("2026-03-01T10:00:00Z", vec![rec(Some("1"), None, Some(200.0), None)]);
    let curr = snap("2026-03-02T10:00:00Z", vec![rec(Some("1"), None, Some(200.0), Some(100.0))]);

    let result = detect_changes(Some(&prev), &curr, TOL);
    let change = &result.changed[&key("1")];
    assert!(change.fields.contains(&Field::SalePrice));
    assert!(change.fields.contains(&Field::DiscountPct));
    assert!(!change.fields.contains(&Field::ListPrice));
}

#[test]
fn url_key_when_product_ids_are_missing() {
    let prev = snap("2026-03-01T10:00:00Z", vec![rec(None, Some("/p/1"), None, Some(50.0))]);
    let curr = snap("2026-03-02T10:00:00Z", vec![rec(None, Some("/p/1"), None, Some(40.0))]);

    let result = detect_changes(Some(&prev), &curr, TOL);
    assert_eq!(result.key_field, KeyField::Url);
    assert!(result.new.is_empty());
    assert!(result.removed.is_empty());
    let fields: Vec<_> = result.changed[&key("/p/1")].fields.iter().copied().collect();
    assert_eq!(fields, vec![Field::SalePrice]);
}

#[test]
fn product_id_appearing_on_one_side_does_not_split_records() {
    let prev = snap("2026-03-01T10:00:00Z", vec![rec(None, Some("/p/1"), None, Some(50.0))]);
    let curr = snap(
        "2026-03-02T10:00:00Z",
        vec![rec(Some("88887777"), Some("/p/1"), None, Some(50.0))],
    );

    let result = detect_changes(Some(&prev), &curr, TOL);
    assert_eq!(result.key_field, KeyField::Url);
    assert!(!result.has_changes());
}

#[test]
fn discount_is_derived_not_zero() {
    assert_eq!(derive_discount(Some(100.0), Some(75.0)), Some(25.0));
    assert_eq!(derive_discount(Some(100.0), Some(100.0)), None);
    assert_eq!(derive_discount(Some(0.0), Some(10.0)), None);
    assert_eq!(derive_discount(None, Some(10.0)), None);

    let r = rec(Some("1"), None, Some(100.0), Some(75.0));
    assert_eq!(r.discount_pct, Some(25.0));
}

#[test]
fn wider_tolerance_hides_small_moves() {
    let prev = snap("2026-03-01T10:00:00Z", vec![rec(Some("1"), None, Some(100.0), Some(90.0))]);
    let curr = snap("2026-03-02T10:00:00Z", vec![rec(Some("1"), None, Some(100.0), Some(89.5))]);

    assert!(detect_changes(Some(&prev), &curr, TOL).has_changes());
    // sale moves by 0.5, discount by 0.5 points
    assert!(!ChangeDetector::with_tolerance(1.0).detect(Some(&prev), &curr).has_changes());
}
