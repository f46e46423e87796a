// src/report.rs

//! Persisted change reports and their CSV renderings.
//!
//! A `ChangeSet` is keyed by `RecordKey`, which does not survive JSON map
//! keys, so reports store flat rows with the key rendered as a string.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::ProductRecord;
use crate::notify::Attachment;
use crate::pipeline::compare::Field;
use crate::pipeline::diff::{ChangeSet, ChangeSetSummary};

/// A record together with the join key it was filed under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyedRecord {
    pub key: String,
    #[serde(flatten)]
    pub record: ProductRecord,
}

/// A changed product with both observations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangedRow {
    pub key: String,
    pub fields: Vec<Field>,
    pub previous: ProductRecord,
    pub current: ProductRecord,
}

/// Serializable form of one comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeReport {
    pub summary: ChangeSetSummary,
    #[serde(default)]
    pub new: Vec<KeyedRecord>,
    #[serde(default)]
    pub changed: Vec<ChangedRow>,
    #[serde(default)]
    pub removed: Vec<KeyedRecord>,
}

impl ChangeReport {
    pub fn new(changes: &ChangeSet, summary: ChangeSetSummary) -> Self {
        let keyed = |(key, record): (&_, &ProductRecord)| KeyedRecord {
            key: ToString::to_string(key),
            record: record.clone(),
        };

        Self {
            summary,
            new: changes.new.iter().map(keyed).collect(),
            changed: changes
                .changed
                .iter()
                .map(|(key, change)| ChangedRow {
                    key: key.to_string(),
                    fields: change.fields.iter().copied().collect(),
                    previous: change.previous.clone(),
                    current: change.current.clone(),
                })
                .collect(),
            removed: changes.removed.iter().map(keyed).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// CSV attachments for the non-empty sections of this report.
    pub fn attachments(&self, stem: &str) -> Result<Vec<Attachment>> {
        sections_to_attachments(std::slice::from_ref(self), stem)
    }
}

/// Build `NEW`, `CHANGES` and `REMOVED` CSV attachments for a set of reports,
/// skipping sections without rows.
pub fn sections_to_attachments(reports: &[ChangeReport], stem: &str) -> Result<Vec<Attachment>> {
    let mut attachments = Vec::new();

    if reports.iter().any(|r| !r.new.is_empty()) {
        attachments.push(Attachment::csv(format!("{stem}_NEW.csv"), new_csv(reports)?));
    }
    if reports.iter().any(|r| !r.changed.is_empty()) {
        attachments.push(Attachment::csv(format!("{stem}_CHANGES.csv"), changes_csv(reports)?));
    }
    if reports.iter().any(|r| !r.removed.is_empty()) {
        attachments.push(Attachment::csv(format!("{stem}_REMOVED.csv"), removed_csv(reports)?));
    }

    Ok(attachments)
}

const RECORD_HEADERS: [&str; 18] = [
    "category",
    "key",
    "product_id",
    "sku",
    "name",
    "brand",
    "product_category",
    "department",
    "gender",
    "price_currency",
    "list_price",
    "sale_price",
    "discount_pct",
    "availability",
    "image_url",
    "url",
    "page_idx",
    "captured_at",
];

const CHANGE_HEADERS: [&str; 16] = [
    "category",
    "key",
    "changed_fields",
    "name",
    "brand",
    "list_price_old",
    "list_price_new",
    "sale_price_old",
    "sale_price_new",
    "discount_pct_old",
    "discount_pct_new",
    "availability_old",
    "availability_new",
    "url_old",
    "url_new",
    "captured_at",
];

/// Rows appearing for the first time.
pub fn new_csv(reports: &[ChangeReport]) -> Result<Vec<u8>> {
    records_csv(reports.iter().flat_map(|r| {
        r.new.iter().map(move |row| (r.summary.category.as_str(), row))
    }))
}

/// Rows that disappeared.
pub fn removed_csv(reports: &[ChangeReport]) -> Result<Vec<u8>> {
    records_csv(reports.iter().flat_map(|r| {
        r.removed.iter().map(move |row| (r.summary.category.as_str(), row))
    }))
}

/// Rows whose comparable fields changed, old and new side by side.
pub fn changes_csv(reports: &[ChangeReport]) -> Result<Vec<u8>> {
    let mut wtr = csv_writer();
    wtr.write_record(CHANGE_HEADERS)?;

    for report in reports {
        for row in &report.changed {
            let (old, new) = (&row.previous, &row.current);
            let fields = row
                .fields
                .iter()
                .map(Field::as_str)
                .collect::<Vec<_>>()
                .join(";");
            wtr.write_record([
                report.summary.category.clone(),
                row.key.clone(),
                fields,
                text(new.name.as_ref().or(old.name.as_ref())),
                text(new.brand.as_ref().or(old.brand.as_ref())),
                number(old.list_price),
                number(new.list_price),
                number(old.sale_price),
                number(new.sale_price),
                number(old.discount_pct),
                number(new.discount_pct),
                text(old.availability.as_ref()),
                text(new.availability.as_ref()),
                text(old.url.as_ref()),
                text(new.url.as_ref()),
                new.captured_at.to_rfc3339(),
            ])?;
        }
    }
    finish(wtr)
}

fn records_csv<'a>(rows: impl Iterator<Item = (&'a str, &'a KeyedRecord)>) -> Result<Vec<u8>> {
    let mut wtr = csv_writer();
    wtr.write_record(RECORD_HEADERS)?;

    for (category, row) in rows {
        let r = &row.record;
        wtr.write_record([
            category.to_string(),
            row.key.clone(),
            text(r.product_id.as_ref()),
            text(r.sku.as_ref()),
            text(r.name.as_ref()),
            text(r.brand.as_ref()),
            text(r.category.as_ref()),
            text(r.department.as_ref()),
            text(r.gender.as_ref()),
            text(r.price_currency.as_ref()),
            number(r.list_price),
            number(r.sale_price),
            number(r.discount_pct),
            text(r.availability.as_ref()),
            text(r.image_url.as_ref()),
            text(r.url.as_ref()),
            r.page_idx.map(|p| p.to_string()).unwrap_or_default(),
            r.captured_at.to_rfc3339(),
        ])?;
    }
    finish(wtr)
}

/// In-memory writer with CRLF row endings.
pub(crate) fn csv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new())
}

/// Flush the writer and hand back the bytes.
pub(crate) fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    wtr.into_inner()
        .map_err(|e| AppError::Csv(csv::Error::from(e.into_error())))
}

fn text(value: Option<&String>) -> String {
    value.cloned().unwrap_or_default()
}

fn number(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_default()
}
