//! Notification channels for change reports.
//!
//! The pipeline hands every channel a `ChangeSetSummary` plus file
//! attachments. Delivery itself (SMTP, chat, ...) belongs to whatever
//! picks messages up from the outbox.

mod outbox;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pipeline::diff::ChangeSetSummary;

pub use outbox::OutboxNotifier;

/// A file attached to a notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// CSV attachment, prefixed with a UTF-8 BOM so spreadsheet tools
    /// detect the encoding.
    pub fn csv(file_name: impl Into<String>, body: Vec<u8>) -> Self {
        let mut bytes = Vec::with_capacity(body.len() + 3);
        bytes.extend_from_slice(b"\xEF\xBB\xBF");
        bytes.extend_from_slice(&body);
        Self::new(file_name, "text/csv", bytes)
    }

    /// JSON attachment.
    pub fn json(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(file_name, "application/json", bytes)
    }
}

/// A message ready for delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub summary: ChangeSetSummary,
    pub attachments: Vec<Attachment>,
}

/// Delivers a human-readable report of a comparison.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        subject: &str,
        summary: &ChangeSetSummary,
        attachments: &[Attachment],
    ) -> Result<()>;
}

/// Notifier that only writes the summary to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        subject: &str,
        summary: &ChangeSetSummary,
        attachments: &[Attachment],
    ) -> Result<()> {
        crate::utils::log::summary(subject, &summary.items());
        for attachment in attachments {
            crate::utils::log::sub_item(&format!(
                "attachment {} ({} bytes)",
                attachment.file_name,
                attachment.bytes.len()
            ));
        }
        Ok(())
    }
}

/// Split a recipient list on `,` or `;`, trimming and removing duplicates.
pub fn split_recipients(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in raw.split([',', ';']) {
        let part = part.trim();
        if !part.is_empty() && !out.iter().any(|r| r == part) {
            out.push(part.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_recipients() {
        assert_eq!(
            split_recipients("a@x.mx; b@x.mx,a@x.mx , "),
            vec!["a@x.mx".to_string(), "b@x.mx".to_string()]
        );
        assert!(split_recipients("  ").is_empty());
    }

    #[test]
    fn test_csv_attachment_has_bom() {
        let att = Attachment::csv("x.csv", b"a,b\r\n".to_vec());
        assert_eq!(&att.bytes[..3], b"\xEF\xBB\xBF");
        assert_eq!(att.content_type, "text/csv");
    }
}
