//! Outbox notifier: drops each message into its own directory.
//!
//! ## Layout
//!
//! ```text
//! {outbox}/
//! └── 20260302_101500_ofertas/
//!     ├── message.json      # recipients, subject, body, summary
//!     ├── ofertas_..._NEW.csv
//!     └── ofertas_..._CHANGES.csv
//! ```
//!
//! A message is assembled under `.tmp_<name>` and renamed into place once
//! every file is written, so relays never see a partial message.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::notify::{Attachment, Message, Notifier};
use crate::pipeline::diff::ChangeSetSummary;
use crate::utils::sanitize_file_component;

const MESSAGE_FILE: &str = "message.json";

/// Writes messages to a directory for a mail relay to deliver.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    root_dir: PathBuf,
    recipients: Vec<String>,
    subject_prefix: String,
}

impl OutboxNotifier {
    pub fn new(
        root_dir: impl Into<PathBuf>,
        recipients: Vec<String>,
        subject_prefix: impl Into<String>,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            recipients,
            subject_prefix: subject_prefix.into(),
        }
    }

    /// Pick a directory name that does not exist yet.
    async fn message_dir(&self, category: &str) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let base = format!("{stamp}_{}", sanitize_file_component(category));

        let mut candidate = self.root_dir.join(&base);
        let mut n = 2;
        while tokio::fs::try_exists(&candidate).await? {
            candidate = self.root_dir.join(format!("{base}_{n}"));
            n += 1;
        }
        Ok(candidate)
    }

    async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    /// Write every file into a hidden staging directory, then move it to `dir`.
    async fn publish(dir: &Path, files: &[(String, &[u8])]) -> Result<()> {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AppError::notify(format!("bad outbox path {}", dir.display())))?;
        let staging = dir.with_file_name(format!(".tmp_{name}"));

        if tokio::fs::try_exists(&staging).await? {
            tokio::fs::remove_dir_all(&staging).await?;
        }
        tokio::fs::create_dir_all(&staging).await?;

        for (file_name, bytes) in files {
            Self::write_file(&staging.join(file_name), bytes).await?;
        }

        tokio::fs::rename(&staging, dir).await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn notify(
        &self,
        subject: &str,
        summary: &ChangeSetSummary,
        attachments: &[Attachment],
    ) -> Result<()> {
        if self.recipients.is_empty() {
            log::warn!("No recipients configured; skipping message '{}'", subject);
            return Ok(());
        }

        let mut files: Vec<(String, &[u8])> = Vec::with_capacity(attachments.len() + 1);
        for attachment in attachments {
            let name = sanitize_file_component(&attachment.file_name);
            if name.is_empty() || name == MESSAGE_FILE {
                return Err(AppError::notify(format!(
                    "attachment name '{}' is not usable",
                    attachment.file_name
                )));
            }
            files.push((name, attachment.bytes.as_slice()));
        }

        let subject = if self.subject_prefix.is_empty() {
            subject.to_string()
        } else {
            format!("{} {}", self.subject_prefix, subject)
        };

        let message = Message {
            recipients: self.recipients.clone(),
            subject,
            body: summary.body(),
            summary: summary.clone(),
            attachments: attachments.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&message)?;
        files.push((MESSAGE_FILE.to_string(), bytes.as_slice()));

        tokio::fs::create_dir_all(&self.root_dir).await?;
        let dir = self.message_dir(&summary.category).await?;
        Self::publish(&dir, &files).await?;

        log::info!(
            "Queued '{}' for {} in {}",
            message.subject,
            message.recipients.join(", "),
            dir.display()
        );
        Ok(())
    }
}
