//! Append-only JSONL audit trail of switch outcomes.
//!
//! Auditing is best-effort: a failed write is logged and swallowed, never
//! allowed to fail a switch.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// One audit line.
#[derive(Debug, Serialize)]
pub struct AuditRecord {
    pub event: &'static str,
    pub switch_id: u64,
    pub from_model: Option<String>,
    pub to_model: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// JSONL file appender.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one record. Errors are logged, not returned.
    pub async fn append(&self, record: &AuditRecord) {
        if let Err(err) = self.try_append(record).await {
            warn!(path = %self.path.display(), %err, "failed to append audit record");
        }
    }

    async fn try_append(&self, record: &AuditRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
