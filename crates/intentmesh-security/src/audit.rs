use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub subject: Option<String>,
    pub details: serde_json::Value,
    pub outcome: AuditOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Degraded,
    Failure,
}

/// Append-only diagnostics trail: join outcomes, replication failures and
/// read fallbacks. Entries are written to `audit.jsonl` by a background task.
pub struct AuditLog {
    tx: Option<mpsc::UnboundedSender<AuditEntry>>,
}

impl AuditLog {
    /// Create a new AuditLog. Spawns a background task that writes entries to disk.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(log_dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEntry>();

        tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
                warn!(dir = %log_dir.display(), error = %e, "audit log disabled");
                return;
            }
            let log_file = log_dir.join("audit.jsonl");
            let mut file = match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .await
            {
                Ok(f) => f,
                Err(e) => {
                    warn!(file = %log_file.display(), error = %e, "audit log disabled");
                    return;
                }
            };

            while let Some(entry) = rx.recv().await {
                let Ok(mut line) = serde_json::to_string(&entry) else {
                    continue;
                };
                line.push('\n');
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!(error = %e, "audit write failed");
                    continue;
                }
                let _ = file.flush().await;
            }
        });

        Self { tx: Some(tx) }
    }

    /// An audit log that only emits tracing events.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn log(&self, entry: AuditEntry) {
        info!(
            action = %entry.action,
            subject = ?entry.subject,
            outcome = ?entry.outcome,
            "audit"
        );
        if let Some(tx) = &self.tx {
            let _ = tx.send(entry);
        }
    }

    pub fn log_action(
        &self,
        action: impl Into<String>,
        subject: Option<String>,
        details: serde_json::Value,
        outcome: AuditOutcome,
    ) {
        self.log(AuditEntry {
            timestamp: Utc::now(),
            action: action.into(),
            subject,
            details,
            outcome,
        });
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::disabled()
    }
}
