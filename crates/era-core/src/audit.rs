use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::time::utc_now;

/// Audit event kinds for the append-only security log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuditAction {
    VmCreated,
    VmStarted,
    VmStopped,
    VmCleaned,
    SessionCreated,
    SessionDeleted,
    SessionDuplicated,
    SetupStarted,
    SetupCompleted,
    SetupFailed,
}

/// A single audit log entry, serialized as one JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub subject_id: String,
    pub action: AuditAction,
    pub detail: Option<String>,
}

/// Append-only, JSON-lines audit log.
#[derive(Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AuditLog { path: path.into() }
    }

    pub async fn log(&self, subject_id: &str, action: AuditAction, detail: Option<String>) -> std::io::Result<()> {
        let entry = AuditEntry {
            timestamp: utc_now(),
            subject_id: subject_id.to_string(),
            action,
            detail,
        };
        let line = serde_json::to_string(&entry).expect("AuditEntry always serializes");

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"));

        log.log("python-1", AuditAction::VmCreated, None).await.unwrap();
        log.log("python-1", AuditAction::VmStarted, Some("pid=1".into())).await.unwrap();

        let contents = tokio::fs::read_to_string(log.path()).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AuditEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.subject_id, "python-1");
    }
}
