use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::records::AuditRecord;
use crate::sink::{AuditError, AuditSink};

const AUDIT_DIR: &str = "audit";
const AUDIT_FILE: &str = "audit.jsonl";

/// Appends one JSON object per line under `<root>/audit/audit.jsonl`.
#[derive(Debug)]
pub struct FsAuditSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FsAuditSink {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, AuditError> {
        let dir = root.as_ref().join(AUDIT_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            path: dir.join(AUDIT_FILE),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every record written so far.
    pub async fn load(&self) -> Result<Vec<AuditRecord>, AuditError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(AuditError::from))
            .collect()
    }
}

#[async_trait]
impl AuditSink for FsAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ActivityRecord;

    #[tokio::test]
    async fn writes_and_reloads_records() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = FsAuditSink::open(tmp.path()).await.unwrap();
        assert!(sink.load().await.unwrap().is_empty());

        for spec in ["chat[data=sp-1]", "chat[data=sp-2]"] {
            sink.append(AuditRecord::Activity(ActivityRecord {
                spec: spec.into(),
                created_at_ns: 1,
                service: "chat".into(),
            }))
            .await
            .unwrap();
        }

        let again = FsAuditSink::open(tmp.path()).await.unwrap();
        let records = again.load().await.unwrap();
        assert_eq!(records.len(), 2);
        match &records[1] {
            AuditRecord::Activity(activity) => assert_eq!(activity.spec, "chat[data=sp-2]"),
            other => panic!("unexpected record {other:?}"),
        }
    }
}
