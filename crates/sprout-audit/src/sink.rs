use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::records::AuditRecord;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("audit sink rejected record: {0}")]
    Rejected(String),
}

/// Append-only destination for audit rows.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError>;
}

pub type DynAuditSink = Arc<dyn AuditSink>;
