use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::records::{AuditKind, AuditRecord};
use crate::sink::{AuditError, AuditSink};

#[derive(Debug, Default)]
struct Inner {
    records: Vec<AuditRecord>,
    /// Reject every append once this many records have been accepted.
    fail_after: Option<usize>,
}

/// In-memory sink for tests.
#[derive(Debug, Default, Clone)]
pub struct MemAuditSink {
    inner: Arc<Mutex<Inner>>,
}

impl MemAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_after(&self, accepted: usize) {
        self.inner.lock().unwrap().fail_after = Some(accepted);
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.inner.lock().unwrap().records.clone()
    }

    pub fn kinds(&self) -> Vec<AuditKind> {
        self.records().iter().map(AuditRecord::kind).collect()
    }
}

#[async_trait]
impl AuditSink for MemAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut guard = self.inner.lock().unwrap();
        if guard.fail_after.is_some_and(|limit| guard.records.len() >= limit) {
            return Err(AuditError::Rejected(format!("{:?}", record.kind())));
        }
        guard.records.push(record);
        Ok(())
    }
}
