//! Dead letter handling — logs the publisher cannot send
//!
//! Transient broker failures are always retried, so only logs that can
//! never be published (a payload that fails to serialize) end up here.
//! An `AuditLog` holds only strings, a string map and unit enums, so
//! today nothing reaches this path; it is kept for fields whose
//! serialization can fail. Without a handler such logs are dropped after an error line.

use crate::error::Result;
use crate::types::AuditLog;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A rejected log with context about why it was rejected
#[derive(Debug, Clone)]
pub struct DeadLetterLog {
    /// The enriched log
    pub log: AuditLog,

    /// Reason the log was dead-lettered
    pub reason: String,

    /// Unix timestamp in milliseconds when the log was dead-lettered
    pub dead_lettered_at: u64,
}

impl DeadLetterLog {
    pub fn new(log: AuditLog, reason: impl Into<String>) -> Self {
        Self {
            log,
            reason: reason.into(),
            dead_lettered_at: now_millis(),
        }
    }
}

/// Trait for dead letter handlers
#[async_trait]
pub trait DlqHandler: Send + Sync {
    /// Take ownership of a rejected log
    async fn handle(&self, entry: DeadLetterLog) -> Result<()>;

    /// Number of logs currently held
    async fn count(&self) -> Result<usize>;

    /// Most recent entries first
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterLog>>;
}

/// In-memory handler keeping the newest `max_entries` logs
pub struct MemoryDlqHandler {
    entries: Arc<RwLock<Vec<DeadLetterLog>>>,
    max_entries: usize,
}

impl MemoryDlqHandler {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            max_entries,
        }
    }
}

impl Default for MemoryDlqHandler {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl DlqHandler for MemoryDlqHandler {
    async fn handle(&self, entry: DeadLetterLog) -> Result<()> {
        tracing::warn!(
            log_id = %entry.log.id,
            description = %entry.log.description,
            reason = %entry.reason,
            "Audit log dead-lettered"
        );

        let mut entries = self.entries.write().await;
        entries.push(entry);

        if self.max_entries > 0 && entries.len() > self.max_entries {
            let drain_count = entries.len() - self.max_entries;
            entries.drain(..drain_count);
        }

        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterLog>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuditObject, AuditOperator, LogType};

    fn test_log(name: &str) -> AuditLog {
        AuditLog::info(
            LogType::Operation,
            "create",
            AuditOperator::default(),
            AuditObject::new("connector", "c-1", name),
            "",
        )
    }

    #[test]
    fn test_dead_letter_creation() {
        let entry = DeadLetterLog::new(test_log("foo"), "unserializable");
        assert_eq!(entry.reason, "unserializable");
        assert_eq!(entry.log.object.name, "foo");
        assert!(entry.dead_lettered_at > 0);
    }

    #[tokio::test]
    async fn test_memory_dlq_handle_and_list() {
        let dlq = MemoryDlqHandler::default();
        assert_eq!(dlq.count().await.unwrap(), 0);

        for i in 0..5 {
            dlq.handle(DeadLetterLog::new(test_log("x"), format!("reason {}", i)))
                .await
                .unwrap();
        }

        assert_eq!(dlq.count().await.unwrap(), 5);
        let list = dlq.list(3).await.unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].reason, "reason 4");
        assert_eq!(list[2].reason, "reason 2");
    }

    #[tokio::test]
    async fn test_memory_dlq_max_capacity() {
        let dlq = MemoryDlqHandler::new(3);

        for i in 0..5 {
            dlq.handle(DeadLetterLog::new(test_log("x"), format!("reason {}", i)))
                .await
                .unwrap();
        }

        assert_eq!(dlq.count().await.unwrap(), 3);
        let list = dlq.list(10).await.unwrap();
        assert_eq!(list[0].reason, "reason 4");
        assert_eq!(list[2].reason, "reason 2");
    }
}
