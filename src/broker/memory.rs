//! In-memory broker for testing and single-process use
//!
//! Keeps every acknowledged message in a `Vec`. Failures can be scripted
//! for both sends and connects so retry behavior is testable without a
//! real broker.

use super::{AuditBroker, BrokerConnector, BrokerMessage};
use crate::error::{AuditError, Result};
use crate::types::AuditLog;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Transport marker accepted by [`MemoryConnector`]
pub const MEMORY_TRANSPORT: &str = "memory";

#[derive(Default)]
struct BrokerState {
    messages: Mutex<Vec<BrokerMessage>>,
    attempts: AtomicUsize,
    fail_remaining: AtomicUsize,
    sequence: AtomicU64,
}

/// In-memory broker
///
/// Cheap to clone; clones share the same message log.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` sends
    pub fn fail_next(&self, n: usize) {
        self.state.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Acknowledged messages, in acknowledgment order
    pub fn messages(&self) -> Vec<BrokerMessage> {
        self.state
            .messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Acknowledged payloads decoded back into logs
    pub fn logs(&self) -> Vec<AuditLog> {
        self.messages()
            .iter()
            .filter_map(|m| serde_json::from_slice(&m.payload).ok())
            .collect()
    }

    /// Number of acknowledged messages
    pub fn len(&self) -> usize {
        self.state.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total send calls, failed ones included
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` messages are acknowledged
    ///
    /// Returns false if `timeout` elapses first.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.len() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

#[async_trait]
impl AuditBroker for MemoryBroker {
    async fn send(&self, message: &BrokerMessage) -> Result<u64> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .state
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AuditError::Publish {
                topic: message.topic.clone(),
                reason: "memory broker: injected failure".to_string(),
            });
        }

        let mut messages = self.state.messages.lock().map_err(|e| AuditError::Publish {
            topic: message.topic.clone(),
            reason: format!("memory broker lock poisoned: {}", e),
        })?;
        messages.push(message.clone());
        let sequence = self.state.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::debug!(
            msg_id = %message.msg_id,
            subject = %message.subject(),
            sequence,
            "Audit log stored in memory broker"
        );

        Ok(sequence)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[derive(Default)]
struct ConnectorState {
    attempts: AtomicUsize,
    fail_remaining: AtomicUsize,
}

/// Connector handing out a shared [`MemoryBroker`]
///
/// Cheap to clone; clones share attempt counters.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    broker: MemoryBroker,
    state: Arc<ConnectorState>,
}

impl MemoryConnector {
    pub fn new(broker: MemoryBroker) -> Self {
        Self {
            broker,
            state: Arc::default(),
        }
    }

    /// Fail the next `n` connects
    pub fn fail_next(&self, n: usize) {
        self.state.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Total connect calls, failed ones included
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// The broker handed to connected clients
    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }
}

#[async_trait]
impl BrokerConnector for MemoryConnector {
    fn transport(&self) -> &str {
        MEMORY_TRANSPORT
    }

    async fn connect(&self) -> Result<Box<dyn AuditBroker>> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .state
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AuditError::Connection(
                "memory broker: injected connect failure".to_string(),
            ));
        }

        Ok(Box::new(self.broker.clone()))
    }
}
