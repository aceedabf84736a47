//! Publisher — serialize once, send until acknowledged

use crate::broker::{AuditBroker, BrokerMessage};
use crate::config::{AuditSettings, Partitioning};
use crate::dlq::{DeadLetterLog, DlqHandler};
use crate::error::{AuditError, Result};
use crate::types::AuditLog;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Counters shared between the publisher and the pipeline handle
#[derive(Debug, Default)]
pub struct PublishStats {
    published: AtomicU64,
    retries: AtomicU64,
    dead_lettered: AtomicU64,
    dropped: AtomicU64,
}

impl PublishStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PublishStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Logs acknowledged by the broker
    pub published: u64,
    /// Failed send attempts that were retried
    pub retries: u64,
    /// Logs handed to the dead letter handler
    pub dead_lettered: u64,
    /// Logs discarded because they could not be serialized
    pub dropped: u64,
}

/// What happened to a log handed to [`Publisher::publish`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Stored by the broker after `attempts` sends
    Acknowledged { sequence: u64, attempts: u64 },
    /// Unserializable, passed to the dead letter handler
    DeadLettered,
    /// Unserializable and no handler configured
    Dropped,
}

/// Sends enriched logs to the broker, one at a time
pub struct Publisher {
    broker: Box<dyn AuditBroker>,
    topic: String,
    partitioning: Partitioning,
    interval: Duration,
    dlq: Option<Arc<dyn DlqHandler>>,
    stats: Arc<PublishStats>,
}

impl Publisher {
    pub fn new(broker: Box<dyn AuditBroker>, settings: &AuditSettings) -> Self {
        Self {
            broker,
            topic: settings.topic.clone(),
            partitioning: settings.partitioning,
            interval: settings.recover_interval(),
            dlq: None,
            stats: Arc::default(),
        }
    }

    pub fn with_dlq(mut self, dlq: Option<Arc<dyn DlqHandler>>) -> Self {
        self.dlq = dlq;
        self
    }

    pub fn with_stats(mut self, stats: Arc<PublishStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Serialize a log and pick its partition
    pub fn message(&self, log: &AuditLog) -> Result<BrokerMessage> {
        let payload = serde_json::to_vec(log)?;
        let partition = match self.partitioning {
            Partitioning::Single => None,
            Partitioning::Random { partitions } => {
                Some(rand::rng().random_range(0..partitions.max(1)))
            }
        };

        Ok(BrokerMessage {
            topic: self.topic.clone(),
            partition,
            msg_id: log.id.clone(),
            payload: payload.into(),
        })
    }

    /// Publish a log, retrying the identical message until acknowledged
    ///
    /// Only returns an error when `cancel` fires; transient failures never
    /// surface to the caller.
    pub async fn publish(&self, log: AuditLog, cancel: &CancellationToken) -> Result<PublishOutcome> {
        let message = match self.message(&log) {
            Ok(message) => message,
            Err(e) => return Ok(self.reject(log, e).await),
        };

        tracing::info!(
            log_id = %log.id,
            payload = %String::from_utf8_lossy(&message.payload),
            "audit log"
        );

        let mut attempts = 0u64;
        loop {
            attempts += 1;

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(AuditError::Cancelled),
                result = self.broker.send(&message) => result,
            };

            match result {
                Ok(sequence) => {
                    self.stats.published.fetch_add(1, Ordering::Relaxed);
                    return Ok(PublishOutcome::Acknowledged { sequence, attempts });
                }
                Err(e) => {
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        log_id = %log.id,
                        subject = %message.subject(),
                        attempt = attempts,
                        error = %e,
                        retry_in = ?self.interval,
                        "Send audit log failed, will try again"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(AuditError::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Route a log that can never be published
    async fn reject(&self, log: AuditLog, err: AuditError) -> PublishOutcome {
        tracing::error!(log_id = %log.id, error = %err, "Marshal audit log failed");

        let Some(dlq) = &self.dlq else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return PublishOutcome::Dropped;
        };

        match dlq.handle(DeadLetterLog::new(log, err.to_string())).await {
            Ok(()) => {
                self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                PublishOutcome::DeadLettered
            }
            Err(e) => {
                tracing::error!(error = %e, "Dead letter handler failed, audit log dropped");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                PublishOutcome::Dropped
            }
        }
    }
}
