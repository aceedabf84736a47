//! Dispatcher — the single worker draining the audit queue
//!
//! Logs are taken one at a time, enriched and published; the next log is
//! not dequeued until the previous publish resolves. This total
//! serialization is what keeps broker order equal to enqueue order.

use crate::config::AuditSettings;
use crate::connection::ConnectionManager;
use crate::dlq::DlqHandler;
use crate::enrich::enrich;
use crate::error::AuditError;
use crate::id::IdGenerator;
use crate::publisher::{PublishOutcome, PublishStats, Publisher};
use crate::types::AuditLog;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Worker state for one pipeline
pub struct Dispatcher {
    queue: mpsc::Receiver<AuditLog>,
    connection: ConnectionManager,
    settings: AuditSettings,
    ids: Arc<IdGenerator>,
    dlq: Option<Arc<dyn DlqHandler>>,
    stats: Arc<PublishStats>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        queue: mpsc::Receiver<AuditLog>,
        connection: ConnectionManager,
        settings: AuditSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            connection,
            settings,
            ids: Arc::new(IdGenerator::new()),
            dlq: None,
            stats: Arc::default(),
            cancel,
        }
    }

    pub fn with_ids(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_dlq(mut self, dlq: Option<Arc<dyn DlqHandler>>) -> Self {
        self.dlq = dlq;
        self
    }

    pub fn with_stats(mut self, stats: Arc<PublishStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Connect, then drain the queue until cancelled or every sender is gone
    pub async fn run(mut self) {
        let broker = match self.connection.connect(&self.cancel).await {
            Ok(broker) => broker,
            Err(e) => {
                tracing::info!(error = %e, "Audit dispatcher stopped before connecting");
                return;
            }
        };

        let publisher = Publisher::new(broker, &self.settings)
            .with_dlq(self.dlq.clone())
            .with_stats(self.stats.clone());

        tracing::info!(topic = %self.settings.topic, "Audit dispatcher running");

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = self.queue.recv() => next,
            };

            let Some(mut log) = next else {
                tracing::info!("Audit queue closed, dispatcher exiting");
                break;
            };

            enrich(&mut log, &self.settings.log_from, &self.ids);

            match publisher.publish(log, &self.cancel).await {
                Ok(PublishOutcome::Acknowledged { sequence, attempts }) => {
                    tracing::debug!(sequence, attempts, "Audit log published");
                }
                Ok(outcome) => {
                    tracing::debug!(?outcome, "Audit log not published");
                }
                Err(AuditError::Cancelled) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Unexpected audit publish error");
                }
            }
        }

        tracing::info!(stats = ?publisher.stats(), "Audit dispatcher stopped");
    }
}
