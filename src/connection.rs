//! Connection manager — obtains a broker client, retrying until it succeeds

use crate::broker::{AuditBroker, BrokerConnector};
use crate::error::{AuditError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle of the broker client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Owns the connector and publishes state transitions
pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    interval: Duration,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn BrokerConnector>, interval: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self::with_state(connector, interval, state)
    }

    /// Use an existing state channel so observers created earlier see updates
    pub fn with_state(
        connector: Arc<dyn BrokerConnector>,
        interval: Duration,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            connector,
            interval,
            state,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Build a client, sleeping `interval` between failed attempts
    ///
    /// Never gives up on its own; only cancellation ends the loop early.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<Box<dyn AuditBroker>> {
        tracing::info!(
            transport = self.connector.transport(),
            interval = ?self.interval,
            "Creating audit broker client"
        );

        let mut attempt = 0u64;
        loop {
            if cancel.is_cancelled() {
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(AuditError::Cancelled);
            }

            attempt += 1;
            self.state.send_replace(ConnectionState::Connecting);

            match self.connector.connect().await {
                Ok(broker) => {
                    self.state.send_replace(ConnectionState::Connected);
                    tracing::info!(broker = broker.name(), attempt, "Audit broker client ready");
                    return Ok(broker);
                }
                Err(e) => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    tracing::error!(
                        attempt,
                        error = %e,
                        retry_in = ?self.interval,
                        "Cannot connect to audit broker, create client failed"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(AuditError::Cancelled);
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
