//! NATS JetStream audit broker
//!
//! Implements `BrokerConnector` / `AuditBroker` on top of a JetStream
//! stream with file storage and acknowledged publishes.

mod client;
mod config;

pub use client::NatsClient;
pub use config::{NatsAuth, NatsConfig};

use crate::broker::{AuditBroker, BrokerConnector, BrokerMessage};
use crate::config::{AuditSettings, MqSetting};
use crate::error::Result;
use async_trait::async_trait;

/// Transport marker accepted by [`NatsConnector`]
pub const NATS_TRANSPORT: &str = "nats";

/// Builds [`NatsBroker`] clients from a fixed configuration
pub struct NatsConnector {
    config: NatsConfig,
}

impl NatsConnector {
    pub fn new(config: NatsConfig) -> Self {
        Self { config }
    }

    /// Build a connector from queue and pipeline settings
    ///
    /// Fails on settings no retry can fix, such as an unknown auth
    /// mechanism.
    pub fn from_settings(mq: &MqSetting, settings: &AuditSettings) -> Result<Self> {
        Ok(Self::new(NatsConfig::from_settings(mq, settings)?))
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }
}

#[async_trait]
impl BrokerConnector for NatsConnector {
    fn transport(&self) -> &str {
        NATS_TRANSPORT
    }

    async fn connect(&self) -> Result<Box<dyn AuditBroker>> {
        let client = NatsClient::connect(self.config.clone()).await?;
        Ok(Box::new(NatsBroker { client }))
    }
}

/// Connected JetStream broker
pub struct NatsBroker {
    client: NatsClient,
}

impl NatsBroker {
    /// Connect directly, bypassing the connection manager
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let client = NatsClient::connect(config).await?;
        Ok(Self { client })
    }

    /// Get the underlying client
    pub fn client(&self) -> &NatsClient {
        &self.client
    }
}

#[async_trait]
impl AuditBroker for NatsBroker {
    async fn send(&self, message: &BrokerMessage) -> Result<u64> {
        self.client.publish(message).await
    }

    fn name(&self) -> &str {
        NATS_TRANSPORT
    }
}
