//! Broker abstraction — where published audit logs end up
//!
//! A `BrokerConnector` builds a client; the resulting `AuditBroker` sends
//! one message at a time and resolves only once the broker has
//! acknowledged it. NATS JetStream is the production backend; the
//! in-memory broker serves tests and local development.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

pub mod memory;
pub mod nats;

/// A serialized audit log ready for the broker
///
/// Built once per log; retries resend the same message unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Topic the message belongs to
    pub topic: String,

    /// Partition within the topic, `None` for the topic itself
    pub partition: Option<u32>,

    /// Deduplication id (the log id)
    pub msg_id: String,

    /// JSON payload
    pub payload: Bytes,
}

impl BrokerMessage {
    /// Subject the message is sent on: `<topic>` or `<topic>.<partition>`
    pub fn subject(&self) -> String {
        match self.partition {
            Some(partition) => format!("{}.{}", self.topic, partition),
            None => self.topic.clone(),
        }
    }
}

/// A connected broker client
#[async_trait]
pub trait AuditBroker: Send + Sync {
    /// Send a message and wait for the acknowledgment
    ///
    /// Returns the broker-assigned sequence number. Implementations may
    /// retry internally a bounded number of times before failing.
    async fn send(&self, message: &BrokerMessage) -> Result<u64>;

    /// Backend name (e.g., "nats", "memory")
    fn name(&self) -> &str;
}

/// Builds broker clients
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Transport marker settings must carry to use this connector
    fn transport(&self) -> &str;

    /// Construct a client; failures are retried by the connection manager
    async fn connect(&self) -> Result<Box<dyn AuditBroker>>;
}
