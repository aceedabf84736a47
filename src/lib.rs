//! # a3s-audit
//!
//! Ordered, backpressured audit-log emission to a durable broker.
//!
//! ## Overview
//!
//! Services record audit logs (who did what to which object, and whether
//! it worked). Logs go onto a bounded queue; a single dispatcher thread
//! enriches each one with an id, description and provenance, then
//! publishes it and waits for the broker's acknowledgment before taking
//! the next. Broker outages stall the dispatcher rather than lose logs,
//! and a full queue blocks producers rather than drop them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_audit::{AuditObject, AuditOperator, AuditPipeline, AuditSettings, LogType, MqSetting};
//!
//! # async fn example() -> a3s_audit::Result<()> {
//! let pipeline = AuditPipeline::new(AuditSettings::from_env());
//! pipeline.init(&MqSetting {
//!     mq_host: "nats.internal".to_string(),
//!     ..Default::default()
//! });
//!
//! let recorder = pipeline.recorder();
//! recorder
//!     .info(
//!         LogType::Operation,
//!         a3s_audit::operation::CREATE,
//!         AuditOperator::default(),
//!         AuditObject::new("connector", "c-1", "foo"),
//!         "connector created",
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **AuditRecorder** — producer handle; waits for a queue slot
//! - **Dispatcher** — single sequential worker: dequeue, enrich, publish
//! - **Publisher** — retries the identical message until acknowledged
//! - **ConnectionManager** — builds the broker client, retrying forever
//! - **AuditBroker** / **BrokerConnector** — broker backends (NATS, memory)

pub mod broker;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod dlq;
pub mod enrich;
pub mod error;
pub mod id;
pub mod logging;
pub mod pipeline;
pub mod publisher;
pub mod types;

// Re-export core types
pub use broker::{AuditBroker, BrokerConnector, BrokerMessage};
pub use config::{AuditSettings, MqAuthSetting, MqSetting, Partitioning, BYPASS_ENV};
pub use connection::{ConnectionManager, ConnectionState};
pub use dispatcher::Dispatcher;
pub use dlq::{DeadLetterLog, DlqHandler, MemoryDlqHandler};
pub use enrich::{describe, enrich};
pub use error::{AuditError, Result};
pub use id::IdGenerator;
pub use logging::{init_logging, LogSettings};
pub use pipeline::{AuditPipeline, AuditRecorder};
pub use publisher::{PublishOutcome, Publisher, StatsSnapshot};
pub use types::{
    operation, AuditLog, AuditLogFrom, AuditLogFromService, AuditObject, AuditOperator,
    AuditOperatorAgent, Level, LogType, Status, Visitor, VisitorType, AUDIT_TOPIC,
};

// Re-export brokers for convenience
pub use broker::memory::{MemoryBroker, MemoryConnector};
pub use broker::nats::{NatsAuth, NatsBroker, NatsConfig, NatsConnector};
