//! Pipeline and broker configuration
//!
//! All settings deserialize with camelCase keys and fall back to
//! defaults for anything omitted.

use crate::error::{AuditError, Result};
use crate::types::{AuditLogFrom, AUDIT_TOPIC};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable that disables the pipeline for test harnesses
pub const BYPASS_ENV: &str = "AUDIT_MODE_UT";

/// Broker credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqAuthSetting {
    #[serde(default)]
    pub username: String,

    /// Never written back out
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Authentication mechanism: `PLAIN`, `TOKEN`, `NKEY` or `NONE`
    #[serde(default)]
    pub mechanism: String,
}

/// Message queue connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqSetting {
    /// Transport marker; must name the connector's transport
    pub mq_type: String,
    pub mq_host: String,
    pub mq_port: u16,
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub auth: MqAuthSetting,
}

impl Default for MqSetting {
    fn default() -> Self {
        Self {
            mq_type: "nats".to_string(),
            mq_host: "127.0.0.1".to_string(),
            mq_port: 4222,
            tenant: String::new(),
            auth: MqAuthSetting::default(),
        }
    }
}

impl MqSetting {
    /// Server address as `nats://host:port`
    pub fn server_addr(&self) -> String {
        format!("nats://{}:{}", self.mq_host, self.mq_port)
    }
}

/// How published logs are spread over the topic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Partitioning {
    /// Every log goes to the topic itself; the broker keeps producer order
    #[default]
    Single,
    /// Each log goes to a randomly chosen `<topic>.<n>` partition
    ///
    /// Logs on different partitions may be reordered by consumers.
    Random { partitions: u32 },
}

/// Audit pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditSettings {
    /// Topic audit logs are published to
    pub topic: String,

    /// JetStream stream backing the topic
    pub stream_name: String,

    /// Queue slots between producers and the dispatcher
    pub queue_capacity: usize,

    /// Fixed delay between connection and publish retries (milliseconds)
    pub recover_interval_ms: u64,

    /// Low-level send retries within one publish attempt
    pub max_producer_retry: u32,

    /// Outstanding broker requests allowed at once
    pub max_open_requests: usize,

    /// Replicas that must hold a log before the broker acknowledges it
    pub replicas: usize,

    pub partitioning: Partitioning,

    /// Provenance stamped onto every log
    pub log_from: AuditLogFrom,

    /// When set the pipeline never starts and records are discarded
    pub bypass: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            topic: AUDIT_TOPIC.to_string(),
            stream_name: "AUDIT_LOG".to_string(),
            queue_capacity: 1000,
            recover_interval_ms: 2 * 60 * 1000,
            max_producer_retry: 5,
            max_open_requests: 1,
            replicas: 1,
            partitioning: Partitioning::Single,
            log_from: AuditLogFrom::default(),
            bypass: false,
        }
    }
}

impl AuditSettings {
    /// Defaults with the environment bypass toggle applied
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Apply the `AUDIT_MODE_UT` bypass toggle
    pub fn with_env(mut self) -> Self {
        if std::env::var(BYPASS_ENV).map(|v| v == "true").unwrap_or(false) {
            self.bypass = true;
        }
        self
    }

    pub fn recover_interval(&self) -> Duration {
        Duration::from_millis(self.recover_interval_ms)
    }

    /// Stream subjects covering the topic and its partitions
    pub fn stream_subjects(&self) -> Vec<String> {
        match self.partitioning {
            Partitioning::Single => vec![self.topic.clone()],
            Partitioning::Random { .. } => {
                vec![self.topic.clone(), format!("{}.*", self.topic)]
            }
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(AuditError::Config("topic must not be empty".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(AuditError::Config(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if self.max_open_requests != 1 {
            return Err(AuditError::Config(format!(
                "max open requests must be 1 to keep retries ordered, got {}",
                self.max_open_requests
            )));
        }
        if self.replicas == 0 {
            return Err(AuditError::Config("replicas must be at least 1".to_string()));
        }
        if let Partitioning::Random { partitions } = self.partitioning {
            if partitions == 0 {
                return Err(AuditError::Config(
                    "random partitioning needs at least one partition".to_string(),
                ));
            }
        }
        Ok(())
    }
}
