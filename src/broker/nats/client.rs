//! NATS JetStream client — connect, ensure stream, publish with ack

use super::config::{NatsAuth, NatsConfig};
use crate::broker::BrokerMessage;
use crate::error::{AuditError, Result};
use async_nats::jetstream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// NATS JetStream client
///
/// Publishes audit logs and waits for the stream's acknowledgment.
/// Outstanding publishes are capped at `max_open_requests`, so with the
/// default of one a retried message can never overtake the next one.
pub struct NatsClient {
    /// JetStream context
    jetstream: jetstream::Context,

    /// Permits for outstanding publishes
    in_flight: Semaphore,

    /// Configuration
    config: Arc<NatsConfig>,
}

impl NatsClient {
    /// Connect to NATS and make sure the audit stream exists
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let connect_opts = build_connect_options(&config);

        let client = connect_opts
            .connect(config.url.as_str())
            .await
            .map_err(|e| AuditError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, auth = ?config.auth, "Connected to NATS");

        let jetstream = jetstream::new(client);
        ensure_stream(&jetstream, &config).await?;

        Ok(Self {
            jetstream,
            in_flight: Semaphore::new(config.max_open_requests.max(1)),
            config: Arc::new(config),
        })
    }

    /// Publish a message, retrying up to `max_retries` times
    ///
    /// The log id travels as `Nats-Msg-Id`, so a resend after a lost ack
    /// is deduplicated by the stream.
    pub async fn publish(&self, message: &BrokerMessage) -> Result<u64> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|e| AuditError::Connection(format!("publish permits closed: {}", e)))?;

        let subject = message.subject();
        let mut attempt = 0u32;
        loop {
            match self.publish_once(&subject, message).await {
                Ok(sequence) => return Ok(sequence),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        msg_id = %message.msg_id,
                        subject = %subject,
                        attempt,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn publish_once(&self, subject: &str, message: &BrokerMessage) -> Result<u64> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", message.msg_id.as_str());

        let ack = self
            .jetstream
            .publish_with_headers(subject.to_string(), headers, message.payload.clone())
            .await
            .map_err(|e| AuditError::Publish {
                topic: message.topic.clone(),
                reason: e.to_string(),
            })?
            .await
            .map_err(|e| AuditError::Publish {
                topic: message.topic.clone(),
                reason: format!("ack failed: {}", e),
            })?;

        if ack.duplicate {
            tracing::debug!(msg_id = %message.msg_id, "Stream reported duplicate, already stored");
        }

        tracing::debug!(
            msg_id = %message.msg_id,
            subject = %subject,
            stream = %ack.stream,
            sequence = ack.sequence,
            "Audit log acknowledged"
        );

        Ok(ack.sequence)
    }

    /// Get the configuration
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }
}

/// Build NATS connect options from config
fn build_connect_options(config: &NatsConfig) -> async_nats::ConnectOptions {
    let opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    match &config.auth {
        NatsAuth::None => opts,
        NatsAuth::UserPassword { user, password } => {
            opts.user_and_password(user.clone(), password.clone())
        }
        NatsAuth::Token(token) => opts.token(token.clone()),
        NatsAuth::NKey(seed) => opts.nkey(seed.clone()),
    }
}

/// Ensure the audit stream exists with the configured subjects and replicas
async fn ensure_stream(
    js: &jetstream::Context,
    config: &NatsConfig,
) -> Result<jetstream::stream::Stream> {
    let stream_config = jetstream::stream::Config {
        name: config.stream_name.clone(),
        subjects: config.subjects.clone(),
        storage: jetstream::stream::StorageType::File,
        num_replicas: config.replicas,
        retention: jetstream::stream::RetentionPolicy::Limits,
        ..Default::default()
    };

    let stream = js
        .get_or_create_stream(stream_config)
        .await
        .map_err(|e| AuditError::Stream(format!(
            "Failed to create/get stream '{}': {}",
            config.stream_name, e
        )))?;

    tracing::info!(
        stream = %config.stream_name,
        subjects = ?config.subjects,
        replicas = config.replicas,
        "JetStream stream ready"
    );

    Ok(stream)
}
