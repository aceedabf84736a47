//! NATS connection and stream configuration

use crate::config::{AuditSettings, MqAuthSetting, MqSetting};
use crate::error::{AuditError, Result};
use std::fmt;

/// How the client authenticates to the NATS server
#[derive(Clone, PartialEq, Eq)]
pub enum NatsAuth {
    None,
    UserPassword { user: String, password: String },
    Token(String),
    NKey(String),
}

impl NatsAuth {
    /// Map a mechanism name and credentials onto a NATS auth method
    ///
    /// `PLAIN` uses username/password, `TOKEN` and `NKEY` take the password
    /// as the token or seed, `NONE` (or empty) connects anonymously.
    pub fn from_setting(auth: &MqAuthSetting) -> Result<Self> {
        match auth.mechanism.trim().to_ascii_uppercase().as_str() {
            "" | "NONE" => Ok(Self::None),
            "PLAIN" => Ok(Self::UserPassword {
                user: auth.username.clone(),
                password: auth.password.clone(),
            }),
            "TOKEN" => Ok(Self::Token(auth.password.clone())),
            "NKEY" => Ok(Self::NKey(auth.password.clone())),
            other => Err(AuditError::Config(format!(
                "unsupported auth mechanism '{}'",
                other
            ))),
        }
    }
}

impl fmt::Debug for NatsAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NatsAuth::None => f.write_str("None"),
            NatsAuth::UserPassword { user, .. } => f
                .debug_struct("UserPassword")
                .field("user", user)
                .field("password", &"***")
                .finish(),
            NatsAuth::Token(_) => f.write_str("Token(***)"),
            NatsAuth::NKey(_) => f.write_str("NKey(***)"),
        }
    }
}

/// Configuration for the JetStream audit client
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Server URL (`nats://host:port`)
    pub url: String,

    pub auth: NatsAuth,

    /// JetStream stream name
    pub stream_name: String,

    /// Subjects captured by the stream
    pub subjects: Vec<String>,

    /// Stream replicas; acks are sent once all of them hold the message
    pub replicas: usize,

    /// Outstanding publishes allowed at once
    pub max_open_requests: usize,

    /// Send retries inside a single publish attempt
    pub max_retries: u32,

    /// Delay between those retries (milliseconds)
    pub retry_backoff_ms: u64,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Request (and publish ack) timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        let settings = AuditSettings::default();
        Self {
            url: MqSetting::default().server_addr(),
            auth: NatsAuth::None,
            stream_name: settings.stream_name.clone(),
            subjects: settings.stream_subjects(),
            replicas: settings.replicas,
            max_open_requests: settings.max_open_requests,
            max_retries: settings.max_producer_retry,
            retry_backoff_ms: 100,
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

impl NatsConfig {
    /// Build from queue and pipeline settings
    pub fn from_settings(mq: &MqSetting, settings: &AuditSettings) -> Result<Self> {
        Ok(Self {
            url: mq.server_addr(),
            auth: NatsAuth::from_setting(&mq.auth)?,
            stream_name: settings.stream_name.clone(),
            subjects: settings.stream_subjects(),
            replicas: settings.replicas,
            max_open_requests: settings.max_open_requests.max(1),
            max_retries: settings.max_producer_retry,
            ..Default::default()
        })
    }
}
