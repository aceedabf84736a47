//! Process logging setup
//!
//! Services embedding the pipeline call [`init_logging`] once at startup.
//! `RUST_LOG` takes precedence over the configured level.

use crate::error::{AuditError, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogSettings {
    /// Service name attached to the startup line
    pub service_name: String,

    /// Default level: trace, debug, info, warn, error or off
    pub level: String,

    /// Human-readable output with file and line instead of JSON
    pub develop_mode: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            level: "info".to_string(),
            develop_mode: false,
        }
    }
}

impl LogSettings {
    /// Parse the configured level
    pub fn level_filter(&self) -> Result<LevelFilter> {
        self.level
            .parse::<LevelFilter>()
            .map_err(|e| AuditError::Logging(format!("invalid log level '{}': {}", self.level, e)))
    }
}

/// Install the global tracing subscriber
///
/// Fails if the level is invalid or a subscriber is already installed.
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let level = settings.level_filter()?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let installed = if settings.develop_mode {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init()
    };
    installed.map_err(|e| AuditError::Logging(e.to_string()))?;

    tracing::info!(
        service = %settings.service_name,
        level = %level,
        develop_mode = settings.develop_mode,
        "Logging initialized"
    );
    Ok(())
}
