//! Audit pipeline handle and producer API
//!
//! `AuditPipeline` owns the bounded queue and starts the dispatcher
//! exactly once. Producers hold cheap `AuditRecorder` clones; recording
//! blocks while the queue is full instead of dropping logs.

use crate::broker::nats::{NatsConnector, NATS_TRANSPORT};
use crate::broker::BrokerConnector;
use crate::config::{AuditSettings, MqSetting};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::dispatcher::Dispatcher;
use crate::dlq::DlqHandler;
use crate::error::{AuditError, Result};
use crate::id::IdGenerator;
use crate::publisher::{PublishStats, StatsSnapshot};
use crate::types::{AuditLog, AuditObject, AuditOperator, Level, LogType, Status};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Name of the dispatcher thread
pub const WORKER_THREAD: &str = "audit-dispatcher";

/// Pieces handed to the dispatcher when the pipeline starts
struct Pending {
    queue: mpsc::Receiver<AuditLog>,
    state: watch::Sender<ConnectionState>,
}

/// Audit pipeline handle
///
/// Created idle: logs recorded before [`AuditPipeline::init`] wait in the
/// queue. `init` starts the dispatcher on a dedicated thread the first
/// time it succeeds and is a no-op afterwards. A bypassed or
/// misconfigured pipeline discards every log and never touches a broker.
pub struct AuditPipeline {
    settings: AuditSettings,
    sender: mpsc::Sender<AuditLog>,
    pending: Mutex<Option<Pending>>,
    started: AtomicBool,
    disabled: Arc<AtomicBool>,
    state: watch::Receiver<ConnectionState>,
    stats: Arc<PublishStats>,
    ids: Arc<IdGenerator>,
    dlq: Option<Arc<dyn DlqHandler>>,
    cancel: CancellationToken,
}

impl AuditPipeline {
    /// Create an idle pipeline
    pub fn new(settings: AuditSettings) -> Self {
        let (sender, queue) = mpsc::channel(settings.queue_capacity.max(1));
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);

        Self {
            disabled: Arc::new(AtomicBool::new(settings.bypass)),
            settings,
            sender,
            pending: Mutex::new(Some(Pending {
                queue,
                state: state_tx,
            })),
            started: AtomicBool::new(false),
            state,
            stats: Arc::default(),
            ids: Arc::new(IdGenerator::new()),
            dlq: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Route unserializable logs to `dlq` instead of dropping them
    pub fn with_dlq(mut self, dlq: Arc<dyn DlqHandler>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    /// Start the pipeline against NATS JetStream
    ///
    /// Returns true if this call started the dispatcher.
    pub fn init(&self, mq: &MqSetting) -> bool {
        if !self.may_start() {
            return false;
        }

        if mq.mq_type != NATS_TRANSPORT {
            self.disable(format!(
                "audit init failed, mq type is not {}, mq type is {}",
                NATS_TRANSPORT, mq.mq_type
            ));
            return false;
        }

        match NatsConnector::from_settings(mq, &self.settings) {
            Ok(connector) => self.init_with_connector(mq, Arc::new(connector)),
            Err(e) => {
                self.disable(format!("audit init failed: {}", e));
                false
            }
        }
    }

    /// Start the pipeline with a caller-supplied connector
    ///
    /// `mq.mq_type` must equal the connector's transport marker.
    pub fn init_with_connector(&self, mq: &MqSetting, connector: Arc<dyn BrokerConnector>) -> bool {
        if !self.may_start() {
            return false;
        }

        if mq.mq_type != connector.transport() {
            self.disable(format!(
                "audit init failed, mq type is not {}, mq type is {}",
                connector.transport(),
                mq.mq_type
            ));
            return false;
        }

        if let Err(e) = self.settings.validate() {
            self.disable(format!("audit init failed: {}", e));
            return false;
        }

        let pending = match self.pending.lock() {
            Ok(mut pending) => pending.take(),
            Err(e) => {
                tracing::error!(error = %e, "Audit pipeline lock poisoned");
                return false;
            }
        };
        let Some(pending) = pending else {
            tracing::debug!("Audit pipeline already initialized");
            return false;
        };

        let connection = ConnectionManager::with_state(
            connector,
            self.settings.recover_interval(),
            pending.state,
        );
        let dispatcher = Dispatcher::new(
            pending.queue,
            connection,
            self.settings.clone(),
            self.cancel.clone(),
        )
        .with_ids(self.ids.clone())
        .with_dlq(self.dlq.clone())
        .with_stats(self.stats.clone());

        match spawn_worker(dispatcher) {
            Ok(()) => {
                self.started.store(true, Ordering::SeqCst);
                tracing::info!(
                    transport = %mq.mq_type,
                    host = %mq.mq_host,
                    port = mq.mq_port,
                    topic = %self.settings.topic,
                    "Audit pipeline started"
                );
                true
            }
            Err(e) => {
                self.disable(format!("audit init failed: {}", e));
                false
            }
        }
    }

    /// Get a recorder for producers
    pub fn recorder(&self) -> AuditRecorder {
        AuditRecorder {
            sender: self.sender.clone(),
            disabled: self.disabled.clone(),
        }
    }

    /// Whether the pipeline discards logs
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Whether the dispatcher has been started
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Current broker connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch broker connection state transitions
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Publish counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn settings(&self) -> &AuditSettings {
        &self.settings
    }

    /// Abandon connection and publish retries and stop the dispatcher
    ///
    /// Logs still queued are not drained. Before `init` the queue is
    /// closed, so producers waiting for a slot get [`AuditError::QueueClosed`].
    pub fn shutdown(&self) {
        tracing::info!("Audit pipeline shutting down");
        self.cancel.cancel();
        self.close_queue();
    }

    fn may_start(&self) -> bool {
        if self.settings.bypass {
            tracing::info!("Audit pipeline bypassed, not starting");
            return false;
        }
        if self.is_disabled() {
            tracing::debug!("Audit pipeline disabled, ignoring init");
            return false;
        }
        if self.cancel.is_cancelled() {
            tracing::debug!("Audit pipeline shut down, ignoring init");
            return false;
        }
        // A running pipeline must not be disabled by a later, bad init
        if self.is_started() {
            tracing::debug!("Audit pipeline already initialized");
            return false;
        }
        true
    }

    fn disable(&self, reason: String) {
        self.disabled.store(true, Ordering::SeqCst);
        self.close_queue();
        tracing::error!(reason = %reason, "Audit pipeline disabled");
    }

    /// Drop the undelivered receiver, failing producers blocked on a full queue
    fn close_queue(&self) {
        match self.pending.lock() {
            Ok(mut pending) => {
                if pending.take().is_some() {
                    tracing::debug!("Audit queue closed before the dispatcher started");
                }
            }
            Err(e) => tracing::error!(error = %e, "Audit pipeline lock poisoned"),
        }
    }
}

/// Run the dispatcher on its own thread with a current-thread runtime
fn spawn_worker(dispatcher: Dispatcher) -> Result<()> {
    std::thread::Builder::new()
        .name(WORKER_THREAD.to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to build audit dispatcher runtime");
                    return;
                }
            };
            runtime.block_on(dispatcher.run());
        })
        .map(|_| ())
        .map_err(|e| AuditError::Config(format!("failed to spawn {}: {}", WORKER_THREAD, e)))
}

/// Producer handle for submitting audit logs
///
/// Cheap to clone. Every submit waits for a free queue slot.
#[derive(Clone)]
pub struct AuditRecorder {
    sender: mpsc::Sender<AuditLog>,
    disabled: Arc<AtomicBool>,
}

impl AuditRecorder {
    /// Queue a log, waiting while the queue is full
    pub async fn submit(&self, log: AuditLog) -> Result<()> {
        if self.discard(&log) {
            return Ok(());
        }
        self.sender.send(log).await.map_err(|_| AuditError::QueueClosed)
    }

    /// Queue a log from synchronous code, blocking the thread while full
    ///
    /// Must not be called from within an async runtime.
    pub fn submit_blocking(&self, log: AuditLog) -> Result<()> {
        if self.discard(&log) {
            return Ok(());
        }
        self.sender
            .blocking_send(log)
            .map_err(|_| AuditError::QueueClosed)
    }

    /// Build and queue a log
    ///
    /// `Info` logs always record success; `Warn` logs default to failure
    /// when `status` is `None`.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        level: Level,
        log_type: LogType,
        operation: &str,
        operator: AuditOperator,
        object: AuditObject,
        status: Option<Status>,
        detail: HashMap<String, String>,
    ) -> Result<()> {
        let log = AuditLog::new(log_type, level, operation, operator, object, status, detail);
        self.submit(log).await
    }

    /// Queue an info-level success log
    pub async fn info(
        &self,
        log_type: LogType,
        operation: &str,
        operator: AuditOperator,
        object: AuditObject,
        detail: &str,
    ) -> Result<()> {
        self.submit(AuditLog::info(log_type, operation, operator, object, detail))
            .await
    }

    /// Queue a warn-level log with an explicit status
    pub async fn warn(
        &self,
        log_type: LogType,
        operation: &str,
        operator: AuditOperator,
        object: AuditObject,
        status: Status,
        detail: &str,
    ) -> Result<()> {
        self.submit(AuditLog::warn(log_type, operation, operator, object, status, detail))
            .await
    }

    /// Queue a warn-level failure log describing `err`
    ///
    /// The log is built before the returned future is polled, so `err`
    /// need not outlive the call.
    pub fn warn_with_error(
        &self,
        log_type: LogType,
        operation: &str,
        operator: AuditOperator,
        object: AuditObject,
        err: &dyn std::error::Error,
    ) -> impl Future<Output = Result<()>> + Send + '_ {
        let log = AuditLog::warn_with_error(log_type, operation, operator, object, err);
        self.submit(log)
    }

    fn discard(&self, log: &AuditLog) -> bool {
        if self.disabled.load(Ordering::SeqCst) {
            tracing::debug!(operation = %log.operation, "Audit pipeline disabled, log discarded");
            return true;
        }
        false
    }
}

static GLOBAL: OnceLock<AuditPipeline> = OnceLock::new();

/// Process-wide pipeline
///
/// Created on first use from default settings plus the `AUDIT_MODE_UT`
/// toggle unless [`install_global`] ran first.
pub fn global() -> &'static AuditPipeline {
    GLOBAL.get_or_init(|| AuditPipeline::new(AuditSettings::from_env()))
}

/// Make `pipeline` the process-wide pipeline
///
/// Fails, handing the pipeline back, if one is already in place.
pub fn install_global(pipeline: AuditPipeline) -> std::result::Result<(), AuditPipeline> {
    GLOBAL.set(pipeline)
}

/// Start the process-wide pipeline; see [`AuditPipeline::init`]
pub fn init(mq: &MqSetting) -> bool {
    global().init(mq)
}

/// Recorder for the process-wide pipeline
pub fn recorder() -> AuditRecorder {
    global().recorder()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::{MemoryConnector, MEMORY_TRANSPORT};
    use std::time::Duration;

    fn settings() -> AuditSettings {
        AuditSettings {
            recover_interval_ms: 5,
            queue_capacity: 16,
            ..Default::default()
        }
    }

    fn memory_mq() -> MqSetting {
        MqSetting {
            mq_type: MEMORY_TRANSPORT.to_string(),
            ..Default::default()
        }
    }

    fn object(name: &str) -> AuditObject {
        AuditObject::new("connector", "", name)
    }

    #[tokio::test]
    async fn test_init_starts_once() {
        let pipeline = AuditPipeline::new(settings());
        let connector = MemoryConnector::default();

        assert!(!pipeline.is_started());
        assert!(pipeline.init_with_connector(&memory_mq(), Arc::new(connector.clone())));
        assert!(pipeline.is_started());
        assert!(!pipeline.init_with_connector(&memory_mq(), Arc::new(connector.clone())));

        pipeline
            .recorder()
            .info(LogType::Operation, "create", AuditOperator::default(), object("a"), "")
            .await
            .unwrap();

        assert!(connector.broker().wait_for(1, Duration::from_secs(2)).await);
        assert_eq!(connector.attempts(), 1);
        assert_eq!(pipeline.connection_state(), ConnectionState::Connected);
        pipeline.shutdown();
    }

    #[tokio::test]
    async fn test_wrong_transport_disables() {
        let pipeline = AuditPipeline::new(settings());
        let connector = MemoryConnector::default();
        let mq = MqSetting {
            mq_type: "kafka".to_string(),
            ..Default::default()
        };

        assert!(!pipeline.init_with_connector(&mq, Arc::new(connector.clone())));
        assert!(pipeline.is_disabled());
        assert!(!pipeline.is_started());

        // disabled for good, even with matching settings
        assert!(!pipeline.init_with_connector(&memory_mq(), Arc::new(connector.clone())));

        pipeline
            .recorder()
            .info(LogType::Operation, "create", AuditOperator::default(), object("a"), "")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(connector.attempts(), 0);
        assert!(connector.broker().is_empty());
    }

    #[tokio::test]
    async fn test_bad_reinit_keeps_running_pipeline() {
        let pipeline = AuditPipeline::new(settings());
        let connector = MemoryConnector::default();
        assert!(pipeline.init_with_connector(&memory_mq(), Arc::new(connector.clone())));

        let recorder = pipeline.recorder();
        recorder
            .info(LogType::Operation, "create", AuditOperator::default(), object("before"), "")
            .await
            .unwrap();
        assert!(connector.broker().wait_for(1, Duration::from_secs(2)).await);

        let kafka = MqSetting {
            mq_type: "kafka".to_string(),
            ..Default::default()
        };
        assert!(!pipeline.init(&kafka));
        assert!(!pipeline.init_with_connector(&kafka, Arc::new(MemoryConnector::default())));
        assert!(!pipeline.is_disabled());

        recorder
            .info(LogType::Operation, "create", AuditOperator::default(), object("after"), "")
            .await
            .unwrap();
        assert!(connector.broker().wait_for(2, Duration::from_secs(2)).await);
        assert_eq!(connector.broker().logs()[1].object.name, "after");
        pipeline.shutdown();
    }

    #[tokio::test]
    async fn test_failed_init_releases_blocked_producer() {
        let pipeline = AuditPipeline::new(AuditSettings {
            queue_capacity: 1,
            ..settings()
        });
        let recorder = pipeline.recorder();
        recorder
            .info(LogType::Operation, "create", AuditOperator::default(), object("a"), "")
            .await
            .unwrap();

        let blocked = recorder.clone();
        let producer = tokio::spawn(async move {
            blocked
                .info(LogType::Operation, "create", AuditOperator::default(), object("b"), "")
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        let kafka = MqSetting {
            mq_type: "kafka".to_string(),
            ..Default::default()
        };
        assert!(!pipeline.init_with_connector(&kafka, Arc::new(MemoryConnector::default())));

        let result = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("blocked producer should be released")
            .unwrap();
        assert!(matches!(result, Err(AuditError::QueueClosed)));

        // Later records are discarded rather than blocking
        recorder
            .info(LogType::Operation, "create", AuditOperator::default(), object("c"), "")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_init_releases_blocked_producer() {
        let pipeline = AuditPipeline::new(AuditSettings {
            queue_capacity: 1,
            ..settings()
        });
        let recorder = pipeline.recorder();
        recorder
            .info(LogType::Operation, "create", AuditOperator::default(), object("a"), "")
            .await
            .unwrap();

        let blocked = recorder.clone();
        let producer = tokio::spawn(async move {
            blocked
                .info(LogType::Operation, "create", AuditOperator::default(), object("b"), "")
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        pipeline.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("blocked producer should be released")
            .unwrap();
        assert!(matches!(result, Err(AuditError::QueueClosed)));

        let connector = MemoryConnector::default();
        assert!(!pipeline.init_with_connector(&memory_mq(), Arc::new(connector.clone())));
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_nats_init_rejects_other_transport() {
        let pipeline = AuditPipeline::new(settings());
        let mq = MqSetting {
            mq_type: "kafka".to_string(),
            ..Default::default()
        };
        assert!(!pipeline.init(&mq));
        assert!(pipeline.is_disabled());
    }

    #[tokio::test]
    async fn test_nats_init_rejects_unknown_mechanism() {
        let pipeline = AuditPipeline::new(settings());
        let mut mq = MqSetting::default();
        mq.auth.mechanism = "GSSAPI".to_string();

        assert!(!pipeline.init(&mq));
        assert!(pipeline.is_disabled());
    }

    #[tokio::test]
    async fn test_invalid_settings_disable() {
        let pipeline = AuditPipeline::new(AuditSettings {
            max_open_requests: 4,
            ..settings()
        });
        assert!(!pipeline.init_with_connector(&memory_mq(), Arc::new(MemoryConnector::default())));
        assert!(pipeline.is_disabled());
    }

    #[tokio::test]
    async fn test_bypass_never_connects() {
        let pipeline = AuditPipeline::new(AuditSettings {
            bypass: true,
            ..settings()
        });
        let connector = MemoryConnector::default();

        assert!(pipeline.is_disabled());
        assert!(!pipeline.init_with_connector(&memory_mq(), Arc::new(connector.clone())));
        assert!(!pipeline.is_started());

        for i in 0..100 {
            pipeline
                .recorder()
                .info(LogType::Login, "login", AuditOperator::default(), object(&i.to_string()), "")
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(connector.attempts(), 0);
        assert_eq!(connector.broker().attempts(), 0);
    }

    #[tokio::test]
    async fn test_logs_recorded_before_init_are_delivered() {
        let pipeline = AuditPipeline::new(settings());
        let recorder = pipeline.recorder();

        recorder
            .info(LogType::Operation, "create", AuditOperator::default(), object("early"), "")
            .await
            .unwrap();

        let connector = MemoryConnector::default();
        assert!(pipeline.init_with_connector(&memory_mq(), Arc::new(connector.clone())));
        assert!(connector.broker().wait_for(1, Duration::from_secs(2)).await);
        assert_eq!(connector.broker().logs()[0].object.name, "early");
        pipeline.shutdown();
    }

    #[tokio::test]
    async fn test_record_applies_level_rules() {
        let pipeline = AuditPipeline::new(settings());
        let connector = MemoryConnector::default();
        assert!(pipeline.init_with_connector(&memory_mq(), Arc::new(connector.clone())));
        let recorder = pipeline.recorder();

        recorder
            .record(
                Level::Warn,
                LogType::Management,
                "stop",
                AuditOperator::default(),
                object("job"),
                None,
                HashMap::new(),
            )
            .await
            .unwrap();
        recorder
            .warn(
                LogType::Management,
                "start",
                AuditOperator::default(),
                object("job"),
                Status::Success,
                "restarted",
            )
            .await
            .unwrap();

        assert!(connector.broker().wait_for(2, Duration::from_secs(2)).await);
        let logs = connector.broker().logs();
        assert_eq!(logs[0].description, "stop connector job failed");
        assert_eq!(logs[0].detail["status"], "failed");
        assert_eq!(logs[1].description, "start connector job success");
        assert_eq!(logs[1].detail["detail"], "restarted");
        assert_eq!(pipeline.stats().published, 2);
        pipeline.shutdown();
    }

    #[test]
    fn test_submit_blocking_from_plain_thread() {
        let pipeline = AuditPipeline::new(settings());
        let connector = MemoryConnector::default();
        assert!(pipeline.init_with_connector(&memory_mq(), Arc::new(connector.clone())));

        let recorder = pipeline.recorder();
        std::thread::spawn(move || {
            let log = AuditLog::info(
                LogType::Operation,
                "create",
                AuditOperator::default(),
                AuditObject::new("connector", "", "sync"),
                "",
            );
            recorder.submit_blocking(log).unwrap();
        })
        .join()
        .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while connector.broker().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(connector.broker().logs()[0].object.name, "sync");
        pipeline.shutdown();
    }
}
