//! Core audit log types
//!
//! Field names follow the audit topic's wire contract (snake_case, with
//! `type` / `out_biz_id` renames), not the Rust field names.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Default topic audit logs are published to
pub const AUDIT_TOPIC: &str = "isf.audit_log.log";

/// Detail map key holding the caller-supplied free-form text
pub const DETAIL_KEY: &str = "detail";

/// Detail map key the enricher writes the status into
pub const STATUS_KEY: &str = "status";

/// Well-known operation verbs
///
/// Operations are free-form strings on the wire; these cover the verbs
/// services emit most often.
pub mod operation {
    pub const CREATE: &str = "create";
    pub const DELETE: &str = "delete";
    pub const UPDATE: &str = "update";
    pub const START: &str = "start";
    pub const STOP: &str = "stop";
    pub const PAUSE: &str = "pause";
    pub const ROLLOVER: &str = "rollover";
    pub const RECYCLE: &str = "recycle";
    pub const RECOVER: &str = "recover";
}

/// Audit log category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Login,
    Operation,
    Management,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::Login => "login",
            LogType::Operation => "operation",
            LogType::Management => "management",
        }
    }
}

/// Severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Info,
    Warn,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
        }
    }
}

/// Outcome of the audited operation
///
/// Never sent as a top-level field; the enricher folds it into the
/// detail map and the description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The object an operation was performed on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditObject {
    #[serde(rename = "type")]
    pub object_type: String,
    pub id: String,
    pub name: String,
}

impl AuditObject {
    pub fn new(
        object_type: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The client the operator acted through
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditOperatorAgent {
    #[serde(rename = "type")]
    pub agent_type: String,
    pub ip: String,
    pub mac: String,
}

/// Who performed the operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditOperator {
    #[serde(rename = "type")]
    pub operator_type: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub agent: AuditOperatorAgent,
}

impl AuditOperator {
    /// Build an operator descriptor from an authenticated request visitor
    pub fn from_visitor(visitor: &Visitor) -> Self {
        Self {
            operator_type: visitor.visitor_type.operator_type().to_string(),
            id: visitor.id.clone(),
            name: String::new(),
            agent: AuditOperatorAgent {
                agent_type: visitor.client_type.clone(),
                ip: visitor.ip.clone(),
                mac: visitor.mac.clone(),
            },
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Kind of caller behind a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisitorType {
    /// A user authenticated under their real identity
    RealName,
    Anonymous,
    /// A registered application acting on its own behalf
    App,
}

impl VisitorType {
    /// Operator type reported in audit logs
    pub fn operator_type(&self) -> &'static str {
        match self {
            VisitorType::RealName => "authenticated_user",
            VisitorType::Anonymous => "anonymous_user",
            VisitorType::App => "app",
        }
    }
}

/// Caller identity as resolved by the request layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visitor {
    pub id: String,
    pub visitor_type: VisitorType,
    /// Client kind, e.g. "web", "console_web", "app"
    pub client_type: String,
    pub ip: String,
    pub mac: String,
}

/// Service a log originated from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogFromService {
    pub name: String,
}

/// Provenance stamped onto every log by the enricher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogFrom {
    pub package: String,
    pub service: AuditLogFromService,
}

impl AuditLogFrom {
    pub fn new(package: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            service: AuditLogFromService {
                name: service.into(),
            },
        }
    }
}

/// A single audit log record
///
/// `id`, `description` and `log_from` are empty until the dispatcher
/// enriches the record; see [`crate::enrich`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    #[serde(rename = "type")]
    pub log_type: LogType,

    /// Unique log id, assigned after dequeue
    #[serde(rename = "out_biz_id")]
    pub id: String,

    pub level: Level,

    pub operation: String,

    pub description: String,

    /// Operation time in Unix nanoseconds
    pub op_time: i64,

    pub operator: AuditOperator,

    pub object: AuditObject,

    pub log_from: AuditLogFrom,

    #[serde(default)]
    pub detail: HashMap<String, String>,

    #[serde(skip)]
    pub status: Option<Status>,
}

impl AuditLog {
    /// Create a log stamped with the current time
    ///
    /// `Info` always records success. `Warn` records the given status,
    /// or failure when none is given.
    pub fn new(
        log_type: LogType,
        level: Level,
        operation: impl Into<String>,
        operator: AuditOperator,
        object: AuditObject,
        status: Option<Status>,
        detail: HashMap<String, String>,
    ) -> Self {
        let status = match level {
            Level::Info => Status::Success,
            Level::Warn => status.unwrap_or(Status::Failed),
        };

        Self {
            log_type,
            id: String::new(),
            level,
            operation: operation.into(),
            description: String::new(),
            op_time: now_nanos(),
            operator,
            object,
            log_from: AuditLogFrom::default(),
            detail,
            status: Some(status),
        }
    }

    /// Info-level log of a successful operation
    pub fn info(
        log_type: LogType,
        operation: impl Into<String>,
        operator: AuditOperator,
        object: AuditObject,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(
            log_type,
            Level::Info,
            operation,
            operator,
            object,
            Some(Status::Success),
            detail_map(detail),
        )
    }

    /// Warn-level log with an explicit status
    pub fn warn(
        log_type: LogType,
        operation: impl Into<String>,
        operator: AuditOperator,
        object: AuditObject,
        status: Status,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(
            log_type,
            Level::Warn,
            operation,
            operator,
            object,
            Some(status),
            detail_map(detail),
        )
    }

    /// Warn-level failure log whose detail is the error's message
    pub fn warn_with_error(
        log_type: LogType,
        operation: impl Into<String>,
        operator: AuditOperator,
        object: AuditObject,
        err: &dyn std::error::Error,
    ) -> Self {
        Self::warn(
            log_type,
            operation,
            operator,
            object,
            Status::Failed,
            err.to_string(),
        )
    }

    /// Add a detail entry
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }
}

fn detail_map(detail: impl Into<String>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert(DETAIL_KEY.to_string(), detail.into());
    map
}

/// Current time in Unix nanoseconds
fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operator() -> AuditOperator {
        AuditOperator {
            operator_type: "authenticated_user".to_string(),
            id: "u-1".to_string(),
            name: String::new(),
            agent: AuditOperatorAgent {
                agent_type: "web".to_string(),
                ip: "10.0.0.1".to_string(),
                mac: "00:11:22:33:44:55".to_string(),
            },
        }
    }

    #[test]
    fn test_info_log_is_success() {
        let log = AuditLog::info(
            LogType::Operation,
            operation::CREATE,
            operator(),
            AuditObject::new("connector", "c-1", "foo"),
            "created",
        );

        assert_eq!(log.level, Level::Info);
        assert_eq!(log.status, Some(Status::Success));
        assert_eq!(log.detail[DETAIL_KEY], "created");
        assert!(log.id.is_empty());
        assert!(log.op_time > 0);
    }

    #[test]
    fn test_info_level_ignores_requested_status() {
        let log = AuditLog::new(
            LogType::Login,
            Level::Info,
            "login",
            operator(),
            AuditObject::default(),
            Some(Status::Failed),
            HashMap::new(),
        );
        assert_eq!(log.status, Some(Status::Success));
    }

    #[test]
    fn test_warn_defaults_to_failed() {
        let log = AuditLog::new(
            LogType::Management,
            Level::Warn,
            operation::DELETE,
            operator(),
            AuditObject::default(),
            None,
            HashMap::new(),
        );
        assert_eq!(log.status, Some(Status::Failed));

        let log = AuditLog::warn(
            LogType::Management,
            operation::DELETE,
            operator(),
            AuditObject::default(),
            Status::Success,
            "",
        );
        assert_eq!(log.status, Some(Status::Success));
    }

    #[test]
    fn test_warn_with_error_uses_message() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "connector not found");
        let log = AuditLog::warn_with_error(
            LogType::Operation,
            operation::UPDATE,
            operator(),
            AuditObject::new("connector", "c-9", ""),
            &err,
        );

        assert_eq!(log.level, Level::Warn);
        assert_eq!(log.status, Some(Status::Failed));
        assert_eq!(log.detail[DETAIL_KEY], "connector not found");
    }

    #[test]
    fn test_wire_field_names() {
        let log = AuditLog::info(
            LogType::Operation,
            operation::CREATE,
            operator(),
            AuditObject::new("connector", "c-1", "foo"),
            "created",
        );

        let value = serde_json::to_value(&log).unwrap();
        assert_eq!(value["type"], "operation");
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["out_biz_id"], "");
        assert_eq!(value["object"]["type"], "connector");
        assert_eq!(value["operator"]["agent"]["type"], "web");
        assert_eq!(value["log_from"]["service"]["name"], "");
        assert!(value["op_time"].is_i64());
        assert!(value.get("status").is_none());
        // empty operator name is omitted
        assert!(value["operator"].get("name").is_none());
    }

    #[test]
    fn test_operator_name_serialized_when_set() {
        let value = serde_json::to_value(operator().with_name("Alice")).unwrap();
        assert_eq!(value["name"], "Alice");
    }

    #[test]
    fn test_operator_from_visitor() {
        let cases = [
            (VisitorType::RealName, "authenticated_user"),
            (VisitorType::Anonymous, "anonymous_user"),
            (VisitorType::App, "app"),
        ];

        for (visitor_type, expected) in cases {
            let visitor = Visitor {
                id: "v-1".to_string(),
                visitor_type,
                client_type: "console_web".to_string(),
                ip: "192.168.1.2".to_string(),
                mac: "aa:bb".to_string(),
            };
            let op = AuditOperator::from_visitor(&visitor);
            assert_eq!(op.operator_type, expected);
            assert_eq!(op.id, "v-1");
            assert_eq!(op.agent.agent_type, "console_web");
            assert_eq!(op.agent.ip, "192.168.1.2");
            assert_eq!(op.agent.mac, "aa:bb");
        }
    }

    #[test]
    fn test_deserialize_wire_payload() {
        let json = r#"{
            "type": "login",
            "out_biz_id": "cv37tq0a5f6tb4c2hl20",
            "level": "WARN",
            "operation": "login",
            "description": "login failed",
            "op_time": 1700000000000000000,
            "operator": {"type": "anonymous_user", "id": "", "agent": {"type": "web", "ip": "", "mac": ""}},
            "object": {"type": "", "id": "", "name": ""},
            "log_from": {"package": "", "service": {"name": ""}},
            "detail": {"status": "failed"}
        }"#;

        let log: AuditLog = serde_json::from_str(json).unwrap();
        assert_eq!(log.log_type, LogType::Login);
        assert_eq!(log.level, Level::Warn);
        assert_eq!(log.detail[STATUS_KEY], "failed");
        assert!(log.status.is_none());
    }
}
