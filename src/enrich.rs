//! Enrichment applied to each log after it leaves the queue

use crate::id::IdGenerator;
use crate::types::{AuditLog, AuditLogFrom, STATUS_KEY};

/// Stamp id, provenance, description and status detail onto a log
///
/// Runs exactly once per log, on the dispatcher, right after dequeue.
pub fn enrich(log: &mut AuditLog, log_from: &AuditLogFrom, ids: &IdGenerator) {
    log.id = ids.next_id();
    log.log_from = log_from.clone();
    log.description = describe(log);

    let status = log.status.map(|s| s.as_str()).unwrap_or_default();
    log.detail.insert(STATUS_KEY.to_string(), status.to_string());
}

/// Human-readable summary of a log
///
/// Joins the non-empty parts of operation, object type, object name and
/// status with single spaces, in that order.
pub fn describe(log: &AuditLog) -> String {
    let status = log.status.map(|s| s.as_str()).unwrap_or_default();
    [
        log.operation.as_str(),
        log.object.object_type.as_str(),
        log.object.name.as_str(),
        status,
    ]
    .into_iter()
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
}
