use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tsunagi_core::IdentityMatch;
use tsunagi_store::{AuditLog, RouteRecord};

use crate::error::RouteError;
use crate::routing::{InboundRequest, RouteOutcome};

/// Extra fields that may carry PHI; masked before echoing to the app log
const REDACTED_FIELDS: [&str; 3] = ["user", "subject", "patient"];
const REDACTED: &str = "REDACTED - see audit logs";

/// Level of a client-submitted audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Debug => "debug",
            EventLevel::Info => "info",
            EventLevel::Warning => "warning",
            EventLevel::Error => "error",
            EventLevel::Critical => "critical",
        }
    }
}

impl FromStr for EventLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(EventLevel::Debug),
            "info" => Ok(EventLevel::Info),
            "warning" | "warn" => Ok(EventLevel::Warning),
            "error" => Ok(EventLevel::Error),
            "critical" | "fatal" => Ok(EventLevel::Critical),
            _ => Err(s.to_string()),
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Copy of `extra` with PHI-bearing fields masked
pub fn redact(extra: &Map<String, Value>) -> Map<String, Value> {
    let mut scrubbed = extra.clone();
    for field in REDACTED_FIELDS {
        if let Some(value) = scrubbed.get_mut(field) {
            *value = Value::String(REDACTED.to_string());
        }
    }
    scrubbed
}

fn write_in_background<F>(audit_log: &Arc<Mutex<AuditLog>>, write: F)
where
    F: FnOnce(&AuditLog) -> tsunagi_store::Result<()> + Send + 'static,
{
    let audit_log = Arc::clone(audit_log);
    tokio::spawn(async move {
        let audit = audit_log.lock().await;
        if let Err(e) = write(&*audit) {
            tracing::error!("Failed to write audit log to database: {}", e);
        }
    });
}

/// Log a routed request that produced a response
pub fn log_route_success(
    session_id: &str,
    request: &InboundRequest,
    outcome: &RouteOutcome,
    audit_log: &Arc<Mutex<AuditLog>>,
) {
    tracing::info!(
        session_id = session_id,
        method = %request.method,
        resource_type = %outcome.scope.resource_type,
        served_by = %outcome.served_by,
        outcome = outcome.outcome,
        status = outcome.status,
        "Audit: {} {} served by {}",
        request.method,
        request.relative_path,
        outcome.served_by
    );

    let record = RouteRecord {
        session_id: session_id.to_string(),
        method: request.method.to_string(),
        path: request.full_path(),
        resource_type: outcome.scope.resource_type.clone(),
        served_by: Some(outcome.served_by.clone()),
        outcome: outcome.outcome.to_string(),
        status: Some(outcome.status),
        error: None,
    };
    write_in_background(audit_log, move |audit| audit.record_route(&record));

    for identity in &outcome.identities {
        let (level, message) = match &identity.found {
            IdentityMatch::None => ("info", "no patient for MRN".to_string()),
            IdentityMatch::Single(_) => (
                "info",
                format!("mapped to {}", identity.found.patient_id().unwrap_or("")),
            ),
            IdentityMatch::Multiple { count, .. } => (
                "warning",
                format!(
                    "{} matches for MRN; mapped to {}",
                    count,
                    identity.found.patient_id().unwrap_or("")
                ),
            ),
        };

        let session_id = session_id.to_string();
        let source = identity.source.clone();
        let label = identity.label();
        write_in_background(audit_log, move |audit| {
            audit.record_identity(&session_id, &source, label, level, &message)
        });
    }
}

/// Log a routed request that failed
pub fn log_route_error(
    session_id: &str,
    request: &InboundRequest,
    error: &RouteError,
    audit_log: &Arc<Mutex<AuditLog>>,
) {
    let status = error.status_code().as_u16();
    tracing::warn!(
        session_id = session_id,
        method = %request.method,
        status = status,
        error = %error,
        "Audit: {} {} failed: {}",
        request.method,
        request.relative_path,
        error
    );

    let record = RouteRecord {
        session_id: session_id.to_string(),
        method: request.method.to_string(),
        path: request.full_path(),
        resource_type: tsunagi_core::resource_type_of(&request.relative_path).to_string(),
        served_by: None,
        outcome: "error".to_string(),
        status: Some(status),
        error: Some(error.to_string()),
    };
    write_in_background(audit_log, move |audit| audit.record_route(&record));
}

/// Log an event submitted by a client application
pub fn log_client_event(
    level: EventLevel,
    message: &str,
    extra: Map<String, Value>,
    audit_log: &Arc<Mutex<AuditLog>>,
) {
    match level {
        EventLevel::Error | EventLevel::Critical => {
            let scrubbed = Value::Object(redact(&extra));
            tracing::error!(event_level = %level, extra = %scrubbed, "Client event: {}", message);
        }
        EventLevel::Warning => tracing::warn!("Client event: {}", message),
        EventLevel::Info => tracing::info!("Client event: {}", message),
        EventLevel::Debug => tracing::debug!("Client event: {}", message),
    }

    let message = message.to_string();
    let extra = Value::Object(extra);
    write_in_background(audit_log, move |audit| {
        audit.record_event(level.as_str(), &message, &extra)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_level_parse() {
        assert_eq!("info".parse::<EventLevel>(), Ok(EventLevel::Info));
        assert_eq!("WARNING".parse::<EventLevel>(), Ok(EventLevel::Warning));
        assert_eq!("critical".parse::<EventLevel>(), Ok(EventLevel::Critical));
        assert_eq!("verbose".parse::<EventLevel>(), Err("verbose".to_string()));
    }

    #[test]
    fn test_redact() {
        let extra = json!({
            "user": "testy@example.com",
            "patient": "Jones, Bob",
            "version": "1.2"
        });
        let Value::Object(extra) = extra else {
            unreachable!()
        };

        let scrubbed = redact(&extra);
        assert_eq!(scrubbed["user"], REDACTED);
        assert_eq!(scrubbed["patient"], REDACTED);
        assert_eq!(scrubbed["version"], "1.2");
        assert!(!scrubbed.contains_key("subject"));
        assert_eq!(extra["user"], "testy@example.com");
    }

    #[tokio::test]
    async fn test_client_event_written() {
        let audit = Arc::new(Mutex::new(AuditLog::open(":memory:").unwrap()));
        let mut extra = Map::new();
        extra.insert("user".to_string(), json!("testy@example.com"));

        log_client_event(EventLevel::Error, "No meds!", extra, &audit);

        // Spawned writes land once the runtime gets to them
        for _ in 0..50 {
            if !audit.lock().await.recent_entries(1).unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let entries = audit.lock().await.recent_entries(1).unwrap();
        assert_eq!(entries[0].kind, "client");
        assert_eq!(entries[0].level, "error");
        assert_eq!(entries[0].message.as_deref(), Some("No meds!"));
    }
}
