//! SQLite-based audit log
//!
//! Separate file for easy management and rotation. Holds one row per routed
//! request and one row per event submitted by a client application.

use crate::error::Result;
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;

/// Kind of audit row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Route,
    Identity,
    Client,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Route => "route",
            EntryKind::Identity => "identity",
            EntryKind::Client => "client",
        }
    }
}

/// One routed request, as the router resolved it
#[derive(Debug, Clone, Default)]
pub struct RouteRecord {
    pub session_id: String,
    pub method: String,
    pub path: String,
    pub resource_type: String,
    /// Source whose response was returned, `None` when nothing answered
    pub served_by: Option<String>,
    /// Classification label (`success`, `paginated`, `rejected`, ...)
    pub outcome: String,
    pub status: Option<u16>,
    pub error: Option<String>,
}

/// Row read back from the log
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub timestamp: String,
    pub kind: String,
    pub level: String,
    pub session_id: Option<String>,
    pub source: Option<String>,
    pub outcome: Option<String>,
    pub message: Option<String>,
}

/// Audit log
pub struct AuditLog {
    conn: Connection,
}

#[allow(clippy::result_large_err)]
impl AuditLog {
    /// Open the audit log (create if not exists)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let audit = Self { conn };
        audit.initialize()?;
        Ok(audit)
    }

    /// Initialize tables
    fn initialize(&self) -> Result<()> {
        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL DEFAULT (datetime('now')),
                kind TEXT NOT NULL,
                level TEXT NOT NULL,
                session_id TEXT,
                method TEXT,
                path TEXT,
                resource_type TEXT,
                source TEXT,
                outcome TEXT,
                status INTEGER,
                message TEXT,
                extra TEXT
            )
            "#,
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_session ON audit_log(session_id)",
            [],
        )?;

        Ok(())
    }

    /// Record the resolution of one routed request
    pub fn record_route(&self, record: &RouteRecord) -> Result<()> {
        let level = if record.error.is_some() { "error" } else { "info" };

        self.conn.execute(
            r#"
            INSERT INTO audit_log
            (kind, level, session_id, method, path, resource_type,
             source, outcome, status, message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                EntryKind::Route.as_str(),
                level,
                record.session_id,
                record.method,
                record.path,
                record.resource_type,
                record.served_by,
                record.outcome,
                record.status,
                record.error,
            ],
        )?;

        Ok(())
    }

    /// Record an identity reconciliation result for a source
    pub fn record_identity(
        &self,
        session_id: &str,
        source: &str,
        outcome: &str,
        level: &str,
        message: &str,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO audit_log
            (kind, level, session_id, resource_type, source, outcome, message)
            VALUES (?1, ?2, ?3, 'Patient', ?4, ?5, ?6)
            "#,
            params![
                EntryKind::Identity.as_str(),
                level,
                session_id,
                source,
                outcome,
                message
            ],
        )?;

        Ok(())
    }

    /// Record an event submitted by a client application
    pub fn record_event(&self, level: &str, message: &str, extra: &Value) -> Result<()> {
        let extra = serde_json::to_string(extra)?;

        self.conn.execute(
            r#"
            INSERT INTO audit_log (kind, level, message, extra)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![EntryKind::Client.as_str(), level, message, extra],
        )?;

        Ok(())
    }

    /// Get recent audit log entries, most recent first
    pub fn recent_entries(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, kind, level, session_id, source, outcome, message
            FROM audit_log
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(AuditEntry {
                timestamp: row.get(0)?,
                kind: row.get(1)?,
                level: row.get(2)?,
                session_id: row.get(3)?,
                source: row.get(4)?,
                outcome: row.get(5)?,
                message: row.get(6)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        Ok(entries)
    }
}
