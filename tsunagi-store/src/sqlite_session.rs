//! SQLite-backed session store
//!
//! The file is shared with the launch (SMART auth) flow, which runs in its own
//! process and writes `iss`, `token_response` and `launch_token_patient` into
//! the `session_values` table below. WAL mode lets that writer and the router
//! work on the same file concurrently.
//!
//! ```sql
//! session_values(session_id TEXT, key TEXT, value TEXT /* JSON */, updated_at TEXT)
//! ```

use crate::error::{Result, StoreError};
use crate::session::SessionStore;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// How long a write waits on another process holding the lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Session store over a SQLite file other processes may write to
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

#[allow(clippy::result_large_err)]
impl SqliteSessionStore {
    /// Open the store (create if not exists)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS session_values (
                session_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (session_id, key)
            )
            "#,
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Other("session store lock poisoned".to_string()))
    }
}

impl SessionStore for SqliteSessionStore {
    fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>> {
        let text: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM session_values WHERE session_id = ?1 AND key = ?2",
                params![session_id, key],
                |row| row.get(0),
            )
            .optional()?;

        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn set(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        let text = serde_json::to_string(&value)?;
        self.conn()?.execute(
            r#"
            INSERT INTO session_values (session_id, key, value)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (session_id, key)
            DO UPDATE SET value = excluded.value, updated_at = datetime('now')
            "#,
            params![session_id, key, text],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_roundtrip_and_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSessionStore::open(dir.path().join("sessions.sqlite")).unwrap();

        store.set("s1", "app-fhir_patient_id", json!("a")).unwrap();
        store.set("s1", "app-fhir_patient_id", json!("b")).unwrap();

        assert_eq!(store.get("s1", "app-fhir_patient_id").unwrap(), Some(json!("b")));
        assert_eq!(store.get("s2", "app-fhir_patient_id").unwrap(), None);
    }

    #[test]
    fn test_second_opener_sees_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.sqlite");
        let router_side = SqliteSessionStore::open(&path).unwrap();
        let launch_side = SqliteSessionStore::open(&path).unwrap();

        let token = json!({"patient": "123", "scope": "launch patient/*.rs"});
        launch_side.set("s1", "token_response", token.clone()).unwrap();
        launch_side.set("s1", "iss", json!("http://ehr/fhir")).unwrap();

        assert_eq!(router_side.get("s1", "token_response").unwrap(), Some(token));
        assert_eq!(router_side.get("s1", "iss").unwrap(), Some(json!("http://ehr/fhir")));

        router_side.set("s1", "pdmp_patient_id", json!("P9")).unwrap();
        assert_eq!(launch_side.get("s1", "pdmp_patient_id").unwrap(), Some(json!("P9")));
    }

    #[test]
    fn test_plain_sql_writer_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.sqlite");
        let store = SqliteSessionStore::open(&path).unwrap();

        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "INSERT INTO session_values (session_id, key, value) VALUES ('s1', 'launch_token_patient', '\"123\"')",
            [],
        )
        .unwrap();

        assert_eq!(
            store.get("s1", "launch_token_patient").unwrap(),
            Some(json!("123"))
        );
    }
}
