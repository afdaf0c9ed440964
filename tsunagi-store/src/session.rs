//! Session-scoped key/value storage
//!
//! The launch flow writes `iss`, `token_response` and `launch_token_patient`
//! here; the router reads them and caches translated patient ids per source.
//! Only `SqliteSessionStore` can be shared with a launch flow running in
//! another process; the redb file is locked by the process that opens it.
//!
//! ReDB key format: {session_id}/{key}

use crate::error::{Result, StoreError};
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Key/value values scoped to one end-user session
pub trait SessionStore: Send + Sync {
    fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>>;

    /// Last write wins
    fn set(&self, session_id: &str, key: &str, value: Value) -> Result<()>;
}

/// In-process session store
#[derive(Default)]
pub struct MemorySessionStore {
    values: RwLock<HashMap<(String, String), Value>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>> {
        let values = self
            .values
            .read()
            .map_err(|_| StoreError::Other("session store lock poisoned".to_string()))?;
        Ok(values
            .get(&(session_id.to_string(), key.to_string()))
            .cloned())
    }

    fn set(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| StoreError::Other("session store lock poisoned".to_string()))?;
        values.insert((session_id.to_string(), key.to_string()), value);
        Ok(())
    }
}

/// ReDB-backed session store
pub struct RedbSessionStore {
    db: Database,
}

#[allow(clippy::result_large_err)]
impl RedbSessionStore {
    /// Open the store (create if not exists)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SESSIONS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }
}

impl SessionStore for RedbSessionStore {
    fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>> {
        let key = format!("{}/{}", session_id, key);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;

        match table.get(key.as_str())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn set(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        let key = format!("{}/{}", session_id, key);
        let data = serde_json::to_vec(&value)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS)?;
            table.insert(key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// A store bound to one session id, resolved once per request
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn SessionStore>,
    id: String,
}

impl Session {
    pub fn new(store: Arc<dyn SessionStore>, id: impl Into<String>) -> Self {
        Self {
            store,
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.store.get(&self.id, key)
    }

    /// String value of `key`; non-string values read as absent
    pub fn get_str(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .get(key)?
            .and_then(|v| v.as_str().map(String::from)))
    }

    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        self.store.set(&self.id, key, value)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}
