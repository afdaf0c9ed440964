pub mod error;
pub mod session;
pub mod sqlite_audit;
pub mod sqlite_session;

pub use error::{Result, StoreError};
pub use session::{MemorySessionStore, RedbSessionStore, Session, SessionStore};
pub use sqlite_audit::{AuditEntry, AuditLog, EntryKind, RouteRecord};
pub use sqlite_session::SqliteSessionStore;
