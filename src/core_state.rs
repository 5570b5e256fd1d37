//! Process-wide application state.
//!
//! `CoreState` is created once at startup, wrapped in `Arc` and shared by
//! every request. It owns the configuration and the audit buffer; each
//! request opens its own database connection through [`CoreState::open_db`].

use std::path::Path;
use std::sync::Mutex;

use uuid::Uuid;

use crate::config::AppConfig;
use crate::db;
use crate::db::repository::{fmt_datetime, now, AuditEntry};

/// Maximum audit buffer size before flush.
const AUDIT_BUFFER_CAPACITY: usize = 100;

/// Audit rows older than this are pruned on flush.
const AUDIT_RETENTION_DAYS: i64 = 365;

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    pub config: AppConfig,
    /// Access log buffer, flushed to `audit_log`.
    audit: AuditLogger,
}

impl CoreState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            audit: AuditLogger::new(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.config.database_path
    }

    /// Open a database connection for the current request.
    pub fn open_db(&self) -> Result<rusqlite::Connection, CoreError> {
        db::open_database(&self.config.database_path).map_err(CoreError::Database)
    }

    /// Log an access event. Auto-flushes to the database when the buffer
    /// is full.
    pub fn log_access(&self, actor: &Actor, action: &str, outcome: &str) {
        let needs_flush = self.audit.log(actor, action, outcome);
        if needs_flush {
            if let Err(e) = self.flush_and_prune_audit() {
                tracing::warn!("Auto-flush audit failed: {e}");
            }
        }
    }

    /// Current audit buffer contents.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.entries()
    }

    /// Flush the audit buffer and prune old rows.
    pub fn flush_and_prune_audit(&self) -> Result<usize, CoreError> {
        let conn = self.open_db()?;
        let count = self.audit.flush_to_db(&conn)?;
        if let Err(e) = db::repository::prune_audit_log(&conn, AUDIT_RETENTION_DAYS) {
            tracing::warn!("Failed to prune audit log: {e}");
        }
        Ok(count)
    }
}

/// Errors from CoreState operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Internal lock error")]
    LockPoisoned,
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
}

// ═══════════════════════════════════════════════════════════
// Actor: who performed an audited action
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Anonymous,
    Staff { id: Uuid, username: String },
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::Staff { username, .. } => write!(f, "{username}"),
        }
    }
}

impl Actor {
    pub fn staff_id(&self) -> Option<Uuid> {
        match self {
            Self::Anonymous => None,
            Self::Staff { id, .. } => Some(*id),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Audit logger
// ═══════════════════════════════════════════════════════════

/// In-memory audit log buffer. Entries are flushed to SQLite
/// when the buffer reaches capacity or on explicit flush.
pub struct AuditLogger {
    buffer: Mutex<Vec<AuditEntry>>,
}

impl AuditLogger {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::with_capacity(AUDIT_BUFFER_CAPACITY)),
        }
    }

    /// Buffer an event. Returns `true` once the flush threshold is reached.
    pub fn log(&self, actor: &Actor, action: &str, outcome: &str) -> bool {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.push(AuditEntry {
                timestamp: fmt_datetime(&now()),
                staff_id: actor.staff_id().map(|id| id.to_string()),
                username: actor.to_string(),
                action: action.to_string(),
                outcome: outcome.to_string(),
            });
            buf.len() >= AUDIT_BUFFER_CAPACITY
        } else {
            false
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }

    pub fn drain(&self) -> Vec<AuditEntry> {
        self.buffer
            .lock()
            .map(|mut buf| buf.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().map(|buf| buf.len()).unwrap_or(0)
    }

    pub fn flush_to_db(&self, conn: &rusqlite::Connection) -> Result<usize, CoreError> {
        let entries = self.drain();
        if entries.is_empty() {
            return Ok(0);
        }
        db::repository::insert_audit_entries(conn, &entries)?;

        tracing::debug!(count = entries.len(), "Flushed audit entries to database");
        Ok(entries.len())
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nurse() -> Actor {
        Actor::Staff {
            id: Uuid::new_v4(),
            username: "nurse1".into(),
        }
    }

    #[test]
    fn actor_display() {
        assert_eq!(Actor::Anonymous.to_string(), "anonymous");
        assert_eq!(nurse().to_string(), "nurse1");
        assert!(Actor::Anonymous.staff_id().is_none());
    }

    #[test]
    fn audit_logger_records_and_drains() {
        let logger = AuditLogger::new();
        assert!(!logger.log(&nurse(), "GET /nurse", "200"));
        assert_eq!(logger.buffer_len(), 1);

        let entries = logger.entries();
        assert_eq!(entries[0].username, "nurse1");
        assert!(entries[0].staff_id.is_some());

        assert_eq!(logger.drain().len(), 1);
        assert_eq!(logger.buffer_len(), 0);
    }

    #[test]
    fn audit_logger_signals_flush_at_capacity() {
        let logger = AuditLogger::new();
        for _ in 0..AUDIT_BUFFER_CAPACITY - 1 {
            assert!(!logger.log(&Actor::Anonymous, "GET /login", "200"));
        }
        assert!(logger.log(&Actor::Anonymous, "GET /login", "200"));
    }

    #[test]
    fn flush_writes_to_database() {
        let tmp = tempfile::tempdir().unwrap();
        let core = CoreState::new(AppConfig {
            database_path: tmp.path().join("audit.db"),
            ..AppConfig::default()
        });
        core.log_access(&nurse(), "GET /nurse", "200");
        core.log_access(&Actor::Anonymous, "POST /login", "303");

        assert_eq!(core.flush_and_prune_audit().unwrap(), 2);
        assert!(core.audit_entries().is_empty());

        let conn = core.open_db().unwrap();
        let rows = db::repository::recent_audit_entries(&conn, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].username, "anonymous");
    }
}
