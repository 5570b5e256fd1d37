use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::DatabaseError;

/// One buffered access record, ready for insertion.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub staff_id: Option<String>,
    pub username: String,
    pub action: String,
    pub outcome: String,
}

/// Insert a batch of audit entries into the audit_log table.
pub fn insert_audit_entries(conn: &Connection, entries: &[AuditEntry]) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO audit_log (timestamp, staff_id, username, action, outcome)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for entry in entries {
        stmt.execute(params![
            entry.timestamp,
            entry.staff_id,
            entry.username,
            entry.action,
            entry.outcome,
        ])?;
    }
    Ok(())
}

/// Prune audit entries older than the given number of days.
pub fn prune_audit_log(conn: &Connection, retention_days: i64) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM audit_log WHERE timestamp < datetime('now', 'localtime', ?1)",
        params![format!("-{retention_days} days")],
    )?;
    Ok(deleted)
}

/// Newest entries first, for the admin page.
pub fn recent_audit_entries(conn: &Connection, limit: u32) -> Result<Vec<AuditEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT timestamp, staff_id, username, action, outcome FROM audit_log
         ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(AuditEntry {
                timestamp: row.get(0)?,
                staff_id: row.get(1)?,
                username: row.get(2)?,
                action: row.get(3)?,
                outcome: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
