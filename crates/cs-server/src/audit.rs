//! Bounded log of server operations, kept in the `audit_log` table.
//!
//! Entries carry an action name, an optional doc_id, and counts. Token bytes
//! are never recorded. Mutations write their entry inside their own
//! transaction, so the log survives reopening the database and never
//! mentions a write that rolled back.

use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};

use cs_core::types::AuditEvent;
use cs_core::DocId;

/// Default number of retained events.
pub const DEFAULT_AUDIT_CAPACITY: usize = 1024;

/// Writer and reader for the `audit_log` table; the oldest rows are evicted
/// once `capacity` is exceeded.
#[derive(Debug, Clone, Copy)]
pub struct AuditLog {
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        AuditLog {
            capacity: capacity.max(1),
        }
    }

    /// Append one event and evict anything beyond capacity.
    ///
    /// Pass the open transaction when the event belongs to a write.
    pub fn record(
        &self,
        conn: &Connection,
        action: &str,
        doc_id: Option<&DocId>,
        detail: &str,
    ) -> rusqlite::Result<()> {
        conn.prepare_cached(
            "INSERT INTO audit_log (action, doc_id, detail, timestamp) VALUES (?1, ?2, ?3, ?4)",
        )?
        .execute(params![
            action,
            doc_id.map(DocId::as_str),
            detail,
            now_unix() as i64
        ])?;
        conn.prepare_cached(
            "DELETE FROM audit_log WHERE id <= (SELECT MAX(id) FROM audit_log) - ?1",
        )?
        .execute(params![self.capacity as i64])?;
        Ok(())
    }

    /// Retained events, oldest first.
    pub fn snapshot(&self, conn: &Connection) -> rusqlite::Result<Vec<AuditEvent>> {
        let mut stmt =
            conn.prepare("SELECT action, doc_id, detail, timestamp FROM audit_log ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(AuditEvent {
                action: row.get(0)?,
                doc_id: row.get::<_, Option<String>>(1)?.map(DocId::from),
                detail: row.get(2)?,
                timestamp: row.get::<_, i64>(3)?.max(0) as u64,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self, conn: &Connection) -> rusqlite::Result<u64> {
        conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get::<_, i64>(0))
            .map(|n| n.max(0) as u64)
    }

    pub fn clear(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute("DELETE FROM audit_log", []).map(|_| ())
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

/// Seconds since the Unix epoch (0 if the clock is before it).
pub(crate) fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
