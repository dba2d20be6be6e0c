use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::PendingMessage;

/// Record a queued message. Keyed by the temporary id; survives restarts
/// so the queue can rehydrate in enqueue order.
pub fn insert_pending(conn: &Arc<Mutex<Connection>>, pending: &PendingMessage) -> Result<()> {
    let conn = conn.lock();
    conn.execute(
        "INSERT OR REPLACE INTO pending_messages (message_id, queued_at) VALUES (?1, ?2)",
        params![pending.message_id, pending.queued_at],
    )?;
    Ok(())
}

pub fn delete_pending(conn: &Arc<Mutex<Connection>>, message_id: &str) -> Result<()> {
    let conn = conn.lock();
    conn.execute(
        "DELETE FROM pending_messages WHERE message_id = ?1",
        params![message_id],
    )?;
    Ok(())
}

/// All pending records in enqueue order.
pub fn get_pending_ordered(conn: &Arc<Mutex<Connection>>) -> Result<Vec<PendingMessage>> {
    let conn = conn.lock();
    let mut stmt = conn.prepare(
        "SELECT message_id, queued_at FROM pending_messages ORDER BY queued_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(PendingMessage {
            message_id: row.get(0)?,
            queued_at: row.get(1)?,
        })
    })?;
    let mut pending = Vec::new();
    for row in rows {
        pending.push(row?);
    }
    Ok(pending)
}
