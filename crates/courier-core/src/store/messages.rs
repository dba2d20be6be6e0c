use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::models::{Message, MessageStatus};

fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    let status: String = row.get(6)?;
    let read_by: String = row.get(7)?;
    let read_by: HashMap<String, i64> = serde_json::from_str(&read_by).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status = MessageStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown message status: {status}").into(),
        )
    })?;
    let local_only: i64 = row.get(9)?;

    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        text: row.get(3)?,
        original_language: row.get(4)?,
        timestamp: row.get(5)?,
        status,
        read_by,
        media_url: row.get(8)?,
        local_only: local_only != 0,
    })
}

const MESSAGE_COLUMNS: &str =
    "id, chat_id, sender_id, text, original_language, timestamp, status, read_by, media_url, local_only";

fn upsert_in(conn: &Connection, msg: &Message) -> Result<()> {
    let read_by = serde_json::to_string(&msg.read_by)?;
    conn.execute(
        "INSERT OR REPLACE INTO messages \
         (id, chat_id, sender_id, text, original_language, timestamp, status, read_by, media_url, local_only) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            msg.id,
            msg.chat_id,
            msg.sender_id,
            msg.text,
            msg.original_language,
            msg.timestamp,
            msg.status.as_str(),
            read_by,
            msg.media_url,
            msg.local_only as i64,
        ],
    )?;
    Ok(())
}

/// Insert or replace a single message by id.
pub fn upsert_message(conn: &Arc<Mutex<Connection>>, msg: &Message) -> Result<()> {
    let conn = conn.lock();
    upsert_in(&conn, msg)
}

/// Write a batch of messages in one transaction. All-or-nothing: any
/// failure rolls the whole batch back and propagates.
pub fn batch_upsert_messages(conn: &Arc<Mutex<Connection>>, msgs: &[Message]) -> Result<()> {
    if msgs.is_empty() {
        return Ok(());
    }
    let mut conn = conn.lock();
    let tx = conn.transaction()?;
    for msg in msgs {
        upsert_in(&tx, msg)?;
    }
    tx.commit()?;
    debug!("batch-upserted {} messages", msgs.len());
    Ok(())
}

/// All messages for a chat, ascending by timestamp. Served by the
/// (chat_id, timestamp) index.
pub fn get_messages_by_chat(conn: &Arc<Mutex<Connection>>, chat_id: &str) -> Result<Vec<Message>> {
    let conn = conn.lock();
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 ORDER BY timestamp ASC"
    ))?;
    let rows = stmt.query_map(params![chat_id], message_from_row)?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

pub fn get_message(conn: &Arc<Mutex<Connection>>, id: &str) -> Result<Option<Message>> {
    let conn = conn.lock();
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"
    ))?;
    let mut rows = stmt.query_map(params![id], message_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn delete_message(conn: &Arc<Mutex<Connection>>, id: &str) -> Result<()> {
    let conn = conn.lock();
    conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
    Ok(())
}

/// Rekey a message. Runs as one transaction so readers never observe a
/// window where the message is absent. Fails (and rolls back) if the new
/// id already exists.
pub fn reassign_message_id(
    conn: &Arc<Mutex<Connection>>,
    old_id: &str,
    new_id: &str,
) -> Result<()> {
    let mut conn = conn.lock();
    let tx = conn.transaction()?;
    let changed = tx.execute(
        "UPDATE messages SET id = ?2 WHERE id = ?1",
        params![old_id, new_id],
    )?;
    if changed == 0 {
        return Err(CoreError::MessageNotFound(old_id.to_string()));
    }
    tx.commit()?;
    Ok(())
}

/// Confirmation side effects in one transaction: the temp id becomes the
/// server id, the status moves to sent, the row is no longer local-only,
/// and the pending record keyed by the temp id is dropped.
///
/// The live subscription can reconcile the same message before the queue
/// gets here. If a row under the server id already exists the optimistic
/// row is simply dropped, so either arrival order converges on one row.
pub fn confirm_message(
    conn: &Arc<Mutex<Connection>>,
    temp_id: &str,
    server_id: &str,
) -> Result<()> {
    let mut conn = conn.lock();
    let tx = conn.transaction()?;
    let already_confirmed: i64 = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?1)",
        params![server_id],
        |row| row.get(0),
    )?;
    if already_confirmed != 0 {
        tx.execute("DELETE FROM messages WHERE id = ?1", params![temp_id])?;
    } else {
        tx.execute(
            "UPDATE messages SET id = ?2, status = 'sent', local_only = 0 WHERE id = ?1",
            params![temp_id, server_id],
        )?;
    }
    tx.execute(
        "DELETE FROM pending_messages WHERE message_id = ?1",
        params![temp_id],
    )?;
    tx.commit()?;
    Ok(())
}

pub fn set_message_status(
    conn: &Arc<Mutex<Connection>>,
    id: &str,
    status: MessageStatus,
) -> Result<()> {
    let conn = conn.lock();
    let changed = conn.execute(
        "UPDATE messages SET status = ?2 WHERE id = ?1",
        params![id, status.as_str()],
    )?;
    if changed == 0 {
        return Err(CoreError::MessageNotFound(id.to_string()));
    }
    Ok(())
}

/// Messages whose retries were exhausted, oldest first. Feed for the
/// manual-retry flow.
pub fn get_failed_messages(conn: &Arc<Mutex<Connection>>) -> Result<Vec<Message>> {
    let conn = conn.lock();
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE status = 'failed' ORDER BY timestamp ASC"
    ))?;
    let rows = stmt.query_map([], message_from_row)?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

/// Not-yet-confirmed rows in a chat, the reconciler's dedup candidates.
pub fn get_local_only_messages(
    conn: &Arc<Mutex<Connection>>,
    chat_id: &str,
) -> Result<Vec<Message>> {
    let conn = conn.lock();
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 AND local_only = 1 ORDER BY timestamp ASC"
    ))?;
    let rows = stmt.query_map(params![chat_id], message_from_row)?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

/// Record `user_id` as having read every message in the chat it has not
/// read yet. read_by is append-only; existing entries are left alone.
pub fn mark_read(
    conn: &Arc<Mutex<Connection>>,
    chat_id: &str,
    user_id: &str,
    read_at: i64,
) -> Result<()> {
    let mut conn = conn.lock();
    let tx = conn.transaction()?;
    let updates = {
        let mut stmt =
            tx.prepare("SELECT id, read_by FROM messages WHERE chat_id = ?1")?;
        let rows = stmt.query_map(params![chat_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut updates = Vec::new();
        for row in rows {
            let (id, read_by) = row?;
            let mut read_by: HashMap<String, i64> = serde_json::from_str(&read_by)?;
            if !read_by.contains_key(user_id) {
                read_by.insert(user_id.to_string(), read_at);
                updates.push((id, serde_json::to_string(&read_by)?));
            }
        }
        updates
    };
    for (id, read_by) in &updates {
        tx.execute(
            "UPDATE messages SET read_by = ?2 WHERE id = ?1",
            params![id, read_by],
        )?;
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    fn sample(id: &str, chat_id: &str, ts: i64) -> Message {
        let mut msg = Message::outgoing(chat_id, "alice", "hello", "en");
        msg.id = id.to_string();
        msg.timestamp = ts;
        msg
    }

    #[test]
    fn upsert_and_read_back_ordered() {
        let db = Database::in_memory().unwrap();
        let conn = db.connection();

        upsert_message(&conn, &sample("m2", "chat1", 200)).unwrap();
        upsert_message(&conn, &sample("m1", "chat1", 100)).unwrap();
        upsert_message(&conn, &sample("m3", "chat2", 50)).unwrap();

        let msgs = get_messages_by_chat(&conn, "chat1").unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].id, "m1");
        assert_eq!(msgs[1].id, "m2");
    }

    #[test]
    fn upsert_replaces_by_id() {
        let db = Database::in_memory().unwrap();
        let conn = db.connection();

        upsert_message(&conn, &sample("m1", "chat1", 100)).unwrap();
        let mut updated = sample("m1", "chat1", 100);
        updated.status = MessageStatus::Delivered;
        upsert_message(&conn, &updated).unwrap();

        let msgs = get_messages_by_chat(&conn, "chat1").unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].status, MessageStatus::Delivered);
    }

    #[test]
    fn reassign_keeps_row_present() {
        let db = Database::in_memory().unwrap();
        let conn = db.connection();

        upsert_message(&conn, &sample("temp-1", "chat1", 100)).unwrap();
        reassign_message_id(&conn, "temp-1", "srv-1").unwrap();

        assert!(get_message(&conn, "temp-1").unwrap().is_none());
        let msg = get_message(&conn, "srv-1").unwrap().unwrap();
        assert_eq!(msg.text, "hello");
        assert_eq!(get_messages_by_chat(&conn, "chat1").unwrap().len(), 1);
    }

    #[test]
    fn reassign_to_existing_id_rolls_back() {
        let db = Database::in_memory().unwrap();
        let conn = db.connection();

        upsert_message(&conn, &sample("temp-1", "chat1", 100)).unwrap();
        upsert_message(&conn, &sample("srv-1", "chat1", 200)).unwrap();

        assert!(reassign_message_id(&conn, "temp-1", "srv-1").is_err());
        // Both originals intact
        assert!(get_message(&conn, "temp-1").unwrap().is_some());
        assert!(get_message(&conn, "srv-1").unwrap().is_some());
    }

    #[test]
    fn confirm_rekeys_and_drops_pending() {
        let db = Database::in_memory().unwrap();
        let conn = db.connection();

        upsert_message(&conn, &sample("temp-1", "chat1", 100)).unwrap();
        crate::store::insert_pending(
            &conn,
            &crate::models::PendingMessage {
                message_id: "temp-1".to_string(),
                queued_at: 100,
            },
        )
        .unwrap();

        confirm_message(&conn, "temp-1", "srv-1").unwrap();

        let msg = get_message(&conn, "srv-1").unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Sent);
        assert!(!msg.local_only);
        assert!(crate::store::get_pending_ordered(&conn).unwrap().is_empty());
    }

    #[test]
    fn confirm_converges_when_subscription_won_the_race() {
        let db = Database::in_memory().unwrap();
        let conn = db.connection();

        // Optimistic copy plus the server copy the live merge already wrote
        upsert_message(&conn, &sample("temp-1", "chat1", 100)).unwrap();
        let mut confirmed = sample("srv-1", "chat1", 100);
        confirmed.local_only = false;
        confirmed.status = MessageStatus::Sent;
        upsert_message(&conn, &confirmed).unwrap();

        confirm_message(&conn, "temp-1", "srv-1").unwrap();

        let msgs = get_messages_by_chat(&conn, "chat1").unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, "srv-1");
    }

    #[test]
    fn batch_upsert_rolls_back_on_mid_batch_failure() {
        let db = Database::in_memory().unwrap();
        let conn = db.connection();
        conn.lock()
            .execute_batch(
                "CREATE TRIGGER reject_poison BEFORE INSERT ON messages \
                 WHEN NEW.text = 'poison' \
                 BEGIN SELECT RAISE(ABORT, 'poison row'); END;",
            )
            .unwrap();

        let mut poison = sample("m2", "chat1", 200);
        poison.text = "poison".to_string();
        let batch = vec![sample("m1", "chat1", 100), poison, sample("m3", "chat1", 300)];

        assert!(batch_upsert_messages(&conn, &batch).is_err());
        // All-or-nothing: the rows before the failure rolled back too
        assert!(get_messages_by_chat(&conn, "chat1").unwrap().is_empty());
    }

    #[test]
    fn corrupt_status_column_surfaces_as_error() {
        let db = Database::in_memory().unwrap();
        let conn = db.connection();

        upsert_message(&conn, &sample("m1", "chat1", 100)).unwrap();
        conn.lock()
            .execute("UPDATE messages SET status = 'garbled' WHERE id = 'm1'", [])
            .unwrap();

        assert!(get_message(&conn, "m1").is_err());
        assert!(get_messages_by_chat(&conn, "chat1").is_err());
    }

    #[test]
    fn failed_messages_are_discoverable() {
        let db = Database::in_memory().unwrap();
        let conn = db.connection();

        let mut failed = sample("m1", "chat1", 100);
        failed.status = MessageStatus::Failed;
        upsert_message(&conn, &failed).unwrap();
        upsert_message(&conn, &sample("m2", "chat1", 200)).unwrap();

        let failed = get_failed_messages(&conn).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "m1");
    }

    #[test]
    fn mark_read_is_append_only() {
        let db = Database::in_memory().unwrap();
        let conn = db.connection();

        let mut msg = sample("m1", "chat1", 100);
        msg.read_by.insert("bob".to_string(), 50);
        upsert_message(&conn, &msg).unwrap();

        mark_read(&conn, "chat1", "bob", 999).unwrap();
        mark_read(&conn, "chat1", "carol", 150).unwrap();

        let msg = get_message(&conn, "m1").unwrap().unwrap();
        // Existing entry untouched, new reader appended
        assert_eq!(msg.read_by.get("bob"), Some(&50));
        assert_eq!(msg.read_by.get("carol"), Some(&150));
    }

    #[test]
    fn chat_read_is_fast_over_1000_rows() {
        let db = Database::in_memory().unwrap();
        let conn = db.connection();

        let msgs: Vec<Message> = (0..1000)
            .map(|i| sample(&format!("m{i}"), "chat1", 1000 + i))
            .collect();
        batch_upsert_messages(&conn, &msgs).unwrap();
        // Rows in other chats should not slow the indexed read down
        let noise: Vec<Message> = (0..2000)
            .map(|i| sample(&format!("n{i}"), &format!("chat{}", 2 + i % 7), i))
            .collect();
        batch_upsert_messages(&conn, &noise).unwrap();

        let start = std::time::Instant::now();
        let msgs = get_messages_by_chat(&conn, "chat1").unwrap();
        let elapsed = start.elapsed();

        assert_eq!(msgs.len(), 1000);
        assert!(msgs.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(
            elapsed < std::time::Duration::from_millis(10),
            "read took {elapsed:?}"
        );
    }
}
