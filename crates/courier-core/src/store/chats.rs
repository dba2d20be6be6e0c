use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::models::{Chat, ChatType};

fn chat_from_row(row: &Row) -> rusqlite::Result<Chat> {
    let chat_type: String = row.get(1)?;
    let participants: String = row.get(2)?;
    let participants: Vec<String> = serde_json::from_str(&participants).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let unread: String = row.get(5)?;
    let unread_count: HashMap<String, u32> = serde_json::from_str(&unread).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let chat_type = ChatType::parse(&chat_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown chat type: {chat_type}").into(),
        )
    })?;

    Ok(Chat {
        id: row.get(0)?,
        chat_type,
        participants,
        last_message: row.get(3)?,
        last_message_timestamp: row.get(4)?,
        unread_count,
    })
}

pub fn upsert_chat(conn: &Arc<Mutex<Connection>>, chat: &Chat) -> Result<()> {
    let conn = conn.lock();
    conn.execute(
        "INSERT OR REPLACE INTO chats \
         (id, chat_type, participants, last_message, last_message_timestamp, unread_count) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            chat.id,
            chat.chat_type.as_str(),
            serde_json::to_string(&chat.participants)?,
            chat.last_message,
            chat.last_message_timestamp,
            serde_json::to_string(&chat.unread_count)?,
        ],
    )?;
    Ok(())
}

pub fn get_chat(conn: &Arc<Mutex<Connection>>, id: &str) -> Result<Option<Chat>> {
    let conn = conn.lock();
    let mut stmt = conn.prepare(
        "SELECT id, chat_type, participants, last_message, last_message_timestamp, unread_count \
         FROM chats WHERE id = ?1",
    )?;
    let mut rows = stmt.query_map(params![id], chat_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn get_chats_for_user(conn: &Arc<Mutex<Connection>>, user_id: &str) -> Result<Vec<Chat>> {
    let conn = conn.lock();
    let mut stmt = conn.prepare(
        "SELECT id, chat_type, participants, last_message, last_message_timestamp, unread_count \
         FROM chats ORDER BY last_message_timestamp DESC",
    )?;
    let rows = stmt.query_map([], chat_from_row)?;
    let mut chats = Vec::new();
    for row in rows {
        let chat = row?;
        if chat.participants.iter().any(|p| p == user_id) {
            chats.push(chat);
        }
    }
    Ok(chats)
}

/// Refresh the denormalized last-message cache. Last writer wins by
/// timestamp: an older message never overwrites a newer cache entry.
pub fn touch_chat_last_message(
    conn: &Arc<Mutex<Connection>>,
    chat_id: &str,
    text: &str,
    timestamp: i64,
) -> Result<()> {
    let conn = conn.lock();
    conn.execute(
        "UPDATE chats SET last_message = ?2, last_message_timestamp = ?3 \
         WHERE id = ?1 AND (last_message_timestamp IS NULL OR last_message_timestamp <= ?3)",
        params![chat_id, text, timestamp],
    )?;
    Ok(())
}

/// Bump unread counts for everyone in the chat except the sender.
pub fn increment_unread(
    conn: &Arc<Mutex<Connection>>,
    chat_id: &str,
    sender_id: &str,
) -> Result<()> {
    let mut conn = conn.lock();
    let tx = conn.transaction()?;
    let row = {
        let mut stmt = tx.prepare("SELECT participants, unread_count FROM chats WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![chat_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        match rows.next() {
            Some(row) => Some(row?),
            None => None,
        }
    };
    if let Some((participants, unread)) = row {
        let participants: Vec<String> = serde_json::from_str(&participants)?;
        let mut unread: HashMap<String, u32> = serde_json::from_str(&unread)?;
        for p in participants {
            if p != sender_id {
                *unread.entry(p).or_insert(0) += 1;
            }
        }
        tx.execute(
            "UPDATE chats SET unread_count = ?2 WHERE id = ?1",
            params![chat_id, serde_json::to_string(&unread)?],
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn reset_unread(conn: &Arc<Mutex<Connection>>, chat_id: &str, user_id: &str) -> Result<()> {
    let mut conn = conn.lock();
    let tx = conn.transaction()?;
    let unread = {
        let mut stmt = tx.prepare("SELECT unread_count FROM chats WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![chat_id], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(row) => Some(row?),
            None => None,
        }
    };
    if let Some(unread) = unread {
        let mut unread: HashMap<String, u32> = serde_json::from_str(&unread)?;
        unread.insert(user_id.to_string(), 0);
        tx.execute(
            "UPDATE chats SET unread_count = ?2 WHERE id = ?1",
            params![chat_id, serde_json::to_string(&unread)?],
        )?;
    }
    tx.commit()?;
    Ok(())
}
