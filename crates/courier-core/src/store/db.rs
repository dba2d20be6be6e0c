use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::Result;

/// Durable local store. A single sqlite connection behind a mutex; every
/// component treats this as the consistency boundary.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                text TEXT NOT NULL,
                original_language TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                status TEXT NOT NULL,
                read_by TEXT NOT NULL,
                media_url TEXT,
                local_only INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat_ts ON messages(chat_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_messages_status ON messages(status);

            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                chat_type TEXT NOT NULL,
                participants TEXT NOT NULL,
                last_message TEXT,
                last_message_timestamp INTEGER,
                unread_count TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pending_messages (
                message_id TEXT PRIMARY KEY,
                queued_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rate_limit_counters (
                subject TEXT NOT NULL,
                feature TEXT NOT NULL,
                window TEXT NOT NULL,
                window_index INTEGER NOT NULL,
                count INTEGER NOT NULL,
                PRIMARY KEY (subject, feature, window, window_index)
            );
            "#,
        )?;
        Ok(())
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }
}
