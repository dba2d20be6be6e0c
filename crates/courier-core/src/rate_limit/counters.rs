use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::rate_limit::{CounterStore, Window};

/// Counter store backed by the local sqlite database. Counters for an old
/// window index are simply never read again; nothing deletes them
/// eagerly.
pub struct SqliteCounterStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCounterStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

impl CounterStore for SqliteCounterStore {
    fn get_count(
        &self,
        subject: &str,
        feature: &str,
        window: Window,
        window_index: i64,
    ) -> Result<u64> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT count FROM rate_limit_counters \
             WHERE subject = ?1 AND feature = ?2 AND window = ?3 AND window_index = ?4",
        )?;
        let mut rows = stmt.query_map(
            params![subject, feature, window.as_str(), window_index],
            |row| row.get::<_, i64>(0),
        )?;
        match rows.next() {
            Some(row) => Ok(row?.max(0) as u64),
            None => Ok(0),
        }
    }

    fn increment_all(
        &self,
        subject: &str,
        feature: &str,
        entries: &[(Window, i64)],
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (window, window_index) in entries {
            tx.execute(
                "INSERT INTO rate_limit_counters (subject, feature, window, window_index, count) \
                 VALUES (?1, ?2, ?3, ?4, 1) \
                 ON CONFLICT(subject, feature, window, window_index) \
                 DO UPDATE SET count = count + 1",
                params![subject, feature, window.as_str(), window_index],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
