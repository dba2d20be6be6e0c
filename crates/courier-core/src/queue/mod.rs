//! Outbound message queue. Owns every message from the moment the user
//! hits send until the server durably accepts it, surviving restarts and
//! network loss. Persistence happens before the in-memory queue is
//! touched, so a crash right after enqueue loses nothing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::Result;
use crate::models::{Message, MessageStatus, PendingMessage};
use crate::remote::{ConnectionStatus, Connectivity, RemoteStore};
use crate::store;

#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub is_processing: bool,
    pub connection_status: ConnectionStatus,
}

/// Outcome of one drain pass. A halted drain left later messages queued
/// after a permanent failure; they go out on the next trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: usize,
    pub failed: usize,
    pub halted: bool,
}

pub struct MessageQueue {
    conn: Arc<parking_lot::Mutex<Connection>>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<dyn Connectivity>,
    config: QueueConfig,
    /// Temp ids in enqueue order. Enqueue appends under the lock before
    /// any drain reads, so a drain started later always sees it.
    queue: parking_lot::Mutex<VecDeque<String>>,
    /// Drain guard: concurrent drain requests are no-ops while one is in
    /// flight.
    drain: tokio::sync::Mutex<()>,
}

impl MessageQueue {
    pub fn new(
        conn: Arc<parking_lot::Mutex<Connection>>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn Connectivity>,
        config: QueueConfig,
    ) -> Self {
        Self {
            conn,
            remote,
            connectivity,
            config,
            queue: parking_lot::Mutex::new(VecDeque::new()),
            drain: tokio::sync::Mutex::new(()),
        }
    }

    /// Durably persist a message and its pending record, then append it to
    /// the in-memory queue. Returns once both writes have committed.
    pub fn queue_message(&self, msg: &Message) -> Result<()> {
        let mut msg = msg.clone();
        msg.status = MessageStatus::Sending;
        msg.local_only = true;

        store::upsert_message(&self.conn, &msg)?;
        store::insert_pending(
            &self.conn,
            &PendingMessage {
                message_id: msg.id.clone(),
                queued_at: chrono::Utc::now().timestamp_millis(),
            },
        )?;

        self.queue.lock().push_back(msg.id.clone());
        info!(message_id = %msg.id, chat_id = %msg.chat_id, "queued message");
        Ok(())
    }

    /// Rehydrate the in-memory queue from durable pending records, in
    /// enqueue order. Called on startup.
    pub fn load_pending(&self) -> Result<usize> {
        let pending = store::get_pending_ordered(&self.conn)?;
        let mut queue = self.queue.lock();
        let mut loaded = 0;
        for p in pending {
            if !queue.contains(&p.message_id) {
                queue.push_back(p.message_id);
                loaded += 1;
            }
        }
        if loaded > 0 {
            info!("rehydrated {loaded} pending messages from storage");
        }
        Ok(loaded)
    }

    pub fn get_queue_status(&self) -> QueueStatus {
        QueueStatus {
            queue_length: self.queue.lock().len(),
            is_processing: self.drain.try_lock().is_err(),
            connection_status: self.connectivity.status(),
        }
    }

    /// Drain the queue in batches, preserving enqueue order. Idempotent
    /// and reentrant-safe: if a drain is already running this returns
    /// immediately and the running drain picks up newly queued items.
    pub async fn process_pending_messages(&self) -> Result<DrainReport> {
        let _guard = match self.drain.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("drain already in progress");
                return Ok(DrainReport::default());
            }
        };

        let mut report = DrainReport::default();
        loop {
            let batch_ids: Vec<String> = {
                let mut queue = self.queue.lock();
                let n = self.config.batch_size.min(queue.len());
                queue.drain(..n).collect()
            };
            if batch_ids.is_empty() {
                break;
            }

            let mut batch = Vec::with_capacity(batch_ids.len());
            for id in &batch_ids {
                match store::get_message(&self.conn, id)? {
                    Some(msg) => batch.push(msg),
                    // Deleted since enqueue; drop its pending record too
                    None => store::delete_pending(&self.conn, id)?,
                }
            }
            if batch.is_empty() {
                continue;
            }

            match self.send_batch_with_retry(&batch).await {
                Ok(server_ids) => {
                    let confirmed: Vec<(&Message, &str)> = batch
                        .iter()
                        .zip(server_ids.iter().map(String::as_str))
                        .collect();
                    self.confirm(&confirmed)?;
                    report.sent += confirmed.len();
                }
                Err(e) => {
                    warn!(
                        "batch of {} failed permanently ({e}), falling back to individual sends",
                        batch.len()
                    );
                    let halted = self.send_individually(&batch, &mut report).await?;
                    if halted {
                        report.halted = true;
                        return Ok(report);
                    }
                }
            }
        }
        Ok(report)
    }

    /// Re-queue every failed message from the store and drain. The manual
    /// retry path: `failed -> sending` happens only here.
    pub async fn retry_failed_messages(&self) -> Result<DrainReport> {
        let failed = store::get_failed_messages(&self.conn)?;
        if failed.is_empty() {
            return Ok(DrainReport::default());
        }
        info!("re-queuing {} failed messages", failed.len());
        for msg in &failed {
            store::set_message_status(&self.conn, &msg.id, MessageStatus::Sending)?;
            store::insert_pending(
                &self.conn,
                &PendingMessage {
                    message_id: msg.id.clone(),
                    queued_at: chrono::Utc::now().timestamp_millis(),
                },
            )?;
            self.queue.lock().push_back(msg.id.clone());
        }
        self.process_pending_messages().await
    }

    /// Send each message of a failed batch on its own, in order. Stops at
    /// the first permanent failure, marks that message failed, and pushes
    /// the rest back to the front of the queue. Returns whether the drain
    /// should halt.
    async fn send_individually(
        &self,
        batch: &[Message],
        report: &mut DrainReport,
    ) -> Result<bool> {
        let mut confirmed: Vec<(&Message, String)> = Vec::new();
        let mut halt_at: Option<usize> = None;

        for (i, msg) in batch.iter().enumerate() {
            match self.send_one_with_retry(msg).await {
                Ok(server_id) => confirmed.push((msg, server_id)),
                Err(e) => {
                    error!(message_id = %msg.id, "message failed permanently: {e}");
                    store::set_message_status(&self.conn, &msg.id, MessageStatus::Failed)?;
                    // Abandoned: the pending record goes, the failed row stays
                    store::delete_pending(&self.conn, &msg.id)?;
                    report.failed += 1;
                    halt_at = Some(i);
                    break;
                }
            }
        }

        let confirmed: Vec<(&Message, &str)> = confirmed
            .iter()
            .map(|(msg, sid)| (*msg, sid.as_str()))
            .collect();
        self.confirm(&confirmed)?;
        report.sent += confirmed.len();

        if let Some(i) = halt_at {
            let mut queue = self.queue.lock();
            for msg in batch[i + 1..].iter().rev() {
                queue.push_front(msg.id.clone());
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Apply confirmation side effects: rekey to the server id, mark sent,
    /// drop the pending record, then refresh each touched chat's
    /// last-message cache once, using the newest confirmed message in
    /// that chat.
    fn confirm(&self, confirmed: &[(&Message, &str)]) -> Result<()> {
        for &(msg, server_id) in confirmed {
            store::confirm_message(&self.conn, &msg.id, server_id)?;
            debug!(temp_id = %msg.id, server_id = %server_id, "message confirmed");
        }

        let mut newest: HashMap<&str, &Message> = HashMap::new();
        for &(msg, _) in confirmed {
            newest
                .entry(msg.chat_id.as_str())
                .and_modify(|cur| {
                    if msg.timestamp > cur.timestamp {
                        *cur = msg;
                    }
                })
                .or_insert(msg);
        }
        for (chat_id, msg) in newest {
            store::touch_chat_last_message(&self.conn, chat_id, &msg.text, msg.timestamp)?;
        }
        Ok(())
    }

    async fn send_batch_with_retry(&self, batch: &[Message]) -> Result<Vec<String>> {
        let mut attempt = 0;
        loop {
            match self.remote.send_batch(batch).await {
                Ok(ids) => return Ok(ids),
                Err(e) if e.is_transient() && attempt < self.config.retry_schedule.len() => {
                    let delay = self.config.retry_schedule[attempt];
                    attempt += 1;
                    warn!("transient batch failure (attempt {attempt}): {e}; retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_one_with_retry(&self, msg: &Message) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.remote.create_message(msg).await {
                Ok(id) => return Ok(id),
                Err(e) if e.is_transient() && attempt < self.config.retry_schedule.len() => {
                    let delay = self.config.retry_schedule[attempt];
                    attempt += 1;
                    warn!(
                        message_id = %msg.id,
                        "transient send failure (attempt {attempt}): {e}; retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
