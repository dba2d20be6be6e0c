//! Wires the store, queue, reconciler, and rate limiter together and owns
//! the background tasks: the connectivity watcher that triggers drains
//! and delta syncs on reconnect, and one live-subscription task per
//! watched chat. The UI layer talks to `CoreRuntime` and reads all
//! message state back out of the local store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::CoreConfig;
use crate::constants::MAX_TEXT_LEN;
use crate::error::{CoreError, Result};
use crate::models::{Chat, Message};
use crate::queue::{DrainReport, MessageQueue, QueueStatus};
use crate::rate_limit::{RateLimiter, SqliteCounterStore};
use crate::remote::{Connectivity, Identity, KvConfig, RemoteStore};
use crate::store::{self, Database};
use crate::sync::SyncReconciler;

pub struct CoreRuntime {
    conn: Arc<Mutex<Connection>>,
    queue: Arc<MessageQueue>,
    reconciler: Arc<SyncReconciler>,
    limiter: RateLimiter,
    identity: Arc<dyn Identity>,
    connectivity: Arc<dyn Connectivity>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    watched_chats: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl CoreRuntime {
    /// Open the local database, rehydrate the outbound queue from durable
    /// pending records, and build the components. Call `start` afterwards
    /// to begin reacting to connectivity changes.
    pub fn new(
        config: CoreConfig,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn Connectivity>,
        kv: Arc<dyn KvConfig>,
        identity: Arc<dyn Identity>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db = Database::new(config.data_dir.join("courier.db"))?;
        let conn = db.connection();

        let queue = Arc::new(MessageQueue::new(
            conn.clone(),
            Arc::clone(&remote),
            Arc::clone(&connectivity),
            config.queue.clone(),
        ));
        queue.load_pending()?;

        let reconciler = Arc::new(SyncReconciler::new(
            conn.clone(),
            Arc::clone(&remote),
            kv,
            identity.current_user_id(),
            config.sync.clone(),
        ));

        let limiter = RateLimiter::new(Arc::new(SqliteCounterStore::new(conn.clone())));

        Ok(Self {
            conn,
            queue,
            reconciler,
            limiter,
            identity,
            connectivity,
            watcher: Mutex::new(None),
            watched_chats: Mutex::new(HashMap::new()),
        })
    }

    /// Spawn the connectivity watcher. If already online, any rehydrated
    /// queue drains immediately and a delta sync runs; after that, every
    /// offline-to-online transition does the same.
    pub fn start(&self) {
        let mut rx = self.connectivity.watch();
        let queue = Arc::clone(&self.queue);
        let reconciler = Arc::clone(&self.reconciler);
        let online_at_start = self.connectivity.status().is_online();

        let handle = tokio::spawn(async move {
            if online_at_start {
                if queue.get_queue_status().queue_length > 0 {
                    info!("draining messages left queued from the previous run");
                    if let Err(e) = queue.process_pending_messages().await {
                        error!("startup queue drain failed: {e}");
                    }
                }
                if let Err(e) = reconciler.delta_sync().await {
                    error!("startup delta sync failed: {e}");
                }
            }

            let mut was_online = online_at_start;
            while let Some(status) = rx.recv().await {
                let online = status.is_online();
                if online && !was_online {
                    info!("connectivity restored, draining queue and syncing");
                    if let Err(e) = queue.process_pending_messages().await {
                        error!("queue drain failed: {e}");
                    }
                    if let Err(e) = reconciler.delta_sync().await {
                        error!("delta sync failed: {e}");
                    }
                }
                was_online = online;
            }
        });
        *self.watcher.lock() = Some(handle);
    }

    /// Build an optimistic message from the current user and enqueue it.
    /// The message is durable once this returns.
    pub fn send_message(&self, chat_id: &str, text: &str, language: &str) -> Result<Message> {
        if text.chars().count() > MAX_TEXT_LEN {
            return Err(CoreError::MalformedPayload(format!(
                "message text over {MAX_TEXT_LEN} characters"
            )));
        }
        let msg = Message::outgoing(chat_id, &self.identity.current_user_id(), text, language);
        self.queue.queue_message(&msg)?;
        Ok(msg)
    }

    pub fn queue_message(&self, msg: &Message) -> Result<()> {
        self.queue.queue_message(msg)
    }

    pub async fn process_pending_messages(&self) -> Result<DrainReport> {
        self.queue.process_pending_messages().await
    }

    pub async fn retry_failed_messages(&self) -> Result<DrainReport> {
        self.queue.retry_failed_messages().await
    }

    pub fn get_queue_status(&self) -> QueueStatus {
        self.queue.get_queue_status()
    }

    pub async fn delta_sync(&self) -> Result<usize> {
        self.reconciler.delta_sync().await
    }

    pub fn get_messages_by_chat(&self, chat_id: &str) -> Result<Vec<Message>> {
        store::get_messages_by_chat(&self.conn, chat_id)
    }

    pub fn get_chats(&self) -> Result<Vec<Chat>> {
        store::get_chats_for_user(&self.conn, &self.identity.current_user_id())
    }

    /// Record the current user as having read the chat and clear their
    /// unread counter.
    pub fn mark_chat_read(&self, chat_id: &str) -> Result<()> {
        let user_id = self.identity.current_user_id();
        let now = chrono::Utc::now().timestamp_millis();
        store::mark_read(&self.conn, chat_id, &user_id, now)?;
        store::reset_unread(&self.conn, chat_id, &user_id)
    }

    /// Open a live subscription for a chat being viewed. No-op if already
    /// watched.
    pub fn watch_chat(&self, chat_id: &str) {
        let mut watched = self.watched_chats.lock();
        if watched.contains_key(chat_id) {
            return;
        }
        let reconciler = Arc::clone(&self.reconciler);
        let id = chat_id.to_string();
        let handle = tokio::spawn(async move {
            reconciler.run_chat_subscription(&id).await;
        });
        watched.insert(chat_id.to_string(), handle);
    }

    pub fn unwatch_chat(&self, chat_id: &str) {
        if let Some(handle) = self.watched_chats.lock().remove(chat_id) {
            handle.abort();
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
        for (_, handle) in self.watched_chats.lock().drain() {
            handle.abort();
        }
        info!("core runtime stopped");
    }
}

impl Drop for CoreRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
