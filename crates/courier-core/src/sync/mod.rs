//! Sync reconciler: keeps the local store eventually consistent with the
//! remote store. Two modes: catch-up delta sync after a resume or
//! reconnect, and live per-chat merge while a chat is on screen. The UI
//! always re-reads the local store afterwards; nothing is patched in
//! memory.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::constants::{
    DEDUP_WINDOW_MS, DELTA_SYNC_BUDGET_LARGE, DELTA_SYNC_BUDGET_SMALL, DELTA_SYNC_SMALL_THRESHOLD,
    LAST_SYNC_KEY,
};
use crate::error::Result;
use crate::models::Message;
use crate::remote::{ChangeEvent, ChangeKind, KvConfig, RemoteStore};
use crate::store;

pub struct SyncReconciler {
    conn: Arc<Mutex<Connection>>,
    remote: Arc<dyn RemoteStore>,
    kv: Arc<dyn KvConfig>,
    user_id: String,
    config: SyncConfig,
}

impl SyncReconciler {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        remote: Arc<dyn RemoteStore>,
        kv: Arc<dyn KvConfig>,
        user_id: String,
        config: SyncConfig,
    ) -> Self {
        Self {
            conn,
            remote,
            kv,
            user_id,
            config,
        }
    }

    /// Catch up on everything that changed since the saved checkpoint.
    /// Per-chat fetches run with a bounded fan-out and fail in isolation;
    /// the results land in the local store as one transaction, and the
    /// checkpoint only advances after that write commits.
    pub async fn delta_sync(&self) -> Result<usize> {
        let started = Instant::now();
        let sync_started_at = chrono::Utc::now().timestamp_millis();
        let fallback =
            sync_started_at - self.config.fallback_window_hours * 60 * 60 * 1000;
        let since = match self.kv.get(LAST_SYNC_KEY).await? {
            Some(raw) => raw.parse::<i64>().unwrap_or(fallback),
            None => fallback,
        };

        let chats = self.remote.query_chats_for_user(&self.user_id).await?;
        debug!("delta sync over {} chats since {since}", chats.len());

        // Newly discovered chats get a local row; existing rows keep their
        // local unread state.
        for chat in &chats {
            if store::get_chat(&self.conn, &chat.id)?.is_none() {
                store::upsert_chat(&self.conn, chat)?;
            }
        }

        let limit = self.config.max_messages_per_chat;
        let remote = Arc::clone(&self.remote);
        let fetched: Vec<Vec<Message>> = stream::iter(chats.into_iter().map(|chat| {
            let remote = Arc::clone(&remote);
            async move {
                match remote.query_messages(&chat.id, since, limit).await {
                    Ok(msgs) => msgs,
                    Err(e) => {
                        // Isolated: one bad chat must not abort the others
                        warn!(chat_id = %chat.id, "delta fetch failed: {e}");
                        Vec::new()
                    }
                }
            }
        }))
        .buffer_unordered(self.config.fetch_concurrency)
        .collect()
        .await;

        let mut messages: Vec<Message> = fetched.into_iter().flatten().collect();
        for msg in &mut messages {
            msg.local_only = false;
        }

        store::batch_upsert_messages(&self.conn, &messages)?;
        self.kv.set(LAST_SYNC_KEY, &sync_started_at.to_string()).await?;

        let elapsed = started.elapsed();
        let budget = if messages.len() <= DELTA_SYNC_SMALL_THRESHOLD {
            DELTA_SYNC_BUDGET_SMALL
        } else {
            DELTA_SYNC_BUDGET_LARGE
        };
        if elapsed > budget {
            warn!(
                "delta sync of {} messages took {elapsed:?}, over the {budget:?} budget",
                messages.len()
            );
        } else {
            info!("delta sync complete: {} messages in {elapsed:?}", messages.len());
        }
        Ok(messages.len())
    }

    /// Merge one live change event into the local store.
    ///
    /// For added/modified, an optimistic local row by the same sender with
    /// the same text within five seconds of the incoming timestamp is the
    /// unconfirmed copy of this message: it is deleted before the
    /// server-id row is written, so the message never shows twice.
    pub fn apply_change(&self, event: &ChangeEvent) -> Result<()> {
        match event.kind {
            ChangeKind::Removed => {
                store::delete_message(&self.conn, &event.message.id)?;
                store::delete_pending(&self.conn, &event.message.id)?;
            }
            ChangeKind::Added | ChangeKind::Modified => {
                let mut incoming = event.message.clone();
                incoming.local_only = false;

                let candidates = store::get_local_only_messages(&self.conn, &incoming.chat_id)?;
                for local in candidates {
                    if local.id != incoming.id
                        && local.sender_id == incoming.sender_id
                        && local.text == incoming.text
                        && (local.timestamp - incoming.timestamp).abs() <= DEDUP_WINDOW_MS
                    {
                        debug!(
                            optimistic = %local.id,
                            confirmed = %incoming.id,
                            "dropping optimistic duplicate"
                        );
                        store::delete_message(&self.conn, &local.id)?;
                        store::delete_pending(&self.conn, &local.id)?;
                    }
                }
                store::upsert_message(&self.conn, &incoming)?;
            }
        }
        Ok(())
    }

    /// Live subscription loop for one chat. Runs until the owning task is
    /// dropped; a dropped or failed subscription reopens after a fixed
    /// delay rather than surfacing to the UI.
    pub async fn run_chat_subscription(&self, chat_id: &str) {
        loop {
            let mut rx = match self.remote.subscribe_chat(chat_id).await {
                Ok(rx) => {
                    info!(chat_id, "chat subscription open");
                    rx
                }
                Err(e) => {
                    warn!(
                        chat_id,
                        "subscribe failed: {e}; retrying in {:?}", self.config.resubscribe_delay
                    );
                    tokio::time::sleep(self.config.resubscribe_delay).await;
                    continue;
                }
            };

            while let Some(event) = rx.recv().await {
                if let Err(e) = self.apply_change(&event) {
                    // Storage failures abort this event only; the stream
                    // keeps flowing
                    error!(chat_id, "failed to apply change: {e}");
                }
            }

            warn!(
                chat_id,
                "subscription dropped; resubscribing in {:?}", self.config.resubscribe_delay
            );
            tokio::time::sleep(self.config.resubscribe_delay).await;
        }
    }
}
