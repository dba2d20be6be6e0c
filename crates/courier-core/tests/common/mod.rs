//! In-memory fakes for the external collaborators, shared by the
//! integration tests. The fake remote can be scripted to fail batches or
//! individual messages, go offline, and drive live subscriptions.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use courier_core::{
    ChangeEvent, Chat, ConnectionStatus, Connectivity, CoreError, Identity, KvConfig, Message,
    RemoteStore, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fail {
    Transient,
    Terminal,
}

fn make_err(fail: Fail) -> CoreError {
    match fail {
        Fail::Transient => CoreError::NetworkUnavailable,
        Fail::Terminal => CoreError::PermissionDenied,
    }
}

#[derive(Default)]
pub struct FakeRemote {
    next_id: AtomicU64,
    pub offline: AtomicBool,
    /// Accepted messages in transmission order, with their server ids
    pub accepted: Mutex<Vec<(String, Message)>>,
    /// Size of each send_batch call, in call order
    pub batch_sizes: Mutex<Vec<usize>>,
    pub batch_attempts: AtomicUsize,
    /// When set, every send_batch call fails this way
    pub batch_mode: Mutex<Option<Fail>>,
    /// One scripted failure per send_batch call, popped front
    pub batch_script: Mutex<VecDeque<Fail>>,
    /// Individual sends of messages with these texts always fail this way
    pub reject_texts: Mutex<HashMap<String, Fail>>,
    /// Optional artificial latency per send_batch call
    pub batch_delay: Mutex<Option<Duration>>,
    /// Server-side state for delta queries
    pub chats: Mutex<Vec<Chat>>,
    pub server_messages: Mutex<HashMap<String, Vec<Message>>>,
    /// Chats whose message query always fails transiently
    pub broken_chats: Mutex<HashSet<String>>,
    subs: Mutex<HashMap<String, mpsc::Sender<ChangeEvent>>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue_id(&self) -> String {
        format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Ids of accepted messages in the order the server received them.
    pub fn accepted_texts(&self) -> Vec<String> {
        self.accepted.lock().iter().map(|(_, m)| m.text.clone()).collect()
    }

    /// Push a change event into the open subscription for a chat.
    pub async fn emit(&self, chat_id: &str, event: ChangeEvent) {
        let tx = self
            .subs
            .lock()
            .get(chat_id)
            .cloned()
            .expect("no open subscription");
        tx.send(event).await.expect("subscription receiver gone");
    }

    /// Close the open subscription for a chat, as a dropped stream would.
    pub fn drop_subscription(&self, chat_id: &str) {
        self.subs.lock().remove(chat_id);
    }

    pub fn has_subscription(&self, chat_id: &str) -> bool {
        self.subs.lock().contains_key(chat_id)
    }

    fn accept(&self, msg: &Message) -> String {
        let id = self.issue_id();
        self.accepted.lock().push((id.clone(), msg.clone()));
        id
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn create_message(&self, msg: &Message) -> Result<String> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CoreError::NetworkUnavailable);
        }
        if let Some(fail) = self.reject_texts.lock().get(&msg.text).copied() {
            return Err(make_err(fail));
        }
        Ok(self.accept(msg))
    }

    async fn send_batch(&self, msgs: &[Message]) -> Result<Vec<String>> {
        self.batch_attempts.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().push(msgs.len());
        let delay = *self.batch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(CoreError::NetworkUnavailable);
        }
        if let Some(fail) = *self.batch_mode.lock() {
            return Err(make_err(fail));
        }
        if let Some(fail) = self.batch_script.lock().pop_front() {
            return Err(make_err(fail));
        }
        {
            let rejects = self.reject_texts.lock();
            if let Some(fail) = msgs.iter().find_map(|m| rejects.get(&m.text).copied()) {
                return Err(make_err(fail));
            }
        }
        Ok(msgs.iter().map(|m| self.accept(m)).collect())
    }

    async fn query_messages(
        &self,
        chat_id: &str,
        after_ts: i64,
        limit: usize,
    ) -> Result<Vec<Message>> {
        if self.broken_chats.lock().contains(chat_id) {
            return Err(CoreError::DeadlineExceeded);
        }
        let mut msgs: Vec<Message> = self
            .server_messages
            .lock()
            .get(chat_id)
            .map(|v| v.iter().filter(|m| m.timestamp > after_ts).cloned().collect())
            .unwrap_or_default();
        msgs.sort_by_key(|m| m.timestamp);
        msgs.truncate(limit);
        Ok(msgs)
    }

    async fn query_chats_for_user(&self, user_id: &str) -> Result<Vec<Chat>> {
        Ok(self
            .chats
            .lock()
            .iter()
            .filter(|c| c.participants.iter().any(|p| p == user_id))
            .cloned()
            .collect())
    }

    async fn subscribe_chat(&self, chat_id: &str) -> Result<mpsc::Receiver<ChangeEvent>> {
        let (tx, rx) = mpsc::channel(16);
        self.subs.lock().insert(chat_id.to_string(), tx);
        Ok(rx)
    }
}

pub struct FakeConnectivity {
    status: Mutex<ConnectionStatus>,
    watchers: Mutex<Vec<mpsc::Sender<ConnectionStatus>>>,
}

impl FakeConnectivity {
    pub fn new(status: ConnectionStatus) -> Self {
        Self {
            status: Mutex::new(status),
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub async fn set(&self, status: ConnectionStatus) {
        *self.status.lock() = status;
        let watchers = self.watchers.lock().clone();
        for tx in watchers {
            let _ = tx.send(status).await;
        }
    }
}

impl Connectivity for FakeConnectivity {
    fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    fn watch(&self) -> mpsc::Receiver<ConnectionStatus> {
        let (tx, rx) = mpsc::channel(16);
        self.watchers.lock().push(tx);
        rx
    }
}

#[derive(Default)]
pub struct FakeKv {
    values: Mutex<HashMap<String, String>>,
}

impl FakeKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvConfig for FakeKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub struct FakeIdentity(pub String);

impl Identity for FakeIdentity {
    fn current_user_id(&self) -> String {
        self.0.clone()
    }
}

/// Poll until `check` passes or two seconds elapse.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}
