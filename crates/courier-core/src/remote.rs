//! Contracts for the external collaborators the data layer consumes: the
//! remote document store, the connectivity signal, durable key-value
//! config, and the identity/session provider. The core never talks to a
//! vendor API directly; everything arrives through these traits.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::models::{Chat, Message};

/// Transport-level connectivity as reported by the host platform. Used
/// only to trigger queue drains and sync resumes, never to gate local
/// writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub reachable: bool,
}

impl ConnectionStatus {
    pub fn online() -> Self {
        Self {
            connected: true,
            reachable: true,
        }
    }

    pub fn offline() -> Self {
        Self {
            connected: false,
            reachable: false,
        }
    }

    pub fn is_online(&self) -> bool {
        self.connected && self.reachable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One event from a live chat subscription: a full message snapshot plus
/// what happened to it. At-least-once delivery; in-order within one chat.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub message: Message,
}

/// The remote multi-writer document store, reduced to the capabilities
/// the core needs. Eventually consistent across clients.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Durably create one message; returns the server-issued id.
    async fn create_message(&self, msg: &Message) -> Result<String>;

    /// Create a batch in one round-trip. Server ids are returned in input
    /// order; a batch either commits whole or fails whole.
    async fn send_batch(&self, msgs: &[Message]) -> Result<Vec<String>>;

    /// Messages in a chat with timestamp strictly greater than `after_ts`,
    /// ascending, at most `limit`.
    async fn query_messages(
        &self,
        chat_id: &str,
        after_ts: i64,
        limit: usize,
    ) -> Result<Vec<Message>>;

    /// Chats the user participates in.
    async fn query_chats_for_user(&self, user_id: &str) -> Result<Vec<Chat>>;

    /// Open a live subscription for one chat. The channel is bounded;
    /// closing the receiver cancels the subscription. The sender side
    /// closing signals a dropped subscription.
    async fn subscribe_chat(&self, chat_id: &str) -> Result<mpsc::Receiver<ChangeEvent>>;
}

/// Host connectivity signal.
pub trait Connectivity: Send + Sync {
    fn status(&self) -> ConnectionStatus;

    /// Stream of status changes. Used by the runtime to trigger drains
    /// and delta syncs on reconnect.
    fn watch(&self) -> mpsc::Receiver<ConnectionStatus>;
}

/// Durable key-value config, used for the delta-sync checkpoint.
#[async_trait]
pub trait KvConfig: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Supplies the current subject id. Authentication itself is out of scope.
pub trait Identity: Send + Sync {
    fn current_user_id(&self) -> String;
}
