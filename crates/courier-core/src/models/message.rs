use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Delivery state of a message. Progression is one-way except for the
/// manual-retry transition `Failed -> Sending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sending" => Some(MessageStatus::Sending),
            "sent" => Some(MessageStatus::Sent),
            "delivered" => Some(MessageStatus::Delivered),
            "failed" => Some(MessageStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Client-generated uuid until the server confirms the message, then the
    /// server-issued id. Changes exactly once, at confirmation.
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
    /// Language tag for the source language of `text`
    pub original_language: String,
    /// Milliseconds since epoch. Client estimate before confirmation, the
    /// server-assigned value afterwards.
    pub timestamp: i64,
    pub status: MessageStatus,
    /// user id -> read timestamp (ms). Append-only, keys never removed.
    pub read_by: HashMap<String, i64>,
    pub media_url: Option<String>,
    /// True while this row exists only on-device
    pub local_only: bool,
}

impl Message {
    /// Build an optimistic outgoing message with a temporary uuid.
    pub fn outgoing(chat_id: &str, sender_id: &str, text: &str, language: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            original_language: language.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            status: MessageStatus::Sending,
            read_by: HashMap::new(),
            media_url: None,
            local_only: true,
        }
    }
}

/// Durable record of a queued message, keyed by the temporary id. Exists
/// from enqueue until the server accepts the message or it is abandoned
/// as failed.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub message_id: String,
    pub queued_at: i64,
}
