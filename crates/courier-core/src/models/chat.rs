use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::Direct => "direct",
            ChatType::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(ChatType::Direct),
            "group" => Some(ChatType::Group),
            _ => None,
        }
    }
}

/// Conversation container. `last_message`/`last_message_timestamp` are a
/// denormalized cache maintained by the queue and reconciler so chat lists
/// render without scanning the messages table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub chat_type: ChatType,
    /// Ordered, unique participant ids
    pub participants: Vec<String>,
    pub last_message: Option<String>,
    pub last_message_timestamp: Option<i64>,
    /// user id -> unread count, monotonic until reset on read
    pub unread_count: HashMap<String, u32>,
}

impl Chat {
    pub fn new(id: &str, chat_type: ChatType, participants: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            chat_type,
            participants,
            last_message: None,
            last_message_timestamp: None,
            unread_count: HashMap::new(),
        }
    }
}
