pub mod chat;
pub mod message;

pub use chat::{Chat, ChatType};
pub use message::{Message, MessageStatus, PendingMessage};
