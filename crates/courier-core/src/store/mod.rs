pub mod chats;
pub mod db;
pub mod messages;
pub mod pending;

pub use chats::{
    get_chat, get_chats_for_user, increment_unread, reset_unread, touch_chat_last_message,
    upsert_chat,
};
pub use db::Database;
pub use messages::{
    batch_upsert_messages, confirm_message, delete_message, get_failed_messages,
    get_local_only_messages, get_message, get_messages_by_chat, mark_read, reassign_message_id,
    set_message_status, upsert_message,
};
pub use pending::{delete_pending, get_pending_ordered, insert_pending};
