use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events pushed to clients over the WebSocket gateway.
///
/// `message_id` is always the client-generated message identifier, not the
/// store-generated row id, so clients can correlate events with messages
/// they sent before the server acknowledged them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// Server confirms successful authentication
    #[serde(rename = "ready")]
    Ready { user_id: Uuid, username: String },

    /// A new encrypted message was posted
    #[serde(rename = "new-message")]
    NewMessage {
        message_id: String,
        chat_id: Uuid,
        sender_id: Uuid,
    },

    /// The recipient read a message
    #[serde(rename = "message-read")]
    MessageRead { message_id: String, chat_id: Uuid },

    /// A message was purged for both sides (sender action or expiry)
    #[serde(rename = "message-deleted-remotely")]
    MessageDeletedRemotely { message_id: String, chat_id: Uuid },

    /// The sender set or cleared a message's auto-delete timer
    #[serde(rename = "message-auto-delete-set")]
    MessageAutoDeleteSet {
        message_id: String,
        chat_id: Uuid,
        ttl: Option<i64>,
    },

    /// A chat and all of its messages were removed
    #[serde(rename = "chat-deleted-remotely")]
    ChatDeletedRemotely { chat_id: Uuid },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to events for specific chats.
    /// The per-user channel is implicit after Identify; chat-scoped events
    /// are only forwarded for chats the client has subscribed to.
    Subscribe { chat_ids: Vec<Uuid> },
}
