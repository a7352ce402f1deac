use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared across vesper-api (REST middleware) and vesper-gateway
/// (WebSocket authentication). Canonical definition lives here in
/// vesper-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Users --

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub created_at: i64,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    /// Client-generated message identifier, unique across all messages.
    pub message_id: String,
    pub recipient_id: Uuid,
    /// Explicit chat to post into; omitted for direct sends, where the
    /// server resolves or creates the 2-party chat.
    pub chat_id: Option<Uuid>,
    /// Base64 ciphertext — opaque to the server.
    pub ciphertext: String,
    /// Base64 initialization vector.
    pub iv: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub id: Uuid,
    pub message_id: String,
    pub chat_id: Uuid,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub message_id: String,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub ciphertext: String,
    pub iv: String,
    /// 0 = sent, 1 = delivered, 2 = read
    pub delivery_state: i64,
    pub ttl_seconds: Option<i64>,
    pub scheduled_deletion_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Page returned by the chat-messages endpoint. `newly_read` lists the
/// client message ids this fetch just transitioned to read, so callers can
/// observe the read side effect instead of inferring it from timing.
#[derive(Debug, Serialize)]
pub struct ChatMessagesResponse {
    pub messages: Vec<MessageResponse>,
    pub newly_read: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoDeleteRequest {
    /// None or a non-positive value clears the timer.
    pub seconds: Option<i64>,
}

// -- Chats --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChatRequest {
    pub participants: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub id: Uuid,
    pub participants: Vec<Uuid>,
    pub auto_delete_seconds: Option<i64>,
    pub last_message_id: Option<Uuid>,
    pub last_activity_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}
