/// Database row types — these map directly to SQLite rows.
/// Distinct from vesper-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: i64,
}

#[derive(Debug)]
pub struct ChatRow {
    pub id: String,
    pub participant_key: String,
    pub auto_delete_seconds: Option<i64>,
    pub last_message_id: Option<String>,
    pub last_activity_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ChatRow {
    /// Participant ids, decoded from the canonical key.
    pub fn participant_ids(&self) -> Vec<&str> {
        self.participant_key.split(':').collect()
    }
}

#[derive(Debug)]
pub struct MessageRow {
    /// Store-generated row id.
    pub id: String,
    /// Client-generated message identifier.
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub delivery_state: i64,
    pub is_deleted_for_sender: bool,
    pub is_deleted_for_recipient: bool,
    pub is_deleted_remotely: bool,
    pub ttl_seconds: Option<i64>,
    pub scheduled_deletion_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}
