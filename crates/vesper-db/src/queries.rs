use crate::Database;
use crate::models::{ChatRow, MessageRow, UserRow};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row, params};

const MESSAGE_COLS: &str = "id, message_id, chat_id, sender_id, recipient_id, ciphertext, iv, \
     delivery_state, is_deleted_for_sender, is_deleted_for_recipient, is_deleted_remotely, \
     ttl_seconds, scheduled_deletion_at, created_at, updated_at";

const CHAT_COLS: &str = "id, participant_key, auto_delete_seconds, last_message_id, \
     last_activity_at, created_at, updated_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str, now: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, username, password_hash, now],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn search_users(&self, pattern: &str, exclude_id: &str, limit: u32) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, created_at FROM users
                 WHERE username LIKE '%' || ?1 || '%' AND id != ?2
                 ORDER BY username LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![pattern, exclude_id, limit], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Chats --

    /// Find-or-create by the canonical participant key. `INSERT OR IGNORE`
    /// plus the UNIQUE constraint make this race-safe: the loser of a
    /// concurrent create falls through to the re-read and returns the
    /// winner's row.
    pub fn find_or_create_chat(
        &self,
        candidate_id: &str,
        participant_key: &str,
        participants: &[String],
        now: i64,
    ) -> Result<ChatRow> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO chats (id, participant_key, last_activity_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3, ?3)",
                params![candidate_id, participant_key, now],
            )?;

            if inserted > 0 {
                for user_id in participants {
                    conn.execute(
                        "INSERT INTO chat_participants (chat_id, user_id) VALUES (?1, ?2)",
                        params![candidate_id, user_id],
                    )?;
                }
            }

            query_chat_by_key(conn, participant_key)?
                .ok_or_else(|| anyhow!("chat missing after upsert for key {}", participant_key))
        })
    }

    pub fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM chats WHERE id = ?1", CHAT_COLS);
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([chat_id], map_chat).optional()
        })
    }

    pub fn is_chat_participant(&self, chat_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id, user_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub fn list_chats_for_user(&self, user_id: &str) -> Result<Vec<ChatRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chats c
                 JOIN chat_participants p ON p.chat_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY c.updated_at DESC",
                CHAT_COLS
                    .split(", ")
                    .map(|c| format!("c.{}", c))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], map_chat)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_chat_auto_delete(&self, chat_id: &str, seconds: Option<i64>, now: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE chats SET auto_delete_seconds = ?2, updated_at = ?3 WHERE id = ?1",
                params![chat_id, seconds, now],
            )?;
            Ok(changed > 0)
        })
    }

    /// Bump last-activity and point the chat at its newest message.
    pub fn touch_chat_activity(&self, chat_id: &str, last_message_id: &str, now: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE chats SET last_message_id = ?2, last_activity_at = ?3, updated_at = ?3
                 WHERE id = ?1",
                params![chat_id, last_message_id, now],
            )?;
            Ok(())
        })
    }

    /// Repoint `last_message_id` at the newest non-purged message, or NULL.
    /// Called after a remote delete so the chat never references a purged row.
    pub fn repoint_last_message(&self, chat_id: &str, now: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE chats SET last_message_id = (
                     SELECT id FROM messages
                     WHERE chat_id = ?1 AND is_deleted_remotely = 0
                     ORDER BY created_at DESC LIMIT 1
                 ), updated_at = ?2
                 WHERE id = ?1",
                params![chat_id, now],
            )?;
            Ok(())
        })
    }

    /// Chats whose own auto-delete window has elapsed since last activity.
    pub fn expired_chats(&self, now: i64) -> Result<Vec<ChatRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chats
                 WHERE auto_delete_seconds IS NOT NULL
                   AND last_activity_at + auto_delete_seconds * 1000 <= ?1",
                CHAT_COLS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([now], map_chat)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Cascade order is messages-then-chat: a crash in between leaves an
    /// orphaned chat that the next sweep re-selects, never dangling messages.
    pub fn delete_chat_cascade(&self, chat_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM messages WHERE chat_id = ?1", [chat_id])?;
            let changed = conn.execute("DELETE FROM chats WHERE id = ?1", [chat_id])?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    #[allow(clippy::too_many_arguments)]
    pub fn insert_message(
        &self,
        id: &str,
        message_id: &str,
        chat_id: &str,
        sender_id: &str,
        recipient_id: &str,
        ciphertext: &[u8],
        iv: &[u8],
        ttl_seconds: Option<i64>,
        scheduled_deletion_at: Option<i64>,
        now: i64,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, message_id, chat_id, sender_id, recipient_id,
                     ciphertext, iv, ttl_seconds, scheduled_deletion_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    id,
                    message_id,
                    chat_id,
                    sender_id,
                    recipient_id,
                    ciphertext,
                    iv,
                    ttl_seconds,
                    scheduled_deletion_at,
                    now
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, message_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages WHERE message_id = ?1", MESSAGE_COLS);
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([message_id], map_message).optional()
        })
    }

    /// Monotonic delivery advance: only moves the state forward, reports
    /// whether anything changed. Concurrent writers cannot regress it.
    pub fn advance_delivery(&self, message_id: &str, target: i64, now: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET delivery_state = ?2, updated_at = ?3
                 WHERE message_id = ?1 AND delivery_state < ?2",
                params![message_id, target, now],
            )?;
            Ok(changed > 0)
        })
    }

    /// Set-if-false side flag for the sender. Returns whether the flag flipped.
    pub fn mark_deleted_for_sender(&self, message_id: &str, now: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_deleted_for_sender = 1, updated_at = ?2
                 WHERE message_id = ?1 AND is_deleted_for_sender = 0",
                params![message_id, now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn mark_deleted_for_recipient(&self, message_id: &str, now: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_deleted_for_recipient = 1, updated_at = ?2
                 WHERE message_id = ?1 AND is_deleted_for_recipient = 0",
                params![message_id, now],
            )?;
            Ok(changed > 0)
        })
    }

    /// Logical purge: both side flags and the remote flag in one conditional
    /// update. Second and later applications are no-ops (returns false), so
    /// a user action racing the sweeper never double-fires.
    pub fn mark_deleted_remotely(&self, message_id: &str, now: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_deleted_for_sender = 1, is_deleted_for_recipient = 1,
                     is_deleted_remotely = 1, updated_at = ?2
                 WHERE message_id = ?1 AND is_deleted_remotely = 0",
                params![message_id, now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn set_message_ttl(
        &self,
        message_id: &str,
        ttl_seconds: Option<i64>,
        scheduled_deletion_at: Option<i64>,
        now: i64,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET ttl_seconds = ?2, scheduled_deletion_at = ?3, updated_at = ?4
                 WHERE message_id = ?1",
                params![message_id, ttl_seconds, scheduled_deletion_at, now],
            )?;
            Ok(changed > 0)
        })
    }

    /// Messages visible to `actor`: never purged, never deleted for the
    /// side the actor occupies in each message.
    pub fn list_chat_messages(
        &self,
        chat_id: &str,
        actor: &str,
        since: Option<i64>,
        limit: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE chat_id = ?1
                   AND is_deleted_remotely = 0
                   AND NOT (sender_id = ?2 AND is_deleted_for_sender = 1)
                   AND NOT (recipient_id = ?2 AND is_deleted_for_recipient = 1)
                   AND (?3 IS NULL OR created_at > ?3)
                 ORDER BY created_at ASC
                 LIMIT ?4",
                MESSAGE_COLS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![chat_id, actor, since, limit], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Chat-scope local delete: flags everything `sender_id` sent in the
    /// chat. Returns how many rows flipped.
    pub fn mark_chat_deleted_for_sender(&self, chat_id: &str, sender_id: &str, now: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_deleted_for_sender = 1, updated_at = ?3
                 WHERE chat_id = ?1 AND sender_id = ?2 AND is_deleted_for_sender = 0",
                params![chat_id, sender_id, now],
            )?;
            Ok(changed)
        })
    }

    /// Messages past their scheduled deletion and not yet purged.
    pub fn expired_messages(&self, now: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE scheduled_deletion_at IS NOT NULL
                   AND scheduled_deletion_at <= ?1
                   AND is_deleted_remotely = 0",
                MESSAGE_COLS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([now], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_chat_messages(&self, chat_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
                [chat_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([value], map_user).optional()
}

fn query_chat_by_key(conn: &Connection, participant_key: &str) -> Result<Option<ChatRow>> {
    let sql = format!("SELECT {} FROM chats WHERE participant_key = ?1", CHAT_COLS);
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([participant_key], map_chat).optional()
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_chat(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        participant_key: row.get(1)?,
        auto_delete_seconds: row.get(2)?,
        last_message_id: row.get(3)?,
        last_activity_at: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        message_id: row.get(1)?,
        chat_id: row.get(2)?,
        sender_id: row.get(3)?,
        recipient_id: row.get(4)?,
        ciphertext: row.get(5)?,
        iv: row.get(6)?,
        delivery_state: row.get(7)?,
        is_deleted_for_sender: row.get(8)?,
        is_deleted_for_recipient: row.get(9)?,
        is_deleted_remotely: row.get(10)?,
        ttl_seconds: row.get(11)?,
        scheduled_deletion_at: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn seed(db: &Database) -> (String, String, String) {
        db.create_user("u-a", "alice", "hash", 1000).unwrap();
        db.create_user("u-b", "bob", "hash", 1000).unwrap();
        let chat = db
            .find_or_create_chat("c-1", "u-a:u-b", &["u-a".into(), "u-b".into()], 1000)
            .unwrap();
        db.insert_message(
            "r-1", "m-1", &chat.id, "u-a", "u-b", b"ct", b"iv", None, None, 1000,
        )
        .unwrap();
        ("u-a".into(), "u-b".into(), chat.id)
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("u-a", "alice", "hash", 1000).unwrap();
        db.create_user("u-b", "bob", "hash", 1000).unwrap();

        let first = db
            .find_or_create_chat("c-1", "u-a:u-b", &["u-a".into(), "u-b".into()], 1000)
            .unwrap();
        let second = db
            .find_or_create_chat("c-2", "u-a:u-b", &["u-a".into(), "u-b".into()], 2000)
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.id, "c-1");
    }

    #[test]
    fn delivery_advance_is_monotonic() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);

        assert!(db.advance_delivery("m-1", 2, 2000).unwrap());
        // Re-applying the same advance changes nothing
        assert!(!db.advance_delivery("m-1", 2, 3000).unwrap());
        // A lower target never regresses the state
        assert!(!db.advance_delivery("m-1", 1, 4000).unwrap());

        let row = db.get_message("m-1").unwrap().unwrap();
        assert_eq!(row.delivery_state, 2);
        assert_eq!(row.updated_at, 2000);
    }

    #[test]
    fn remote_delete_flips_once() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);

        assert!(db.mark_deleted_remotely("m-1", 2000).unwrap());
        assert!(!db.mark_deleted_remotely("m-1", 3000).unwrap());

        let row = db.get_message("m-1").unwrap().unwrap();
        assert!(row.is_deleted_for_sender);
        assert!(row.is_deleted_for_recipient);
        assert!(row.is_deleted_remotely);
    }

    #[test]
    fn side_flags_commute_with_remote() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);

        assert!(db.mark_deleted_for_recipient("m-1", 2000).unwrap());
        assert!(db.mark_deleted_remotely("m-1", 3000).unwrap());
        // Side flag after the purge is a no-op, not an error
        assert!(!db.mark_deleted_for_sender("m-1", 4000).unwrap());
    }

    #[test]
    fn purged_messages_are_invisible() {
        let db = Database::open_in_memory().unwrap();
        let (_, _, chat_id) = seed(&db);

        assert_eq!(db.list_chat_messages(&chat_id, "u-b", None, 100).unwrap().len(), 1);
        db.mark_deleted_remotely("m-1", 2000).unwrap();
        assert!(db.list_chat_messages(&chat_id, "u-b", None, 100).unwrap().is_empty());
        assert!(db.list_chat_messages(&chat_id, "u-a", None, 100).unwrap().is_empty());
    }

    #[test]
    fn side_deletion_hides_only_that_side() {
        let db = Database::open_in_memory().unwrap();
        let (_, _, chat_id) = seed(&db);

        db.mark_deleted_for_recipient("m-1", 2000).unwrap();
        assert!(db.list_chat_messages(&chat_id, "u-b", None, 100).unwrap().is_empty());
        assert_eq!(db.list_chat_messages(&chat_id, "u-a", None, 100).unwrap().len(), 1);
    }

    #[test]
    fn expiry_scan_honors_threshold() {
        let db = Database::open_in_memory().unwrap();
        let (_, _, chat_id) = seed(&db);
        db.insert_message(
            "r-2", "m-2", &chat_id, "u-a", "u-b", b"ct", b"iv",
            Some(60), Some(61_000), 1000,
        )
        .unwrap();

        assert!(db.expired_messages(31_000).unwrap().is_empty());
        let due = db.expired_messages(61_000).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message_id, "m-2");
    }
}
