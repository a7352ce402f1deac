use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chats (
            id                   TEXT PRIMARY KEY,
            -- Sorted participant ids joined with ':'. The UNIQUE constraint
            -- arbitrates concurrent find-or-create for the same set.
            participant_key      TEXT NOT NULL UNIQUE,
            auto_delete_seconds  INTEGER,
            last_message_id      TEXT,
            last_activity_at     INTEGER NOT NULL,
            created_at           INTEGER NOT NULL,
            updated_at           INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_participants (
            chat_id     TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            UNIQUE(chat_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chat_participants_user
            ON chat_participants(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id                        TEXT PRIMARY KEY,
            message_id                TEXT NOT NULL UNIQUE,
            chat_id                   TEXT NOT NULL REFERENCES chats(id),
            sender_id                 TEXT NOT NULL REFERENCES users(id),
            recipient_id              TEXT NOT NULL REFERENCES users(id),
            ciphertext                BLOB NOT NULL,
            iv                        BLOB NOT NULL,
            -- 0 = sent, 1 = delivered, 2 = read
            delivery_state            INTEGER NOT NULL DEFAULT 0,
            is_deleted_for_sender     INTEGER NOT NULL DEFAULT 0,
            is_deleted_for_recipient  INTEGER NOT NULL DEFAULT 0,
            is_deleted_remotely       INTEGER NOT NULL DEFAULT 0,
            ttl_seconds               INTEGER,
            scheduled_deletion_at     INTEGER,
            created_at                INTEGER NOT NULL,
            updated_at                INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_scheduled
            ON messages(scheduled_deletion_at)
            WHERE scheduled_deletion_at IS NOT NULL;
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
