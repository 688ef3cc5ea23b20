use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (messages + chats)");
        conn.execute_batch(
            "
            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                sender          TEXT NOT NULL,
                recipient       TEXT NOT NULL,
                body            TEXT NOT NULL DEFAULT '',
                timestamp       INTEGER NOT NULL,
                kind            TEXT NOT NULL,
                is_from_me      INTEGER NOT NULL,
                chat_id         TEXT NOT NULL,
                chat_name       TEXT NOT NULL,
                is_group        INTEGER NOT NULL DEFAULT 0,
                has_media       INTEGER NOT NULL DEFAULT 0,
                media           TEXT,
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_messages_chat ON messages(chat_id, timestamp);
            CREATE INDEX idx_messages_sender ON messages(sender, timestamp);
            CREATE INDEX idx_messages_recipient ON messages(recipient, timestamp);

            CREATE TABLE chats (
                chat_id                 TEXT PRIMARY KEY,
                chat_name               TEXT NOT NULL,
                is_group                INTEGER NOT NULL DEFAULT 0,
                unread_count            INTEGER NOT NULL DEFAULT 0 CHECK (unread_count >= 0),
                last_message_id         TEXT,
                last_message_timestamp  INTEGER,
                last_message_body       TEXT,
                last_message_from       TEXT,
                created_at              TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at              TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_chats_last_message ON chats(last_message_timestamp);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
