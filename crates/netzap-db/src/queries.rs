use std::collections::HashMap;

use crate::models::{ChatRow, MessageRow};
use crate::Database;
use anyhow::Result;
use netzap_types::models::{ChatGroup, MediaPayload, Message};
use rusqlite::Connection;
use tracing::debug;

const MESSAGE_COLUMNS: &str = "id, sender, recipient, body, timestamp, kind, is_from_me, chat_id, chat_name, is_group, has_media, media";

const CHAT_COLUMNS: &str = "chat_id, chat_name, is_group, unread_count, last_message_id, last_message_timestamp, last_message_body, last_message_from, created_at, updated_at";

impl Database {
    // -- Messages --

    /// Insert a message and fold it into its chat summary in one transaction.
    ///
    /// Returns `false` without touching the chat row when a message with the
    /// same id is already stored, so redelivery never double-counts.
    pub fn save_message(&self, msg: &Message) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let media = msg.media.as_ref().map(serde_json::to_string).transpose()?;
            let inserted = tx.execute(
                "INSERT INTO messages (id, sender, recipient, body, timestamp, kind, is_from_me, chat_id, chat_name, is_group, has_media, media)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO NOTHING",
                rusqlite::params![
                    msg.id,
                    msg.from,
                    msg.to,
                    msg.body,
                    msg.timestamp,
                    msg.kind,
                    msg.is_from_me,
                    msg.chat_id,
                    msg.chat_name,
                    msg.is_group,
                    msg.has_media,
                    media,
                ],
            )?;

            if inserted == 0 {
                debug!("Message {} already stored, skipping", msg.id);
                return Ok(false);
            }

            upsert_chat(&tx, msg)?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// Create or advance the chat row for `msg`. A single statement, so the
    /// unread increment cannot race another writer.
    pub fn upsert_chat_summary(&self, msg: &Message) -> Result<()> {
        self.with_conn_mut(|conn| upsert_chat(conn, msg))
    }

    /// Newest first.
    pub fn get_messages(&self, limit: u32, offset: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages ORDER BY timestamp DESC, rowid DESC LIMIT ?1 OFFSET ?2",
                MESSAGE_COLUMNS
            );
            query_messages(conn, &sql, rusqlite::params![limit, offset])
        })
    }

    /// Newest first, filtered by chat.
    pub fn get_chat_messages(&self, chat_id: &str, limit: u32, offset: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE chat_id = ?1 ORDER BY timestamp DESC, rowid DESC LIMIT ?2 OFFSET ?3",
                MESSAGE_COLUMNS
            );
            query_messages(conn, &sql, rusqlite::params![chat_id, limit, offset])
        })
    }

    pub fn get_message_by_id(&self, id: &str) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            let row = conn
                .query_row(&sql, [id], row_to_message)
                .optional()?;
            Ok(row.map(MessageRow::into_message))
        })
    }

    /// Id of the message with the highest timestamp.
    pub fn get_last_message_id(&self) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM messages ORDER BY timestamp DESC, rowid DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn count_messages(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Stored message count of every chat that has messages.
    pub fn count_messages_by_chat(&self) -> Result<HashMap<String, usize>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT chat_id, COUNT(*) FROM messages GROUP BY chat_id")?;
            let counts = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize)))?
                .collect::<std::result::Result<HashMap<_, _>, _>>()?;
            Ok(counts)
        })
    }

    /// Store downloaded media on an existing message. Media already present is
    /// kept as is. Returns `false` when the message is unknown.
    pub fn attach_media(&self, id: &str, media: &MediaPayload) -> Result<bool> {
        let json = serde_json::to_string(media)?;
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE messages
                 SET media = COALESCE(media, ?2), has_media = 1, updated_at = datetime('now')
                 WHERE id = ?1",
                rusqlite::params![id, json],
            )?;
            Ok(updated > 0)
        })
    }

    // -- Chats --

    /// Chat summaries, most recent activity first; chats without messages last.
    pub fn get_chats(&self) -> Result<Vec<ChatGroup>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chats
                 ORDER BY last_message_timestamp IS NULL, last_message_timestamp DESC, rowid ASC",
                CHAT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], row_to_chat)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows.into_iter().map(ChatRow::into_group).collect())
        })
    }

    pub fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM chats WHERE chat_id = ?1", CHAT_COLUMNS);
            conn.query_row(&sql, [chat_id], row_to_chat).optional()
        })
    }

    /// Reset the unread counter. Returns `false` if the chat does not exist.
    pub fn mark_chat_as_read(&self, chat_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE chats SET unread_count = 0, updated_at = datetime('now') WHERE chat_id = ?1",
                [chat_id],
            )?;
            Ok(updated > 0)
        })
    }

    /// Drop every message and chat.
    pub fn clear_all(&self) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM messages", [])?;
            tx.execute("DELETE FROM chats", [])?;
            tx.commit()?;
            Ok(())
        })
    }
}

fn upsert_chat(conn: &Connection, msg: &Message) -> Result<()> {
    let unread: u32 = if msg.is_from_me { 0 } else { 1 };
    conn.execute(
        "INSERT INTO chats (chat_id, chat_name, is_group, unread_count, last_message_id, last_message_timestamp, last_message_body, last_message_from)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(chat_id) DO UPDATE SET
            unread_count = chats.unread_count + excluded.unread_count,
            last_message_id = excluded.last_message_id,
            last_message_timestamp = excluded.last_message_timestamp,
            last_message_body = excluded.last_message_body,
            last_message_from = excluded.last_message_from,
            updated_at = datetime('now')",
        rusqlite::params![
            msg.chat_id,
            msg.chat_name,
            msg.is_group,
            unread,
            msg.id,
            msg.timestamp,
            msg.body,
            msg.from,
        ],
    )?;
    Ok(())
}

fn query_messages(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, row_to_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows.into_iter().map(MessageRow::into_message).collect())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender: row.get(1)?,
        recipient: row.get(2)?,
        body: row.get(3)?,
        timestamp: row.get(4)?,
        kind: row.get(5)?,
        is_from_me: row.get(6)?,
        chat_id: row.get(7)?,
        chat_name: row.get(8)?,
        is_group: row.get(9)?,
        has_media: row.get(10)?,
        media: row.get(11)?,
    })
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        chat_id: row.get(0)?,
        chat_name: row.get(1)?,
        is_group: row.get(2)?,
        unread_count: row.get(3)?,
        last_message_id: row.get(4)?,
        last_message_timestamp: row.get(5)?,
        last_message_body: row.get(6)?,
        last_message_from: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
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
