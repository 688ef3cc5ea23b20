/// Database row types: these map directly to SQLite rows.
/// Distinct from netzap-types models to keep the DB layer independent.
use netzap_types::models::{ChatGroup, LastMessage, MediaPayload, Message};
use tracing::warn;

pub struct MessageRow {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub body: String,
    pub timestamp: i64,
    pub kind: String,
    pub is_from_me: bool,
    pub chat_id: String,
    pub chat_name: String,
    pub is_group: bool,
    pub has_media: bool,
    /// JSON-encoded `MediaPayload`
    pub media: Option<String>,
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        let media = self.media.as_deref().and_then(|json| {
            serde_json::from_str::<MediaPayload>(json)
                .map_err(|e| warn!("Corrupt media on message '{}': {}", self.id, e))
                .ok()
        });

        Message {
            id: self.id,
            from: self.sender,
            to: self.recipient,
            body: self.body,
            timestamp: self.timestamp,
            kind: self.kind,
            is_from_me: self.is_from_me,
            chat_id: self.chat_id,
            chat_name: self.chat_name,
            is_group: self.is_group,
            has_media: self.has_media,
            media,
        }
    }
}

pub struct ChatRow {
    pub chat_id: String,
    pub chat_name: String,
    pub is_group: bool,
    pub unread_count: u32,
    pub last_message_id: Option<String>,
    pub last_message_timestamp: Option<i64>,
    pub last_message_body: Option<String>,
    pub last_message_from: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ChatRow {
    /// Summary view: `messages` is left empty.
    pub fn into_group(self) -> ChatGroup {
        let last_message = match (self.last_message_id, self.last_message_timestamp) {
            (Some(id), Some(timestamp)) => Some(LastMessage {
                id,
                from: self.last_message_from.unwrap_or_default(),
                body: self.last_message_body.unwrap_or_default(),
                timestamp,
            }),
            _ => None,
        };

        ChatGroup {
            chat_id: self.chat_id,
            chat_name: self.chat_name,
            is_group: self.is_group,
            messages: Vec::new(),
            last_message,
            unread_count: self.unread_count,
        }
    }
}
