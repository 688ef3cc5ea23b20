use serde::{Deserialize, Serialize};

/// A chat message in its canonical, transport-independent shape.
///
/// Field names serialize in camelCase so existing callers keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    pub body: String,
    /// Transport-assigned send time, in the transport's own unit.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_from_me: bool,
    pub chat_id: String,
    pub chat_name: String,
    pub is_group: bool,
    pub has_media: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaPayload>,
}

impl Message {
    pub fn summary(&self) -> LastMessage {
        LastMessage {
            id: self.id.clone(),
            from: self.from.clone(),
            body: self.body.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Downloaded attachment. `data` is base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    pub mimetype: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
}

/// Cached summary of the most recently ingested message of a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: String,
    pub from: String,
    pub body: String,
    pub timestamp: i64,
}

/// A chat with its derived aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatGroup {
    pub chat_id: String,
    pub chat_name: String,
    pub is_group: bool,
    /// Ingestion order. Empty when the group was read from storage summaries.
    pub messages: Vec<Message>,
    pub last_message: Option<LastMessage>,
    pub unread_count: u32,
}

/// Connection lifecycle of the single chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Initializing,
    Authenticated,
    Ready,
    AuthFailed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Initializing => "initializing",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::AuthFailed => "auth_failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
