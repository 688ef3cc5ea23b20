use serde::{Deserialize, Serialize};

use crate::models::{ChatGroup, LastMessage, MediaPayload, Message, SessionState};

// -- Session --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionAction {
    Initialize,
    Logout,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionActionRequest {
    pub action: SessionAction,
}

/// Point-in-time view of the session, as reported by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: SessionState,
    pub is_ready: bool,
    pub is_initializing: bool,
    pub qr_challenge: Option<String>,
    pub qr_code: Option<String>,
    pub since: chrono::DateTime<chrono::Utc>,
}

impl SessionStatus {
    pub fn message(&self) -> &'static str {
        match self.state {
            SessionState::Ready => "connected",
            SessionState::Initializing | SessionState::Authenticated => "initializing",
            SessionState::AuthFailed => "authentication failed",
            SessionState::Disconnected => "waiting for initialization",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub success: bool,
    pub state: SessionState,
    pub is_ready: bool,
    pub is_initializing: bool,
    /// Login challenge as a displayable PNG data URL.
    pub qr_code: Option<String>,
    /// The raw challenge payload behind `qr_code`.
    pub qr_challenge: Option<String>,
    pub message: String,
    pub since: chrono::DateTime<chrono::Utc>,
}

impl From<SessionStatus> for SessionStatusResponse {
    fn from(status: SessionStatus) -> Self {
        Self {
            success: true,
            message: status.message().to_string(),
            state: status.state,
            is_ready: status.is_ready,
            is_initializing: status.is_initializing,
            qr_code: status.qr_code,
            qr_challenge: status.qr_challenge,
            since: status.since,
        }
    }
}

// -- Messages --

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendMessageRequest {
    pub to: String,
    pub message: String,
    #[serde(default)]
    pub mark_as_read: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MarkAsReadRequest {
    pub chat_id: String,
}

/// `{success, data, count}` envelope used by list endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub success: bool,
    pub data: Vec<T>,
    pub count: usize,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            success: true,
            count: data.len(),
            data,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

impl AckResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Body of every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MediaResponse {
    pub success: bool,
    pub data: MediaPayload,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageIdResponse {
    pub success: bool,
    pub last_message_id: Option<String>,
}

// -- Debug --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSnapshot {
    pub client: ClientDebug,
    pub messages: MessagesDebug,
    pub chat_groups: ChatGroupsDebug,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDebug {
    pub state: SessionState,
    pub is_ready: bool,
    pub is_initializing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesDebug {
    pub total: u64,
    pub last_message_id: Option<String>,
    pub last_messages: Vec<MessagePreview>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    pub id: String,
    pub from: String,
    pub body: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl MessagePreview {
    /// Previews carry at most this many characters of the body.
    pub const BODY_CHARS: usize = 50;

    pub fn from_message(msg: &Message) -> Self {
        Self {
            id: msg.id.clone(),
            from: msg.from.clone(),
            body: msg.body.chars().take(Self::BODY_CHARS).collect(),
            timestamp: msg.timestamp,
            kind: msg.kind.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatGroupsDebug {
    pub total: usize,
    pub groups: Vec<ChatDebug>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDebug {
    pub chat_id: String,
    pub chat_name: String,
    pub message_count: usize,
    pub unread_count: u32,
    pub last_message: Option<LastMessage>,
}

impl ChatDebug {
    pub fn from_group(group: &ChatGroup) -> Self {
        Self {
            chat_id: group.chat_id.clone(),
            chat_name: group.chat_name.clone(),
            message_count: group.messages.len(),
            unread_count: group.unread_count,
            last_message: group.last_message.clone(),
        }
    }
}
