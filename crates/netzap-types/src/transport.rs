use serde::{Deserialize, Serialize};

/// A message as the chat transport reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub body: String,
    pub timestamp: i64,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    pub from_me: bool,
    #[serde(default)]
    pub has_media: bool,
    /// Display name, when the transport resolved one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
}

fn default_kind() -> String {
    "chat".to_string()
}

/// One entry of the transport's chat list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChat {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub unread_count: u32,
}

/// Events emitted by the chat transport, in delivery order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TransportEvent {
    /// Login challenge to be rendered as a QR code
    Qr { payload: String },

    Authenticated,

    Ready,

    AuthFailure { reason: String },

    Disconnected { reason: String },

    /// Inbound message
    Message(RawMessage),

    /// Any message created on this account, including our own sends
    MessageCreate(RawMessage),
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Qr { .. } => "qr",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::AuthFailure { .. } => "auth_failure",
            Self::Disconnected { .. } => "disconnected",
            Self::Message(_) => "message",
            Self::MessageCreate(_) => "message_create",
        }
    }
}
