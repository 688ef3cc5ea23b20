use serde::{Deserialize, Serialize};

use crate::models::SessionState;

/// Notifications published by the hub to polling and streaming callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum HubEvent {
    /// The session moved to a new lifecycle state
    SessionChanged { state: SessionState },

    /// A fresh login challenge is available. `qr_code` is the PNG data URL
    /// of `qr`, absent if rendering failed.
    QrChallenge { qr: String, qr_code: Option<String> },

    /// A message was ingested and persisted for the first time
    NewMessage {
        message_id: String,
        chat_id: String,
        last_message_id: String,
        is_from_me: bool,
    },

    /// A chat's unread counter was reset
    ChatRead { chat_id: String },

    /// The ready-time backfill finished
    BackfillComplete { chats: usize, ingested: usize },
}

impl HubEvent {
    /// Returns the chat_id if this event is scoped to a specific chat.
    /// Events that return `None` are global and go to every subscriber.
    pub fn chat_id(&self) -> Option<&str> {
        match self {
            Self::NewMessage { chat_id, .. } => Some(chat_id),
            Self::ChatRead { chat_id } => Some(chat_id),
            _ => None,
        }
    }
}

/// Commands sent FROM a feed client TO the server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedCommand {
    /// Restrict chat-scoped events to these chats. An empty list
    /// restores the default of receiving everything.
    Subscribe { chat_ids: Vec<String> },
}
