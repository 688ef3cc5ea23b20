use async_trait::async_trait;
use tokio::sync::mpsc;

use netzap_types::models::MediaPayload;
use netzap_types::transport::{RawChat, RawMessage, TransportEvent};

use crate::error::TransportError;

/// Sending half of the transport event queue. Transports push every event
/// they observe here; the hub's event loop owns the receiving half.
pub type EventSink = mpsc::Sender<TransportEvent>;

/// Calls the hub makes into the chat transport.
///
/// Events flow the other way, through an [`EventSink`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn destroy(&self) -> Result<(), TransportError>;

    async fn send_message(&self, to: &str, body: &str) -> Result<RawMessage, TransportError>;

    async fn get_chats(&self) -> Result<Vec<RawChat>, TransportError>;

    /// Most recent `limit` messages of a chat.
    async fn fetch_messages(&self, chat_id: &str, limit: u32) -> Result<Vec<RawMessage>, TransportError>;

    /// `Ok(None)` when the transport no longer has the message or it carries
    /// no media.
    async fn download_media(&self, message_id: &str) -> Result<Option<MediaPayload>, TransportError>;
}
