//! `/events`: hub notifications pushed over a WebSocket.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use netzap_hub::Hub;
use netzap_types::events::{FeedCommand, HubEvent};

use crate::AppState;

/// Server pings every 15 seconds; two missed pongs drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_connection(socket, hub))
}

/// Chat filter of one feed connection. Empty means every chat.
#[derive(Default)]
struct ChatFilter {
    chats: RwLock<HashSet<String>>,
}

impl ChatFilter {
    fn set(&self, chat_ids: Vec<String>) {
        *self.chats.write().unwrap_or_else(PoisonError::into_inner) = chat_ids.into_iter().collect();
    }

    fn allows(&self, event: &HubEvent) -> bool {
        let Some(chat_id) = event.chat_id() else {
            return true;
        };
        let chats = self.chats.read().unwrap_or_else(PoisonError::into_inner);
        chats.is_empty() || chats.contains(chat_id)
    }
}

async fn handle_connection(socket: WebSocket, hub: Hub) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = hub.subscribe();
    info!("Feed client connected");

    // Current state first, so clients never wait for the next transition.
    let hello = HubEvent::SessionChanged {
        state: hub.session().state(),
    };
    if send_event(&mut sender, &hello).await.is_err() {
        return;
    }

    let filter = Arc::new(ChatFilter::default());
    let send_filter = filter.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = events.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Feed client lagged by {} events", n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };
                    if !send_filter.allows(&event) {
                        continue;
                    }
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Feed heartbeat timeout, dropping connection");
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<FeedCommand>(&text) {
                    Ok(FeedCommand::Subscribe { chat_ids }) => {
                        debug!("Feed client subscribed to {} chats", chat_ids.len());
                        filter.set(chat_ids);
                    }
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("Bad feed command: {} -- raw: {}", e, raw);
                    }
                },
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    info!("Feed client disconnected");
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &HubEvent) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Could not encode feed event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}
