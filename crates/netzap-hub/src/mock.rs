//! In-process transport double for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use netzap_types::models::MediaPayload;
use netzap_types::transport::{RawChat, RawMessage};

use crate::error::TransportError;
use crate::transport::Transport;

/// Build a raw transport message with an empty body.
pub fn raw(id: &str, from: &str, to: &str, from_me: bool, timestamp: i64) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        body: String::new(),
        timestamp,
        kind: "chat".to_string(),
        from_me,
        has_media: false,
        chat_name: None,
        is_group: false,
    }
}

#[derive(Default)]
pub struct MockTransport {
    connects: AtomicUsize,
    destroys: AtomicUsize,
    fail_connect: AtomicBool,
    fail_destroy: AtomicBool,
    fail_send: AtomicBool,
    next_timestamp: AtomicI64,
    chats: Mutex<Vec<(RawChat, Vec<RawMessage>)>>,
    failing_chats: Mutex<HashSet<String>>,
    media: Mutex<HashMap<String, MediaPayload>>,
    sent: Mutex<Vec<(String, String)>>,
    fetch_limits: Mutex<Vec<u32>>,
    fetch_gate: Mutex<Option<Arc<Notify>>>,
    downloads: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            next_timestamp: AtomicI64::new(1_000),
            ..Default::default()
        }
    }

    pub fn add_chat(&self, id: &str, name: Option<&str>, history: Vec<RawMessage>) {
        let chat = RawChat {
            id: id.to_string(),
            name: name.map(str::to_string),
            is_group: false,
            unread_count: 0,
        };
        lock(&self.chats).push((chat, history));
    }

    pub fn add_media(&self, message_id: &str, media: MediaPayload) {
        lock(&self.media).insert(message_id.to_string(), media);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_destroy(&self, fail: bool) {
        self.fail_destroy.store(fail, Ordering::SeqCst);
    }

    pub fn fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn fail_fetch_for(&self, chat_id: &str) {
        lock(&self.failing_chats).insert(chat_id.to_string());
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.sent).clone()
    }

    pub fn fetch_limits(&self) -> Vec<u32> {
        lock(&self.fetch_limits).clone()
    }

    /// Park every later `fetch_messages` until the returned gate is notified.
    pub fn hold_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.fetch_gate) = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::new("browser failed to launch"));
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err(TransportError::new("browser already gone"));
        }
        Ok(())
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<RawMessage, TransportError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::new("send timed out"));
        }
        let mut sent = lock(&self.sent);
        sent.push((to.to_string(), body.to_string()));

        let mut msg = raw(
            &format!("sent-{}", sent.len()),
            "me",
            to,
            true,
            self.next_timestamp.fetch_add(1, Ordering::SeqCst),
        );
        msg.body = body.to_string();
        Ok(msg)
    }

    async fn get_chats(&self) -> Result<Vec<RawChat>, TransportError> {
        Ok(lock(&self.chats).iter().map(|(chat, _)| chat.clone()).collect())
    }

    async fn fetch_messages(&self, chat_id: &str, limit: u32) -> Result<Vec<RawMessage>, TransportError> {
        lock(&self.fetch_limits).push(limit);
        let gate = lock(&self.fetch_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if lock(&self.failing_chats).contains(chat_id) {
            return Err(TransportError::new(format!("chat {} unavailable", chat_id)));
        }

        let chats = lock(&self.chats);
        let history = chats
            .iter()
            .find(|(chat, _)| chat.id == chat_id)
            .map(|(_, history)| history.clone())
            .unwrap_or_default();
        let skip = history.len().saturating_sub(limit as usize);
        Ok(history.into_iter().skip(skip).collect())
    }

    async fn download_media(&self, message_id: &str) -> Result<Option<MediaPayload>, TransportError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.media).get(message_id).cloned())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
