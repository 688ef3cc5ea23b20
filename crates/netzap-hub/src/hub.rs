use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use netzap_db::Database;
use netzap_types::api::{
    ChatDebug, ChatGroupsDebug, ClientDebug, DebugSnapshot, MessagePreview, MessagesDebug,
    SessionStatus,
};
use netzap_types::events::HubEvent;
use netzap_types::models::{ChatGroup, MediaPayload, Message};
use netzap_types::transport::{RawMessage, TransportEvent};

use crate::cache::AggregateCache;
use crate::config::{HubConfig, ReadSource};
use crate::dispatcher::Dispatcher;
use crate::error::{HubError, Result};
use crate::ingest::{self, Ingestor, run_blocking};
use crate::session::Session;
use crate::transport::Transport;

/// Messages shown in the debug snapshot.
const DEBUG_RECENT_MESSAGES: u32 = 5;

/// The single entry point for the API layer: session commands, reads,
/// sends and the transport event loop.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: HubConfig,
    db: Arc<Database>,
    cache: Arc<AggregateCache>,
    session: Session,
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    ingestor: Ingestor,
    /// The ready-time backfill, if one was started.
    backfill: Mutex<Option<JoinHandle<()>>>,
}

impl Hub {
    /// Build a hub over `db`, rebuilding the aggregate cache from storage.
    pub async fn new(db: Arc<Database>, transport: Arc<dyn Transport>, config: HubConfig) -> Result<Self> {
        let cache = Arc::new(AggregateCache::new());
        let rebuild_cache = cache.clone();
        let window = config.rebuild_window;
        let chats = run_blocking(&db, move |db| rebuild_cache.rebuild(db, window)).await?;
        info!(
            "Hub ready: {} chats restored from storage, reads served from {:?}",
            chats, config.read_source
        );

        let dispatcher = Dispatcher::new();
        let ingestor = Ingestor::new(db.clone(), cache.clone(), dispatcher.clone());

        Ok(Self {
            inner: Arc::new(HubInner {
                config,
                db,
                cache,
                session: Session::new(),
                transport,
                dispatcher,
                ingestor,
                backfill: Mutex::new(None),
            }),
        })
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn cache(&self) -> &AggregateCache {
        &self.inner.cache
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.inner.dispatcher.subscribe()
    }

    /// Consume transport events in delivery order until every sender is gone.
    pub fn spawn_event_loop(&self, mut events: mpsc::Receiver<TransportEvent>) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                hub.handle_event(event).await;
            }
            info!("Transport event stream closed");
        })
    }

    pub async fn handle_event(&self, event: TransportEvent) {
        debug!("Transport event: {}", event.name());
        let session = &self.inner.session;

        match event {
            TransportEvent::Qr { payload } => {
                if session.on_qr(payload.clone()) {
                    info!("QR challenge received");
                    self.broadcast(HubEvent::QrChallenge {
                        qr: payload,
                        qr_code: session.qr_code(),
                    });
                }
            }
            TransportEvent::Authenticated => {
                if session.on_authenticated() {
                    self.broadcast_state();
                }
            }
            TransportEvent::Ready => {
                if session.on_ready() {
                    self.broadcast_state();
                    self.spawn_backfill();
                }
            }
            TransportEvent::AuthFailure { reason } => {
                error!("Authentication failed: {}", reason);
                if session.on_auth_failure(&reason) {
                    self.broadcast_state();
                }
            }
            TransportEvent::Disconnected { reason } => {
                warn!("Transport disconnected: {}", reason);
                if session.on_disconnected(Some(&reason)) {
                    self.broadcast_state();
                }
            }
            TransportEvent::Message(raw) => self.ingest_live(raw).await,
            TransportEvent::MessageCreate(raw) => {
                // Inbound messages also arrive as `Message`; only our own are new here.
                if raw.from_me {
                    self.ingest_live(raw).await;
                }
            }
        }
    }

    async fn ingest_live(&self, raw: RawMessage) {
        if !self.inner.session.accepts_messages() {
            warn!(
                "Dropping message {} received while {}",
                raw.id,
                self.inner.session.state()
            );
            return;
        }
        self.inner.ingestor.ingest_logged(ingest::normalize(raw, None)).await;
    }

    /// Start the ready-time backfill unless one is already running.
    fn spawn_backfill(&self) {
        let mut backfill = self.inner.backfill.lock().unwrap_or_else(PoisonError::into_inner);
        if backfill.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Backfill already running, skipping");
            return;
        }

        let hub = self.clone();
        *backfill = Some(tokio::spawn(async move {
            let inner = &hub.inner;
            match inner
                .ingestor
                .backfill(inner.transport.as_ref(), &inner.session, inner.config.backfill_limit)
                .await
            {
                Ok(report) => hub.broadcast(HubEvent::BackfillComplete {
                    chats: report.chats,
                    ingested: report.ingested,
                }),
                Err(HubError::NotConnected) => info!("Backfill stopped, session ended"),
                Err(e) => error!("Backfill failed: {}", e),
            }
        }));
    }

    /// Wait for a running backfill to wind down. Callers move the session
    /// out of the accepting states first.
    async fn join_backfill(&self) {
        let task = self
            .inner
            .backfill
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Backfill task failed: {}", e);
            }
        }
    }

    // -- Session commands --

    /// Connect the transport. A no-op while a connect is underway or done.
    pub async fn initialize_session(&self) -> Result<()> {
        let inner = &self.inner;
        let _lifecycle = inner.session.lock_lifecycle().await;

        if !inner.session.begin_initialize() {
            debug!("Initialize requested while {}, nothing to do", inner.session.state());
            return Ok(());
        }
        self.broadcast_state();
        info!("Initializing chat session");

        if let Err(e) = inner.transport.connect().await {
            error!("Transport connect failed: {}", e);
            if inner.session.fail_initialize(&e.0) {
                self.broadcast_state();
            }
            return Err(HubError::Connection(e));
        }
        Ok(())
    }

    /// Tear the session down. Always ends `Disconnected`; teardown errors are
    /// only logged.
    pub async fn logout_session(&self) -> Result<()> {
        let inner = &self.inner;
        let _lifecycle = inner.session.lock_lifecycle().await;
        info!("Logging out chat session");

        if let Err(e) = inner.transport.destroy().await {
            error!("Transport teardown failed: {}", e);
        }

        if inner.session.on_disconnected(Some("logout")) {
            self.broadcast_state();
        }
        self.join_backfill().await;

        if inner.config.purge_on_logout {
            inner.cache.clear();
            run_blocking(&inner.db, |db| db.clear_all()).await?;
            inner.ingestor.prune_idle_locks();
            info!("Stored messages and chats cleared");
        }
        Ok(())
    }

    pub fn session_status(&self) -> SessionStatus {
        self.inner.session.snapshot().status()
    }

    // -- Reads --

    pub async fn list_chats(&self) -> Result<Vec<ChatGroup>> {
        match self.inner.config.read_source {
            ReadSource::Storage => run_blocking(&self.inner.db, |db| db.get_chats()).await,
            ReadSource::Cache => Ok(self.inner.cache.get_chat_groups()),
        }
    }

    /// Oldest first. Storage reads return the latest `history_limit` messages.
    pub async fn list_chat_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        match self.inner.config.read_source {
            ReadSource::Storage => {
                let chat_id = chat_id.to_string();
                let limit = self.inner.config.history_limit;
                let mut messages =
                    run_blocking(&self.inner.db, move |db| db.get_chat_messages(&chat_id, limit, 0))
                        .await?;
                messages.reverse();
                Ok(messages)
            }
            ReadSource::Cache => Ok(self.inner.cache.get_chat_messages(chat_id)),
        }
    }

    /// Newest first, across all chats. Always served from storage.
    pub async fn list_messages(&self, limit: u32, offset: u32) -> Result<Vec<Message>> {
        run_blocking(&self.inner.db, move |db| db.get_messages(limit, offset)).await
    }

    pub async fn get_last_message_id(&self) -> Result<Option<String>> {
        match self.inner.config.read_source {
            ReadSource::Storage => run_blocking(&self.inner.db, |db| db.get_last_message_id()).await,
            ReadSource::Cache => Ok(self.inner.cache.last_message_id()),
        }
    }

    // -- Commands --

    /// Send through the transport. The message is persisted when the
    /// transport echoes it back as `message_create`, not here.
    pub async fn send_message(&self, to: &str, body: &str) -> Result<Message> {
        if !self.inner.session.is_ready() {
            return Err(HubError::NotConnected);
        }

        let raw = self.inner.transport.send_message(to, body).await.map_err(|e| {
            error!("Send to {} failed: {}", to, e);
            HubError::Connection(e)
        })?;
        info!("Message {} sent to {}", raw.id, to);
        Ok(ingest::normalize(raw, None))
    }

    /// Write-through to cache and storage. Unknown chats are not an error.
    pub async fn mark_chat_read(&self, chat_id: &str) -> Result<()> {
        if self.inner.ingestor.mark_read(chat_id).await? {
            debug!("Chat {} marked as read", chat_id);
            self.broadcast(HubEvent::ChatRead {
                chat_id: chat_id.to_string(),
            });
        }
        Ok(())
    }

    /// Stored media first, then a live download which is kept for next time.
    pub async fn get_message_media(&self, message_id: &str) -> Result<MediaPayload> {
        let id = message_id.to_string();
        let stored = run_blocking(&self.inner.db, move |db| db.get_message_by_id(&id)).await?;

        if let Some(msg) = &stored {
            if let Some(media) = &msg.media {
                return Ok(media.clone());
            }
            if !msg.has_media {
                return Err(HubError::MediaUnavailable(format!(
                    "message {} carries no media",
                    message_id
                )));
            }
        }

        if !self.inner.session.is_ready() {
            return Err(HubError::NotConnected);
        }

        let media = match self.inner.transport.download_media(message_id).await? {
            Some(media) => media,
            None if stored.is_none() => {
                return Err(HubError::NotFound(format!("message {}", message_id)));
            }
            None => {
                return Err(HubError::MediaUnavailable(format!(
                    "no media found for message {}",
                    message_id
                )));
            }
        };

        if stored.is_some() {
            let id = message_id.to_string();
            let payload = media.clone();
            if let Err(e) = run_blocking(&self.inner.db, move |db| db.attach_media(&id, &payload)).await {
                warn!("Could not store media for {}: {}", message_id, e);
            }
        }
        Ok(media)
    }

    /// Counts, the latest messages and per-chat aggregates for diagnostics.
    /// Message totals always come from storage; the last message id and the
    /// chat groups both come from the configured read source.
    pub async fn debug_snapshot(&self) -> Result<DebugSnapshot> {
        let session = self.inner.session.snapshot();
        let (total, recent) = run_blocking(&self.inner.db, |db| {
            Ok((db.count_messages()?, db.get_messages(DEBUG_RECENT_MESSAGES, 0)?))
        })
        .await?;

        let (last_message_id, groups) = match self.inner.config.read_source {
            ReadSource::Storage => {
                run_blocking(&self.inner.db, |db| {
                    let counts = db.count_messages_by_chat()?;
                    let groups = db
                        .get_chats()?
                        .iter()
                        .map(|group| ChatDebug {
                            message_count: counts.get(&group.chat_id).copied().unwrap_or(0),
                            ..ChatDebug::from_group(group)
                        })
                        .collect::<Vec<_>>();
                    Ok((db.get_last_message_id()?, groups))
                })
                .await?
            }
            ReadSource::Cache => {
                let cache = &self.inner.cache;
                let groups: Vec<ChatDebug> = cache.get_chat_groups().iter().map(ChatDebug::from_group).collect();
                (cache.last_message_id(), groups)
            }
        };

        let snapshot = DebugSnapshot {
            client: ClientDebug {
                state: session.state,
                is_ready: session.is_ready(),
                is_initializing: session.is_initializing(),
            },
            messages: MessagesDebug {
                total,
                last_message_id,
                last_messages: recent.iter().map(MessagePreview::from_message).collect(),
            },
            chat_groups: ChatGroupsDebug {
                total: groups.len(),
                groups,
            },
        };

        debug!(
            "Debug snapshot: state={} messages={} chats={}",
            snapshot.client.state, snapshot.messages.total, snapshot.chat_groups.total
        );
        Ok(snapshot)
    }

    fn broadcast(&self, event: HubEvent) {
        self.inner.dispatcher.broadcast(event);
    }

    fn broadcast_state(&self) {
        self.broadcast(HubEvent::SessionChanged {
            state: self.inner.session.state(),
        });
    }
}
