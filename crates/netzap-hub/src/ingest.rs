//! Turns transport messages into exactly one durable write plus one cache
//! update, however many times the transport delivers them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use netzap_db::Database;
use netzap_types::events::HubEvent;
use netzap_types::models::Message;
use netzap_types::transport::{RawChat, RawMessage};

use crate::cache::AggregateCache;
use crate::dispatcher::Dispatcher;
use crate::error::{HubError, Result};
use crate::session::{Session, SessionSnapshot};
use crate::transport::Transport;

/// Idle chat locks are pruned once the map grows past this many entries.
const CHAT_LOCK_PRUNE_THRESHOLD: usize = 1024;

/// The counterpart of a message: the recipient of our own messages, the
/// sender of everyone else's.
pub fn chat_id_for(raw: &RawMessage) -> &str {
    if raw.from_me { &raw.to } else { &raw.from }
}

/// Canonical form of a transport message. `chat` supplies the display name
/// and group flag when the message came from a known chat listing.
pub fn normalize(raw: RawMessage, chat: Option<&RawChat>) -> Message {
    let chat_id = chat_id_for(&raw).to_string();
    let listed = chat.filter(|c| c.id == chat_id);

    let chat_name = raw
        .chat_name
        .clone()
        .or_else(|| listed.and_then(|c| c.name.clone()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| chat_id.clone());
    let is_group = raw.is_group || listed.is_some_and(|c| c.is_group);

    Message {
        id: raw.id,
        from: raw.from,
        to: raw.to,
        body: raw.body,
        timestamp: raw.timestamp,
        kind: raw.kind,
        is_from_me: raw.from_me,
        chat_id,
        chat_name,
        is_group,
        has_media: raw.has_media,
        media: None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored,
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub chats: usize,
    pub fetched: usize,
    pub ingested: usize,
    pub failed: usize,
}

/// Dedup, write-through and notify, serialized per chat.
pub struct Ingestor {
    db: Arc<Database>,
    cache: Arc<AggregateCache>,
    dispatcher: Dispatcher,
    chat_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Ingestor {
    pub fn new(db: Arc<Database>, cache: Arc<AggregateCache>, dispatcher: Dispatcher) -> Self {
        Self {
            db,
            cache,
            dispatcher,
            chat_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn ingest(&self, msg: Message) -> Result<IngestOutcome> {
        let lock = self.chat_lock(&msg.chat_id);
        let _guard = lock.lock().await;

        let id = msg.id.clone();
        if run_blocking(&self.db, move |db| db.get_message_by_id(&id))
            .await?
            .is_some()
        {
            debug!("Message {} already ingested", msg.id);
            return Ok(IngestOutcome::Duplicate);
        }

        let (stored, inserted) = run_blocking(&self.db, move |db| {
            let inserted = db.save_message(&msg)?;
            Ok((msg, inserted))
        })
        .await?;

        // Lost a race with another path delivering the same id.
        if !inserted {
            return Ok(IngestOutcome::Duplicate);
        }

        self.cache.apply(&stored);
        self.dispatcher.broadcast(HubEvent::NewMessage {
            message_id: stored.id.clone(),
            chat_id: stored.chat_id.clone(),
            last_message_id: stored.id,
            is_from_me: stored.is_from_me,
        });

        Ok(IngestOutcome::Stored)
    }

    /// Reset a chat's unread counter in storage and cache. Holds the chat
    /// lock, so no ingest of the same chat lands between the two resets.
    /// Returns `false` when neither knows the chat.
    pub async fn mark_read(&self, chat_id: &str) -> Result<bool> {
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;

        let id = chat_id.to_string();
        let stored = run_blocking(&self.db, move |db| db.mark_chat_as_read(&id)).await?;
        let cached = self.cache.mark_chat_as_read(chat_id);
        Ok(stored || cached)
    }

    /// Ingest failures are logged and dropped; a redelivery can still store
    /// the message later.
    pub async fn ingest_logged(&self, msg: Message) -> Option<IngestOutcome> {
        let id = msg.id.clone();
        match self.ingest(msg).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Dropping message {}: {}", id, e);
                None
            }
        }
    }

    /// Pull the transport's chat list and a recent window of each chat
    /// through the same dedup path as live messages.
    ///
    /// Stops with [`HubError::NotConnected`] as soon as `session` no longer
    /// accepts messages. Pending transport calls are dropped; an ingest
    /// already underway finishes first.
    pub async fn backfill(
        &self,
        transport: &dyn Transport,
        session: &Session,
        limit: u32,
    ) -> Result<BackfillReport> {
        let mut state = session.subscribe();

        let chats = tokio::select! {
            chats = transport.get_chats() => chats?,
            _ = session_ended(&mut state) => return Err(HubError::NotConnected),
        };
        let mut report = BackfillReport {
            chats: chats.len(),
            ..Default::default()
        };

        for chat in &chats {
            let fetched = tokio::select! {
                fetched = transport.fetch_messages(&chat.id, limit) => fetched,
                _ = session_ended(&mut state) => return Err(HubError::NotConnected),
            };
            let messages = match fetched {
                Ok(messages) => messages,
                Err(e) => {
                    warn!("Backfill: could not fetch messages for {}: {}", chat.id, e);
                    continue;
                }
            };
            report.fetched += messages.len();

            for raw in messages {
                if !session.accepts_messages() {
                    return Err(HubError::NotConnected);
                }
                match self.ingest_logged(normalize(raw, Some(chat))).await {
                    Some(IngestOutcome::Stored) => report.ingested += 1,
                    Some(IngestOutcome::Duplicate) => {}
                    None => report.failed += 1,
                }
            }
        }

        info!(
            "Backfill complete: {} chats, {} fetched, {} new, {} failed",
            report.chats, report.fetched, report.ingested, report.failed
        );
        Ok(report)
    }

    fn chat_lock(&self, chat_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.chat_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.len() >= CHAT_LOCK_PRUNE_THRESHOLD {
            retain_held(&mut locks);
        }
        locks.entry(chat_id.to_string()).or_default().clone()
    }

    /// Drop the locks of chats nobody is working on.
    pub fn prune_idle_locks(&self) {
        let mut locks = self.chat_locks.lock().unwrap_or_else(PoisonError::into_inner);
        retain_held(&mut locks);
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.chat_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Keep only locks with a holder outside the map. New holders clone under
/// the map mutex, so a count of one cannot rise while it is held.
fn retain_held(locks: &mut HashMap<String, Arc<AsyncMutex<()>>>) {
    let before = locks.len();
    locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    debug!("Pruned {} idle chat locks", before - locks.len());
}

/// Resolves once the session stops accepting messages.
async fn session_ended(state: &mut watch::Receiver<SessionSnapshot>) {
    // A closed channel means the session is gone, which ends the wait too.
    let _ = state.wait_for(|s| !s.accepts_messages()).await;
}

/// Run a database call off the async runtime.
pub(crate) async fn run_blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            HubError::Storage(anyhow::anyhow!("storage task failed: {}", e))
        })?
        .map_err(HubError::Storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTransport, raw};

    fn ingestor() -> (Ingestor, Arc<Database>, Arc<AggregateCache>, Dispatcher) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cache = Arc::new(AggregateCache::new());
        let dispatcher = Dispatcher::new();
        let ingestor = Ingestor::new(db.clone(), cache.clone(), dispatcher.clone());
        (ingestor, db, cache, dispatcher)
    }

    fn ready_session() -> Session {
        let session = Session::new();
        session.begin_initialize();
        session.on_ready();
        session
    }

    #[test]
    fn chat_id_is_the_counterpart() {
        let outbound = raw("m1", "me", "B", true, 1);
        let inbound = raw("m2", "A", "me", false, 2);
        assert_eq!(chat_id_for(&outbound), "B");
        assert_eq!(chat_id_for(&inbound), "A");
    }

    #[test]
    fn normalize_prefers_listed_chat_name() {
        let chat = RawChat {
            id: "A".into(),
            name: Some("Alice".into()),
            is_group: true,
            unread_count: 3,
        };
        let msg = normalize(raw("m1", "A", "me", false, 1), Some(&chat));
        assert_eq!(msg.chat_name, "Alice");
        assert!(msg.is_group);

        let other = normalize(raw("m2", "B", "me", false, 1), Some(&chat));
        assert_eq!(other.chat_name, "B");
        assert!(!other.is_group);
    }

    #[tokio::test]
    async fn duplicate_ingest_stores_once() {
        let (ingestor, db, cache, dispatcher) = ingestor();
        let mut events = dispatcher.subscribe();

        let msg = normalize(raw("m1", "A", "me", false, 100), None);
        assert_eq!(ingestor.ingest(msg.clone()).await.unwrap(), IngestOutcome::Stored);
        assert_eq!(ingestor.ingest(msg).await.unwrap(), IngestOutcome::Duplicate);

        assert_eq!(db.count_messages().unwrap(), 1);
        assert_eq!(cache.get_chat_group("A").unwrap().unread_count, 1);
        assert_eq!(db.get_chat("A").unwrap().unwrap().unread_count, 1);

        match events.recv().await.unwrap() {
            HubEvent::NewMessage { message_id, last_message_id, .. } => {
                assert_eq!(message_id, "m1");
                assert_eq!(last_message_id, "m1");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_same_chat_ingest_keeps_every_increment() {
        let (ingestor, db, cache, _) = ingestor();
        let ingestor = Arc::new(ingestor);

        let mut handles = Vec::new();
        for i in 0..20 {
            let ingestor = ingestor.clone();
            handles.push(tokio::spawn(async move {
                let msg = normalize(raw(&format!("m{}", i), "A", "me", false, i), None);
                ingestor.ingest(msg).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(db.get_chat("A").unwrap().unwrap().unread_count, 20);
        assert_eq!(cache.get_chat_group("A").unwrap().unread_count, 20);
        let last = db.get_chat("A").unwrap().unwrap().last_message_id;
        assert_eq!(
            last,
            cache.get_chat_group("A").unwrap().last_message.map(|m| m.id)
        );
    }

    #[tokio::test]
    async fn backfill_overlapping_live_messages_is_safe() {
        let (ingestor, db, cache, _) = ingestor();
        let transport = MockTransport::new();
        transport.add_chat("A", Some("Alice"), vec![
            raw("a1", "A", "me", false, 10),
            raw("a2", "me", "A", true, 11),
        ]);
        transport.add_chat("B", None, vec![raw("b1", "B", "me", false, 20)]);

        // a1 already arrived live
        ingestor
            .ingest(normalize(raw("a1", "A", "me", false, 10), None))
            .await
            .unwrap();

        let report = ingestor.backfill(&transport, &ready_session(), 5).await.unwrap();
        assert_eq!(report.chats, 2);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.ingested, 2);
        assert_eq!(report.failed, 0);

        assert_eq!(db.count_messages().unwrap(), 3);
        assert_eq!(cache.get_chat_group("A").unwrap().unread_count, 1);
        assert_eq!(transport.fetch_limits(), vec![5, 5]);
    }

    #[tokio::test]
    async fn backfill_skips_chats_that_fail_to_fetch() {
        let (ingestor, db, _, _) = ingestor();
        let transport = MockTransport::new();
        transport.add_chat("A", None, vec![raw("a1", "A", "me", false, 10)]);
        transport.add_chat("broken", None, vec![]);
        transport.fail_fetch_for("broken");

        let report = ingestor.backfill(&transport, &ready_session(), 5).await.unwrap();
        assert_eq!(report.ingested, 1);
        assert_eq!(db.count_messages().unwrap(), 1);
    }

    #[tokio::test]
    async fn backfill_needs_an_accepting_session() {
        let (ingestor, db, _, _) = ingestor();
        let transport = MockTransport::new();
        transport.add_chat("A", None, vec![raw("a1", "A", "me", false, 10)]);

        let err = ingestor.backfill(&transport, &Session::new(), 5).await.unwrap_err();
        assert!(matches!(err, HubError::NotConnected));
        assert_eq!(db.count_messages().unwrap(), 0);
    }

    #[tokio::test]
    async fn backfill_stops_when_session_drops_mid_fetch() {
        let (ingestor, db, _, _) = ingestor();
        let ingestor = Arc::new(ingestor);
        let transport = Arc::new(MockTransport::new());
        transport.add_chat("A", None, vec![raw("a1", "A", "me", false, 10)]);
        let gate = transport.hold_fetches();
        let session = Arc::new(ready_session());

        let task = {
            let (ingestor, transport, session) = (ingestor.clone(), transport.clone(), session.clone());
            tokio::spawn(async move { ingestor.backfill(transport.as_ref(), &session, 5).await })
        };
        while transport.fetch_limits().is_empty() {
            tokio::task::yield_now().await;
        }

        session.on_disconnected(Some("logout"));
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, HubError::NotConnected));

        gate.notify_waiters();
        assert_eq!(db.count_messages().unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn mark_read_racing_ingest_keeps_cache_and_storage_equal() {
        let (ingestor, db, cache, _) = ingestor();
        let ingestor = Arc::new(ingestor);

        for round in 0..200 {
            let ingest = {
                let ingestor = ingestor.clone();
                tokio::spawn(async move {
                    let msg = normalize(raw(&format!("m{}", round), "A", "me", false, round), None);
                    ingestor.ingest(msg).await.unwrap();
                })
            };
            let mark = {
                let ingestor = ingestor.clone();
                tokio::spawn(async move { ingestor.mark_read("A").await.unwrap() })
            };
            ingest.await.unwrap();
            mark.await.unwrap();

            let stored = db.get_chat("A").unwrap().unwrap().unread_count;
            let cached = cache.get_chat_group("A").unwrap().unread_count;
            assert_eq!(cached, stored, "round {}", round);
        }
    }

    #[tokio::test]
    async fn idle_chat_locks_are_pruned() {
        let (ingestor, _, _, _) = ingestor();
        for chat in ["A", "B", "C"] {
            ingestor
                .ingest(normalize(raw(&format!("{}1", chat), chat, "me", false, 1), None))
                .await
                .unwrap();
        }
        assert_eq!(ingestor.lock_count(), 3);

        let held = ingestor.chat_lock("A");
        ingestor.prune_idle_locks();
        assert_eq!(ingestor.lock_count(), 1);

        drop(held);
        ingestor.prune_idle_locks();
        assert_eq!(ingestor.lock_count(), 0);
    }
}
