use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use netzap_db::Database;
use netzap_types::models::{ChatGroup, Message};

/// In-memory chat index keyed by chat id.
///
/// Derived from storage and rebuildable at any time. Each chat is updated
/// under the write lock, so readers see a chat either before or after an
/// update, never half of one.
pub struct AggregateCache {
    inner: RwLock<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    groups: HashMap<String, CachedGroup>,
    /// Creation order, used to keep chats without messages stable.
    next_seq: u64,
    /// `(timestamp, id)` of the newest message; ties go to the later one.
    newest: Option<(i64, String)>,
}

struct CachedGroup {
    seq: u64,
    group: ChatGroup,
}

impl AggregateCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
        }
    }

    /// Fold a freshly persisted message into its chat.
    pub fn apply(&self, msg: &Message) {
        let mut inner = self.write();
        let seq = inner.next_seq;

        let entry = inner
            .groups
            .entry(msg.chat_id.clone())
            .or_insert_with(|| CachedGroup {
                seq,
                group: ChatGroup {
                    chat_id: msg.chat_id.clone(),
                    chat_name: msg.chat_name.clone(),
                    is_group: msg.is_group,
                    messages: Vec::new(),
                    last_message: None,
                    unread_count: 0,
                },
            });

        let group = &mut entry.group;
        group.messages.push(msg.clone());
        // Last seen wins, even when its timestamp is older.
        group.last_message = Some(msg.summary());
        if !msg.is_from_me {
            group.unread_count += 1;
        }

        if entry.seq == seq {
            inner.next_seq += 1;
        }
        if inner.newest.as_ref().is_none_or(|(ts, _)| msg.timestamp >= *ts) {
            inner.newest = Some((msg.timestamp, msg.id.clone()));
        }
    }

    /// Most recent activity first; chats without messages last, in creation order.
    pub fn get_chat_groups(&self) -> Vec<ChatGroup> {
        let inner = self.read();
        let mut entries: Vec<&CachedGroup> = inner.groups.values().collect();
        entries.sort_by_key(|e| {
            let ts = e.group.last_message.as_ref().map(|m| m.timestamp);
            (ts.is_none(), Reverse(ts), e.seq)
        });
        entries.into_iter().map(|e| e.group.clone()).collect()
    }

    /// Ingestion order; empty for unknown chats.
    pub fn get_chat_messages(&self, chat_id: &str) -> Vec<Message> {
        self.read()
            .groups
            .get(chat_id)
            .map(|e| e.group.messages.clone())
            .unwrap_or_default()
    }

    pub fn get_chat_group(&self, chat_id: &str) -> Option<ChatGroup> {
        self.read().groups.get(chat_id).map(|e| e.group.clone())
    }

    /// Returns `false` if the chat is unknown.
    pub fn mark_chat_as_read(&self, chat_id: &str) -> bool {
        match self.write().groups.get_mut(chat_id) {
            Some(entry) => {
                entry.group.unread_count = 0;
                true
            }
            None => false,
        }
    }

    /// Id of the message with the greatest timestamp.
    pub fn last_message_id(&self) -> Option<String> {
        self.read().newest.as_ref().map(|(_, id)| id.clone())
    }

    pub fn len(&self) -> usize {
        self.read().groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        *self.write() = CacheInner::default();
    }

    /// Replace the cache contents with what storage holds, loading at most
    /// `window` recent messages per chat. Returns the number of chats loaded.
    pub fn rebuild(&self, db: &Database, window: u32) -> anyhow::Result<usize> {
        let chats = db.get_chats()?;
        let mut rebuilt = CacheInner::default();

        for mut group in chats {
            let mut messages = db.get_chat_messages(&group.chat_id, window, 0)?;
            messages.reverse();
            group.messages = messages;

            let seq = rebuilt.next_seq;
            rebuilt.next_seq += 1;
            rebuilt
                .groups
                .insert(group.chat_id.clone(), CachedGroup { seq, group });
        }
        if let Some(id) = db.get_last_message_id()? {
            rebuilt.newest = db.get_message_by_id(&id)?.map(|msg| (msg.timestamp, msg.id));
        }

        let count = rebuilt.groups.len();
        *self.write() = rebuilt;
        Ok(count)
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AggregateCache {
    fn default() -> Self {
        Self::new()
    }
}
