use std::{collections::HashMap, sync::Arc, time::Duration};

use teloxide::types::ChatId;
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    time::Instant,
};

use crate::types::StickyMessageRecord;

/// All in-memory bookkeeping of the sticky message subsystem. Each
/// manager owns an instance; nothing here is process-global.
///
/// None of this survives a restart; it is rebuilt from the database at
/// startup. The inner mutexes are only ever held across map operations,
/// never across I/O.
#[derive(Default)]
pub struct StickyState {
    /// Last-known record per chat, mirroring the database.
    cache: Mutex<HashMap<ChatId, StickyMessageRecord>>,
    /// Per-chat repost locks. A chat's entry is created on first use and
    /// kept forever; there's one sticky message per chat at most, so this
    /// stays tiny.
    repost_locks: Mutex<HashMap<ChatId, Arc<Mutex<()>>>>,
    /// Deadline until which automatic reposts are suppressed. No entry
    /// means the chat is not in cooldown at all.
    cooldowns: Mutex<HashMap<ChatId, Instant>>,
    /// Messages seen in the chat since the last repost.
    counters: Mutex<HashMap<ChatId, u32>>,
}

impl StickyState {
    pub fn new() -> StickyState {
        StickyState::default()
    }

    pub async fn save_cache(&self, record: StickyMessageRecord) {
        self.cache.lock().await.insert(record.chat_id, record);
    }

    pub async fn cached(&self, chat_id: ChatId) -> Option<StickyMessageRecord> {
        self.cache.lock().await.get(&chat_id).cloned()
    }

    pub async fn remove_cache(&self, chat_id: ChatId) {
        self.cache.lock().await.remove(&chat_id);
    }

    /// Try to claim the chat for a repost. Returns `None` if a repost for
    /// this chat is already in flight; the claim is released when the
    /// returned guard drops, on every exit path.
    pub async fn try_lock_repost(&self, chat_id: ChatId) -> Option<OwnedMutexGuard<()>> {
        let lock = self
            .repost_locks
            .lock()
            .await
            .entry(chat_id)
            .or_default()
            .clone();
        lock.try_lock_owned().ok()
    }

    pub async fn start_cooldown(&self, chat_id: ChatId, period: Duration) {
        self.cooldowns
            .lock()
            .await
            .insert(chat_id, Instant::now() + period);
    }

    /// Whether the chat is still within its repost cooldown. A chat that
    /// never had a cooldown started is not in cooldown.
    pub async fn is_cooldown(&self, chat_id: ChatId) -> bool {
        self.cooldowns
            .lock()
            .await
            .get(&chat_id)
            .is_some_and(|deadline| Instant::now() < *deadline)
    }

    pub async fn counter(&self, chat_id: ChatId) -> u32 {
        self.counters.lock().await.get(&chat_id).copied().unwrap_or(0)
    }

    /// Count one more qualifying message in the chat. Returns the new count.
    pub async fn bump_counter(&self, chat_id: ChatId) -> u32 {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry(chat_id).or_insert(0);
        *counter += 1;
        *counter
    }

    pub async fn reset_counter(&self, chat_id: ChatId) {
        self.counters.lock().await.insert(chat_id, 0);
    }
}
