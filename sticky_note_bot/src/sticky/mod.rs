mod messenger;
mod state;

pub use messenger::ChannelMessenger;
pub use state::StickyState;

use teloxide::{types::ChatId, Bot, RequestError};

use crate::{
    config::Settings,
    database::{Database, StickyStore},
    types::StickyMessageRecord,
};

/// The manager as wired up in production and handed around by the
/// dispatcher.
pub type BotStickyManager = StickyManager<Bot, Database>;

#[derive(Debug, thiserror::Error)]
pub enum StickyError {
    #[error("chat platform request failed: {0}")]
    Platform(#[from] RequestError),
    #[error("database operation failed: {0}")]
    Database(#[from] crate::database::Error),
}

/// Keeps one configured message per chat glued to the bottom of its
/// timeline by deleting and resending it once conditions are met.
///
/// A repost is due when the chat's cooldown has lapsed (or never started),
/// or immediately once chat volume since the last repost hits the
/// configured maximum, so the sticky message can't stay buried under a
/// burst of traffic.
pub struct StickyManager<M, S> {
    messenger: M,
    store: S,
    state: StickyState,
    settings: Settings,
}

impl<M: ChannelMessenger, S: StickyStore> StickyManager<M, S> {
    pub fn new(messenger: M, store: S, settings: Settings) -> StickyManager<M, S> {
        StickyManager {
            messenger,
            store,
            state: StickyState::new(),
            settings,
        }
    }

    /// Rebuild the in-memory state from the database: cache every
    /// persisted record, zero its counter and start its cooldown. Must run
    /// once, after the database is reachable and before message events are
    /// processed. Returns how many records were loaded.
    pub async fn init(&self) -> Result<usize, StickyError> {
        let records = self.store.all().await?;
        let count = records.len();
        for record in records {
            let chat_id = record.chat_id;
            self.state.save_cache(record).await;
            self.state.reset_counter(chat_id).await;
            self.state
                .start_cooldown(chat_id, self.settings.message_cooldown)
                .await;
        }
        Ok(count)
    }

    /// The chat's sticky message record, if it has one. Served from the
    /// cache so the per-message hot path never touches the database.
    pub async fn cached(&self, chat_id: ChatId) -> Option<StickyMessageRecord> {
        self.state.cached(chat_id).await
    }

    /// Count one qualifying message toward the chat's repost trip-wire.
    pub async fn count_message(&self, chat_id: ChatId) {
        self.state.bump_counter(chat_id).await;
    }

    /// Whether the sticky message should be pushed back to the bottom.
    /// Pure check with no side effects, safe to call repeatedly; callers
    /// are expected to check this right before [`Self::push_to_bottom`].
    pub async fn needs_repost(&self, chat_id: ChatId) -> bool {
        !self.state.is_cooldown(chat_id).await
            || self.state.counter(chat_id).await >= self.settings.message_max
    }

    /// Delete the live copy of the sticky message and send a fresh one to
    /// the bottom of the chat, then persist and cache the new id and
    /// re-arm the cooldown.
    ///
    /// If a repost for this chat is already in flight, does nothing.
    /// Any failure is logged and swallowed here so one chat's trouble
    /// can't block the others; the counter is reset either way, and the
    /// repost claim is released on every exit path.
    pub async fn push_to_bottom(&self, record: &StickyMessageRecord) {
        let chat_id = record.chat_id;
        let Some(_guard) = self.state.try_lock_repost(chat_id).await else {
            log::debug!("A repost in chat {} is already in flight, skipping.", chat_id);
            return;
        };

        if let Err(e) = self.repost(record).await {
            log::error!(
                "Error while refreshing the sticky message in chat {}: {}",
                chat_id,
                e
            );
        }

        // Whatever happened above, the burst that got us here is answered.
        self.state.reset_counter(chat_id).await;
    }

    async fn repost(&self, record: &StickyMessageRecord) -> Result<(), StickyError> {
        self.messenger
            .delete_message(record.chat_id, record.message_id)
            .await?;

        let new_id = self.messenger.send_message(record.chat_id, &record.text).await?;

        // The durability point. If this write fails, the message sent
        // above stays live with nobody remembering its id; the next
        // repost then trips over the stale id and logs a delete failure.
        self.store.set_message_id(record.chat_id, new_id).await?;

        let updated = StickyMessageRecord {
            message_id: new_id,
            ..record.clone()
        };
        self.state.save_cache(updated).await;
        self.state
            .start_cooldown(record.chat_id, self.settings.message_cooldown)
            .await;
        Ok(())
    }

    /// Configure the chat's sticky message, replacing any previous one:
    /// sends the message, persists the record, refreshes the cache.
    ///
    /// The cooldown is left alone. A chat that never had a repost has no
    /// cooldown entry and so is eligible immediately.
    pub async fn set_sticky(&self, chat_id: ChatId, text: String) -> Result<(), StickyError> {
        let message_id = self.messenger.send_message(chat_id, &text).await?;
        let record = StickyMessageRecord {
            chat_id,
            message_id,
            text,
        };
        self.store.upsert(&record).await?;
        self.state.save_cache(record).await;
        Ok(())
    }

    /// Forget the chat's sticky message. The live copy is left in place.
    /// Returns `false` if the chat had none configured.
    pub async fn remove_sticky(&self, chat_id: ChatId) -> Result<bool, StickyError> {
        if self.state.cached(chat_id).await.is_none() {
            return Ok(false);
        }
        self.store.delete(chat_id).await?;
        self.state.remove_cache(chat_id).await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicBool, AtomicI32, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use teloxide::{types::MessageId, ApiError};

    use super::*;
    use crate::database::Error as DbError;

    const CHAT: ChatId = ChatId(-1000);

    fn settings() -> Settings {
        Settings {
            message_cooldown: Duration::from_secs(15),
            message_max: 5,
            runtime_config_path: "bot_config.toml".into(),
        }
    }

    fn record(message_id: i32, text: &str) -> StickyMessageRecord {
        StickyMessageRecord {
            chat_id: CHAT,
            message_id: MessageId(message_id),
            text: text.to_string(),
        }
    }

    /// Fake chat platform. Messages it "sent" are live and can be deleted
    /// exactly once; deleting anything else is the platform's
    /// message-not-found error, like deleting an already-gone message.
    #[derive(Default)]
    struct FakeChannel {
        live: Mutex<HashSet<i32>>,
        sent: Mutex<Vec<(ChatId, String)>>,
        next_id: AtomicI32,
        fail_sends: AtomicBool,
    }

    impl FakeChannel {
        fn with_live(ids: &[i32]) -> FakeChannel {
            let channel = FakeChannel::default();
            channel.next_id.store(100, Ordering::SeqCst);
            *channel.live.lock().unwrap() = ids.iter().copied().collect();
            channel
        }

        fn live_ids(&self) -> HashSet<i32> {
            self.live.lock().unwrap().clone()
        }

        fn sent_texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
        }
    }

    #[async_trait]
    impl ChannelMessenger for FakeChannel {
        async fn delete_message(
            &self,
            _chat_id: ChatId,
            message_id: MessageId,
        ) -> Result<(), RequestError> {
            if !self.live.lock().unwrap().remove(&message_id.0) {
                return Err(RequestError::Api(ApiError::MessageToDeleteNotFound));
            }
            Ok(())
        }

        async fn send_message(
            &self,
            chat_id: ChatId,
            text: &str,
        ) -> Result<MessageId, RequestError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(RequestError::Api(ApiError::BotBlocked));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.live.lock().unwrap().insert(id);
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(MessageId(id))
        }
    }

    /// Fake persistence, with a switch to make `set_message_id` fail the
    /// way a dead database would.
    #[derive(Default)]
    struct FakeStore {
        rows: Mutex<Vec<StickyMessageRecord>>,
        fail_updates: AtomicBool,
    }

    impl FakeStore {
        fn with_rows(rows: Vec<StickyMessageRecord>) -> FakeStore {
            FakeStore {
                rows: Mutex::new(rows),
                fail_updates: AtomicBool::new(false),
            }
        }

        fn row(&self, chat_id: ChatId) -> Option<StickyMessageRecord> {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.chat_id == chat_id)
                .cloned()
        }
    }

    #[async_trait]
    impl StickyStore for FakeStore {
        async fn all(&self) -> Result<Vec<StickyMessageRecord>, DbError> {
            Ok(self.rows.lock().unwrap().clone())
        }

        async fn upsert(&self, record: &StickyMessageRecord) -> Result<(), DbError> {
            let mut rows = self.rows.lock().unwrap();
            rows.retain(|r| r.chat_id != record.chat_id);
            rows.push(record.clone());
            Ok(())
        }

        async fn set_message_id(
            &self,
            chat_id: ChatId,
            message_id: MessageId,
        ) -> Result<(), DbError> {
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(DbError::PoolClosed);
            }
            let mut rows = self.rows.lock().unwrap();
            match rows.iter_mut().find(|r| r.chat_id == chat_id) {
                Some(row) => {
                    row.message_id = message_id;
                    Ok(())
                }
                None => Err(DbError::RowNotFound),
            }
        }

        async fn delete(&self, chat_id: ChatId) -> Result<(), DbError> {
            self.rows.lock().unwrap().retain(|r| r.chat_id != chat_id);
            Ok(())
        }
    }

    type TestManager = StickyManager<FakeChannel, FakeStore>;

    fn manager_with_record(message_id: i32, text: &str) -> TestManager {
        StickyManager::new(
            FakeChannel::with_live(&[message_id]),
            FakeStore::with_rows(vec![record(message_id, text)]),
            settings(),
        )
    }

    #[tokio::test]
    async fn fresh_chat_needs_repost_regardless_of_counter() {
        let manager = manager_with_record(100, "read the rules");

        // No cooldown has ever been started for this chat.
        assert!(manager.needs_repost(CHAT).await);
        manager.count_message(CHAT).await;
        manager.count_message(CHAT).await;
        assert!(manager.needs_repost(CHAT).await);
    }

    #[tokio::test]
    async fn trip_wire_forces_repost_within_cooldown() {
        let manager = manager_with_record(100, "read the rules");
        manager.init().await.unwrap();

        for _ in 0..4 {
            manager.count_message(CHAT).await;
        }
        // Still within the cooldown, still under the maximum.
        assert!(!manager.needs_repost(CHAT).await);

        manager.count_message(CHAT).await;
        assert!(manager.needs_repost(CHAT).await);
    }

    #[tokio::test]
    async fn successful_repost_resets_counter_and_arms_cooldown() {
        let manager = manager_with_record(100, "read the rules");
        for _ in 0..5 {
            manager.count_message(CHAT).await;
        }

        manager.push_to_bottom(&record(100, "read the rules")).await;

        assert_eq!(manager.state.counter(CHAT).await, 0);
        assert!(manager.state.is_cooldown(CHAT).await);
        // The old copy is gone, the new one is live, and everyone agrees
        // on the new id.
        assert_eq!(manager.messenger.live_ids(), HashSet::from([101]));
        assert_eq!(manager.cached(CHAT).await.unwrap().message_id, MessageId(101));
        assert_eq!(manager.store.row(CHAT).unwrap().message_id, MessageId(101));
    }

    #[tokio::test]
    async fn failed_delete_aborts_but_cleans_up() {
        // Nothing live, so the delete step fails straight away.
        let manager = StickyManager::new(
            FakeChannel::with_live(&[]),
            FakeStore::with_rows(vec![record(100, "read the rules")]),
            settings(),
        );
        for _ in 0..3 {
            manager.count_message(CHAT).await;
        }

        manager.push_to_bottom(&record(100, "read the rules")).await;

        // No replacement was sent, but the counter is zeroed and the
        // chat is not stuck locked or in cooldown.
        assert!(manager.messenger.sent_texts().is_empty());
        assert_eq!(manager.state.counter(CHAT).await, 0);
        assert!(manager.state.try_lock_repost(CHAT).await.is_some());
        assert!(manager.needs_repost(CHAT).await);
    }

    #[tokio::test]
    async fn failed_send_aborts_but_cleans_up() {
        let manager = manager_with_record(100, "read the rules");
        manager.init().await.unwrap();
        manager.messenger.fail_sends.store(true, Ordering::SeqCst);

        manager.push_to_bottom(&record(100, "read the rules")).await;

        // The old copy was already deleted; the record still points at it.
        assert_eq!(manager.messenger.live_ids(), HashSet::new());
        assert_eq!(manager.cached(CHAT).await.unwrap().message_id, MessageId(100));
        assert_eq!(manager.state.counter(CHAT).await, 0);
        assert!(manager.state.try_lock_repost(CHAT).await.is_some());
    }

    #[tokio::test]
    async fn init_populates_cache_and_state_per_record() {
        let other = ChatId(-2000);
        let store = FakeStore::with_rows(vec![
            record(100, "read the rules"),
            StickyMessageRecord {
                chat_id: other,
                message_id: MessageId(7),
                text: "no spoilers".to_string(),
            },
        ]);
        let manager = StickyManager::new(FakeChannel::default(), store, settings());

        let loaded = manager.init().await.unwrap();

        assert_eq!(loaded, 2);
        assert_eq!(manager.cached(CHAT).await.unwrap().text, "read the rules");
        assert_eq!(manager.cached(other).await.unwrap().text, "no spoilers");
        assert_eq!(manager.state.counter(CHAT).await, 0);
        assert_eq!(manager.state.counter(other).await, 0);
        assert!(manager.state.is_cooldown(CHAT).await);
        assert!(manager.state.is_cooldown(other).await);
    }

    #[tokio::test(start_paused = true)]
    async fn repost_timing_scenario() {
        // Cooldown 15s, maximum 5, no prior activity in the chat.
        let manager = manager_with_record(100, "read the rules");
        assert!(manager.needs_repost(CHAT).await);

        manager.push_to_bottom(&record(100, "read the rules")).await;

        // Within a second of the repost, with a quiet chat: nothing due.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!manager.needs_repost(CHAT).await);

        // Five rapid messages trip the wire despite the cooldown.
        for _ in 0..5 {
            manager.count_message(CHAT).await;
        }
        assert!(manager.needs_repost(CHAT).await);
    }

    #[tokio::test]
    async fn failed_persist_leaves_the_documented_divergence() {
        let manager = manager_with_record(100, "read the rules");
        // Seed the cache without arming a cooldown, as after a distant
        // startup whose cooldown has long lapsed.
        manager.state.save_cache(record(100, "read the rules")).await;
        manager.store.fail_updates.store(true, Ordering::SeqCst);

        manager.push_to_bottom(&record(100, "read the rules")).await;

        // The old copy is deleted and a new one is live, but neither the
        // store nor the cache knows its id.
        assert_eq!(manager.messenger.live_ids(), HashSet::from([101]));
        assert_eq!(manager.cached(CHAT).await.unwrap().message_id, MessageId(100));
        assert_eq!(manager.store.row(CHAT).unwrap().message_id, MessageId(100));
        // The cooldown was never armed, so the next trigger retries...
        assert!(manager.needs_repost(CHAT).await);

        // ...and that retry trips over the stale id at the delete step,
        // leaving the orphaned copy live. Expected, not corrected.
        manager.store.fail_updates.store(false, Ordering::SeqCst);
        let stale = manager.cached(CHAT).await.unwrap();
        manager.push_to_bottom(&stale).await;

        assert_eq!(manager.messenger.live_ids(), HashSet::from([101]));
        assert_eq!(manager.cached(CHAT).await.unwrap().message_id, MessageId(100));
    }

    #[tokio::test]
    async fn concurrent_repost_is_rejected_not_queued() {
        let manager = manager_with_record(100, "read the rules");
        manager.count_message(CHAT).await;

        // Simulate a repost in flight by holding the chat's claim.
        let guard = manager.state.try_lock_repost(CHAT).await.unwrap();
        manager.push_to_bottom(&record(100, "read the rules")).await;
        drop(guard);

        // The rejected attempt did nothing at all.
        assert_eq!(manager.messenger.live_ids(), HashSet::from([100]));
        assert!(manager.messenger.sent_texts().is_empty());
        assert_eq!(manager.state.counter(CHAT).await, 1);
    }

    #[tokio::test]
    async fn set_sticky_sends_persists_and_caches() {
        let manager =
            StickyManager::new(FakeChannel::with_live(&[]), FakeStore::default(), settings());

        manager.set_sticky(CHAT, "read the rules".to_string()).await.unwrap();

        assert_eq!(manager.messenger.sent_texts(), vec!["read the rules"]);
        let stored = manager.store.row(CHAT).unwrap();
        assert_eq!(stored.text, "read the rules");
        assert_eq!(manager.cached(CHAT).await, Some(stored));
        // No cooldown is armed on set; the first qualifying message may
        // repost immediately.
        assert!(manager.needs_repost(CHAT).await);
    }

    #[tokio::test]
    async fn set_sticky_replaces_the_previous_record() {
        let manager = manager_with_record(100, "old text");
        manager.init().await.unwrap();

        manager.set_sticky(CHAT, "new text".to_string()).await.unwrap();

        let stored = manager.store.row(CHAT).unwrap();
        assert_eq!(stored.text, "new text");
        assert_eq!(stored.message_id, MessageId(101));
        assert_eq!(manager.cached(CHAT).await, Some(stored));
        // The superseded copy is not deleted, only forgotten.
        assert!(manager.messenger.live_ids().contains(&100));
    }

    #[tokio::test]
    async fn remove_sticky_forgets_the_record() {
        let manager = manager_with_record(100, "read the rules");
        manager.init().await.unwrap();

        assert!(manager.remove_sticky(CHAT).await.unwrap());
        assert_eq!(manager.cached(CHAT).await, None);
        assert!(manager.store.row(CHAT).is_none());
        // The live copy stays where it is.
        assert_eq!(manager.messenger.live_ids(), HashSet::from([100]));

        // Removing again finds nothing.
        assert!(!manager.remove_sticky(CHAT).await.unwrap());
    }
}
