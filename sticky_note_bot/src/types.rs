use teloxide::types::{ChatId, MessageId};

/// The sticky message configured for a single chat, as persisted in the
/// database and mirrored into the in-memory cache.
///
/// `message_id` is the id of the copy of the sticky message currently
/// live on Telegram; it changes on every repost. At most one record
/// exists per chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickyMessageRecord {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub text: String,
}
