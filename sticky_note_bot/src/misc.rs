use teloxide::{types::Message, Bot, RequestError};

use bot_commons::is_admin_of;

/// Checks if the sender of this message is an admin of the chat it was
/// sent in. Returns `true` if this is a private chat between the bot and
/// the user.
pub async fn is_sender_admin(bot: &Bot, message: &Message) -> Result<bool, RequestError> {
    if message.chat.is_private() {
        return Ok(true);
    }

    let is_admin = if let Some(sender_chat) = &message.sender_chat {
        // If it's posted by the chat itself, it's an anonymous admin.
        sender_chat.id == message.chat.id
    } else if let Some(user) = &message.from {
        is_admin_of(bot, user.id, message.chat.id).await?
    } else {
        false
    };

    Ok(is_admin)
}
