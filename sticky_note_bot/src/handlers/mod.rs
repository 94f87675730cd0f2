use std::sync::Arc;

use html_escape::encode_text;
use teloxide::{
    payloads::SendMessageSetters,
    prelude::*,
    types::{BotCommand, Me, ParseMode},
    RequestError,
};
use tokio::sync::RwLock;

use crate::{
    config::RuntimeConfig, misc::is_sender_admin, spam_checker, sticky::BotStickyManager,
};

pub fn generate_bot_commands() -> Vec<BotCommand> {
    vec![
        BotCommand::new(
            "stick",
            "Keep a message stuck to the bottom of this chat (admins only).",
        ),
        BotCommand::new("unstick", "Remove this chat's sticky message (admins only)."),
    ]
}

pub async fn handle_message(
    bot: Bot,
    me: Me,
    message: Message,
    manager: Arc<BotStickyManager>,
    runtime_config: Arc<RwLock<RuntimeConfig>>,
) -> Result<(), RequestError> {
    // First check if it's a private message.
    if message.chat.is_private() {
        return handle_private_message(bot, me, message, manager).await;
    }

    if handle_command(&bot, &me, &message, &manager).await? {
        return Ok(());
    }

    // Our own messages don't count toward anything, least of all the
    // freshly resent sticky message itself.
    if message.from.as_ref().is_some_and(|user| user.id == me.user.id) {
        return Ok(());
    }

    if handle_emoji_spam(&bot, &message, &runtime_config).await? {
        return Ok(());
    }

    // Sticky bookkeeping: every other message in a chat with a sticky
    // message counts toward the trip-wire.
    let chat_id = message.chat.id;
    let Some(record) = manager.cached(chat_id).await else {
        return Ok(());
    };

    manager.count_message(chat_id).await;
    if manager.needs_repost(chat_id).await {
        manager.push_to_bottom(&record).await;
    }

    Ok(())
}

/// Delete the message if it consists of nothing but emoji, unless the
/// runtime configuration or the sender's admin status says otherwise.
/// Returns `true` if the message was deleted.
async fn handle_emoji_spam(
    bot: &Bot,
    message: &Message,
    runtime_config: &RwLock<RuntimeConfig>,
) -> Result<bool, RequestError> {
    let Some(text) = message.text() else {
        return Ok(false);
    };
    if !spam_checker::is_only_emoji(text) {
        return Ok(false);
    }

    {
        let config = runtime_config.read().await;
        let prevent = &config.prevent_emoji_spam;
        if !prevent.enabled || prevent.exempt_chats.contains(&message.chat.id.0) {
            return Ok(false);
        }
    }

    if is_sender_admin(bot, message).await? {
        log::debug!("Skipping deleting an emoji-only message from an admin.");
        return Ok(false);
    }

    match bot.delete_message(message.chat.id, message.id).await {
        Ok(_) => {
            log::info!(
                "Removed emoji-only message {} in chat {}.",
                message.id.0,
                message.chat.id
            );
            Ok(true)
        }
        Err(e) => {
            log::warn!(
                "Failed to remove emoji-only message {} in chat {}: {}",
                message.id.0,
                message.chat.id,
                e
            );
            Ok(false)
        }
    }
}

/// Returns `true` if a command was parsed and responded to.
async fn handle_command(
    bot: &Bot,
    me: &Me,
    message: &Message,
    manager: &BotStickyManager,
) -> Result<bool, RequestError> {
    // Get text of the message.
    let Some(text) = message.text() else {
        return Ok(false);
    };
    // Check if it starts with "/", like how a command should.
    if !text.starts_with('/') {
        return Ok(false);
    }
    // Get first word in the message, the command itself.
    let Some(command) = text.split_whitespace().next() else {
        return Ok(false);
    };

    let command_full_len = command.len();

    // Trim the bot's username from the command and convert to lowercase.
    let username = format!("@{}", me.username());
    let command = command.trim_end_matches(username.as_str()).to_lowercase();
    let params = text[command_full_len..].trim_start();

    let command_processed: bool = match command.as_str() {
        "/stick" => handle_stick_command(bot, message, manager, params).await?,
        "/unstick" => handle_unstick_command(bot, message, manager).await?,
        // Any kind of "/start", "/help" commands would yield false and
        // hence cause the help message to be printed in private chats.
        _ => false,
    };

    Ok(command_processed)
}

async fn handle_stick_command(
    bot: &Bot,
    message: &Message,
    manager: &BotStickyManager,
    params: &str,
) -> Result<bool, RequestError> {
    if !is_sender_admin(bot, message).await? {
        bot.send_message(
            message.chat.id,
            "Only chat admins can manage the sticky message.",
        )
        .await?;
        return Ok(true);
    }

    if params.is_empty() {
        bot.send_message(
            message.chat.id,
            "Please provide the message to stick, like this:\n\
            /stick Read the pinned rules before posting.",
        )
        .await?;
        return Ok(true);
    }

    match manager.set_sticky(message.chat.id, params.to_string()).await {
        Ok(()) => {
            log::info!("Sticky message set in chat {}.", message.chat.id);
            bot.send_message(
                message.chat.id,
                format!(
                    "Got it. I'll keep \"<i>{}</i>\" at the bottom of this chat.",
                    encode_text(params)
                ),
            )
            .parse_mode(ParseMode::Html)
            .await?;
        }
        Err(e) => {
            log::error!(
                "Error creating a sticky message in chat {}: {}",
                message.chat.id,
                e
            );
            bot.send_message(
                message.chat.id,
                "Something went wrong while creating the sticky message.",
            )
            .await?;
        }
    }

    Ok(true)
}

async fn handle_unstick_command(
    bot: &Bot,
    message: &Message,
    manager: &BotStickyManager,
) -> Result<bool, RequestError> {
    if !is_sender_admin(bot, message).await? {
        bot.send_message(
            message.chat.id,
            "Only chat admins can manage the sticky message.",
        )
        .await?;
        return Ok(true);
    }

    match manager.remove_sticky(message.chat.id).await {
        Ok(true) => {
            log::info!("Sticky message removed in chat {}.", message.chat.id);
            bot.send_message(message.chat.id, "Removed the sticky message.")
                .await?;
        }
        Ok(false) => {
            bot.send_message(message.chat.id, "This chat has no sticky message.")
                .await?;
        }
        Err(e) => {
            log::error!(
                "Error removing the sticky message in chat {}: {}",
                message.chat.id,
                e
            );
            bot.send_message(
                message.chat.id,
                "Something went wrong while removing the sticky message.",
            )
            .await?;
        }
    }

    Ok(true)
}

pub async fn handle_private_message(
    bot: Bot,
    me: Me,
    message: Message,
    manager: Arc<BotStickyManager>,
) -> Result<(), RequestError> {
    if handle_command(&bot, &me, &message, &manager).await? {
        return Ok(());
    }

    bot.send_message(
        message.chat.id,
        "
This bot keeps one \"sticky\" message glued to the bottom of a chat, so rules or announcements don't get buried by conversation.

To use it, add it to a chat and give it administrator status with the \"Remove messages\" permission. Then an admin can send /stick followed by the message to keep at the bottom, and /unstick to remove it again.

The bot also removes messages that consist of nothing but emoji.",
    )
    .await?;
    Ok(())
}
