//! Source code for Sticky Note Bot, a moderation helper that keeps a
//! designated "sticky" message glued to the bottom of a chat by deleting
//! and resending it once enough messages or time have passed.

/// Various types used throughout.
mod types;

/// Startup settings and runtime-reloadable configuration.
mod config;

/// The database.
mod database;

/// Miscellaneous functions.
mod misc;

/// The sticky message manager itself.
mod sticky;

/// Emoji-spam checker functionality.
mod spam_checker;

/// Functions that handle events from Telegram.
mod handlers;

/// Entry function that starts the bot.
mod entry;
pub use entry::*;
