//! Common glue for my bots: logging and runtime bootstrap, plus a chat
//! helper every bot ends up wanting sooner or later.

use std::future::Future;

use teloxide::prelude::*;

/// Initialize logging and run `closure` to completion on a fresh
/// multi-threaded async runtime. `default_filters` is used unless the
/// `RUST_LOG` environment variable overrides it; filter syntax is that of
/// [pretty_env_logger][], which does the actual logging.
///
/// Timestamps are skipped when running as a systemd service, since the
/// journal stamps every line on its own.
///
/// [pretty_env_logger]: https://docs.rs/pretty_env_logger
pub fn start_everything(default_filters: &str, closure: impl Future<Output = ()>) {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filters.to_string());

    let running_under_systemd = std::env::var_os("JOURNAL_STREAM").is_some();

    let mut builder = match running_under_systemd {
        true => pretty_env_logger::formatted_builder(),
        false => pretty_env_logger::formatted_timed_builder(),
    };

    builder.parse_filters(&filters);

    if builder.try_init().is_err() {
        log::error!("Tried to init logger twice!");
    }

    log::info!("hi");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build the async runtime!")
        .block_on(closure);
}

/// Whether a user of this ID is an admin of the specified chat of that ID.
pub async fn is_admin_of(
    bot: &Bot,
    user: UserId,
    chat: ChatId,
) -> Result<bool, teloxide::RequestError> {
    Ok(bot
        .get_chat_administrators(chat)
        .await?
        .iter()
        .any(|member| member.user.id == user))
}
