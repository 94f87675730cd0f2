use std::{fs, sync::Arc};

use teloxide::{dptree::deps, prelude::*};
use tokio::sync::RwLock;

use crate::{
    config::{self, RuntimeConfig, Settings},
    database::Database,
    handlers::{generate_bot_commands, handle_message},
    sticky::StickyManager,
};

/// # Panics
///
/// Panics if there's no key file, or if the database or the initial
/// sticky state can't be brought up.
pub async fn entry() {
    log::info!("ASYNC WOOOO");
    let settings = Settings::from_env();

    let key = fs::read_to_string(match cfg!(debug_assertions) {
        true => "key_debug",
        false => "key",
    })
    .expect("Could not load bot key file!");

    let bot = Bot::new(key);

    bot.set_my_commands(generate_bot_commands())
        .await
        .expect("Failed to set bot commands!");

    let database = Database::new().await.expect("Failed to create database!");

    let manager = Arc::new(StickyManager::new(bot.clone(), database, settings.clone()));
    let loaded = manager
        .init()
        .await
        .expect("Failed to load sticky messages!");
    log::info!("Loaded {loaded} sticky message(s) from the database.");

    let runtime_config = Arc::new(RwLock::new(RuntimeConfig::load_or_default(
        &settings.runtime_config_path,
    )));
    tokio::spawn(config::watch_runtime_config(
        settings.runtime_config_path,
        runtime_config.clone(),
    ));

    log::info!("Creating the handler...");

    let handler =
        dptree::entry().branch(Update::filter_message().branch(dptree::endpoint(handle_message)));

    log::info!("Dispatching the dispatcher!");

    Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .dependencies(deps![manager, runtime_config])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("it appears we have been bonked.");
}
