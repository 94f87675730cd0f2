use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use notify::{RecursiveMode, Watcher};
use serde::Deserialize;
use tokio::sync::RwLock;

/// Process-wide settings, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Minimum interval between automatic sticky reposts in a chat.
    pub message_cooldown: Duration,
    /// Message count that forces a repost even within the cooldown.
    pub message_max: u32,
    /// Path of the runtime configuration file.
    pub runtime_config_path: PathBuf,
}

impl Settings {
    pub fn from_env() -> Settings {
        Settings {
            message_cooldown: Duration::from_secs(env_or("MESSAGE_COOLDOWN_SEC", 15)),
            message_max: env_or("MESSAGE_MAX", 5),
            runtime_config_path: std::env::var_os("STICKY_BOT_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("bot_config.toml")),
        }
    }
}

/// Read an environment variable and parse it, falling back to `default`
/// when unset or imparsable.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Behavior toggles that may change while the bot is running. Loaded from
/// a TOML file at startup and reloaded whenever the file changes on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub prevent_emoji_spam: PreventEmojiSpam,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PreventEmojiSpam {
    pub enabled: bool,
    /// Chats where emoji-only messages are left alone.
    pub exempt_chats: Vec<i64>,
}

impl Default for PreventEmojiSpam {
    fn default() -> Self {
        PreventEmojiSpam {
            enabled: true,
            exempt_chats: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeConfigError {
    #[error("could not read the config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse the config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<RuntimeConfig, RuntimeConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Like [`RuntimeConfig::load`], but a missing or broken file only
    /// warns and yields the defaults. Used at startup, where refusing to
    /// boot over an optional file would be silly.
    pub fn load_or_default(path: &Path) -> RuntimeConfig {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!(
                    "Not using runtime config from {}: {}. Going with defaults.",
                    path.display(),
                    e
                );
                RuntimeConfig::default()
            }
        }
    }
}

/// Watch the runtime config file and swap in a freshly parsed
/// [`RuntimeConfig`] whenever it changes. Runs for the life of the
/// process; parse failures keep the previous configuration.
pub async fn watch_runtime_config(path: PathBuf, config: Arc<RwLock<RuntimeConfig>>) {
    let update_notify = Arc::new(tokio::sync::Notify::new());
    let update_notify_watcher_clone = update_notify.clone();
    let file_name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();

    let mut watcher =
        notify::recommended_watcher(move |event: Result<notify::Event, notify::Error>| {
            let Ok(event) = event else {
                return;
            };
            let kind = event.kind;
            if kind.is_create() || kind.is_modify() || kind.is_other() {
                for changed in &event.paths {
                    if changed.file_name() == Some(file_name.as_os_str()) {
                        update_notify_watcher_clone.notify_waiters();
                        break;
                    }
                }
            }
        })
        .expect("Failed to create the config file watcher!");

    let watch_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    watcher
        .watch(watch_dir, RecursiveMode::NonRecursive)
        .expect("Failed to watch the config directory!");

    loop {
        update_notify.notified().await;
        log::debug!("Notified of a config file change!");

        match RuntimeConfig::load(&path) {
            Ok(new_config) => {
                let mut current = config.write().await;
                if *current != new_config {
                    *current = new_config;
                    log::info!("Runtime configuration reloaded.");
                }
            }
            Err(e) => log::warn!("Ignoring runtime config update: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn empty_config_is_all_defaults() {
        let config: RuntimeConfig = toml::from_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert!(config.prevent_emoji_spam.enabled);
        assert!(config.prevent_emoji_spam.exempt_chats.is_empty());
    }

    #[test]
    fn partial_config_fills_in_the_rest() {
        let config: RuntimeConfig = toml::from_str(
            "[prevent_emoji_spam]
            exempt_chats = [-1001234, 5678]",
        )
        .unwrap();
        assert!(config.prevent_emoji_spam.enabled);
        assert_eq!(config.prevent_emoji_spam.exempt_chats, vec![-1001234, 5678]);
    }

    #[test]
    fn disabling_the_checker_parses() {
        let config: RuntimeConfig = toml::from_str(
            "[prevent_emoji_spam]
            enabled = false",
        )
        .unwrap();
        assert!(!config.prevent_emoji_spam.enabled);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = RuntimeConfig::load_or_default(Path::new("definitely/not/a/real/file.toml"));
        assert_eq!(config, RuntimeConfig::default());
    }
}
