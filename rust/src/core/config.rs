use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::channel::Backoff;
use super::AppCore;

const DEFAULT_TYPING_DEBOUNCE_MS: u64 = 400;
const DEFAULT_TYPING_WINDOW_MS: u64 = 1_200;
const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 250;
const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 4_000;
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

pub(crate) const CONFIG_FILE_NAME: &str = "quad_config.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) typing_debounce_ms: Option<u64>,
    pub(crate) typing_window_ms: Option<u64>,
    pub(crate) reconnect_base_delay_ms: Option<u64>,
    pub(crate) reconnect_max_delay_ms: Option<u64>,
    pub(crate) reconnect_max_attempts: Option<u32>,
    // Start with connectivity Offline until the host reports NetworkChanged.
    pub(crate) start_offline: Option<bool>,
}

pub(crate) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE_NAME);
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    match serde_json::from_slice::<AppConfig>(&bytes) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(%e, path = %path.display(), "ignoring malformed config");
            AppConfig::default()
        }
    }
}

impl AppConfig {
    pub(crate) fn typing_debounce(&self) -> Duration {
        Duration::from_millis(self.typing_debounce_ms.unwrap_or(DEFAULT_TYPING_DEBOUNCE_MS))
    }

    pub(crate) fn typing_window(&self) -> Duration {
        Duration::from_millis(self.typing_window_ms.unwrap_or(DEFAULT_TYPING_WINDOW_MS))
    }

    pub(crate) fn backoff(&self) -> Backoff {
        let base = self
            .reconnect_base_delay_ms
            .unwrap_or(DEFAULT_RECONNECT_BASE_DELAY_MS);
        let max_delay = self
            .reconnect_max_delay_ms
            .unwrap_or(DEFAULT_RECONNECT_MAX_DELAY_MS)
            .max(base);
        Backoff {
            base: Duration::from_millis(base),
            max_delay: Duration::from_millis(max_delay),
            max_attempts: self
                .reconnect_max_attempts
                .unwrap_or(DEFAULT_RECONNECT_MAX_ATTEMPTS)
                .max(1),
        }
    }
}

impl AppCore {
    /// Whether the core should assume the network is up at startup.
    pub(super) fn starts_online(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if std::env::var("QUAD_DISABLE_NETWORK").ok().as_deref() == Some("1") {
            return false;
        }
        self.config.start_offline != Some(true)
    }
}
