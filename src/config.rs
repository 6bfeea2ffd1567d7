use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::TransportError;
use crate::network::{RestHistoryClient, TransportOptions, socket_endpoint};

pub const DEFAULT_API_URL: &str = "https://moto-alert.ru";
pub const DEFAULT_SOCKET_URL: &str = "https://moto-alert.ru";
pub const DEFAULT_SOCKET_PATH: &str = "/socket.io/";
pub const DEFAULT_CHAT_EVENT: &str = "chat";
pub const DEFAULT_DB_PATH: &str = "data/client.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    pub api_url: String,
    pub socket_url: String,
    pub socket_path: String,
    pub chat_event: String,
    pub db_path: String,
    pub reconnect_delay_ms: u64,
    pub reconnect_delay_max_ms: u64,
    pub handshake_timeout_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            chat_event: DEFAULT_CHAT_EVENT.to_string(),
            db_path: DEFAULT_DB_PATH.to_string(),
            reconnect_delay_ms: 1000,
            reconnect_delay_max_ms: 5000,
            handshake_timeout_ms: 20000,
        }
    }
}

impl ChatConfig {
    /// Reads `MOTO_*` variables. Call `dotenvy::dotenv()` first to pick up a
    /// `.env` file.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str, default: String| match lookup(key) {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => default,
        };
        let number = |key: &str, default: u64| parse_or(key, lookup(key), default);

        let config = Self {
            api_url: text("MOTO_API_URL", defaults.api_url),
            socket_url: text("MOTO_SOCKET_URL", defaults.socket_url),
            socket_path: text("MOTO_SOCKET_PATH", defaults.socket_path),
            chat_event: text("MOTO_CHAT_EVENT", defaults.chat_event),
            db_path: text("MOTO_DB_PATH", defaults.db_path),
            reconnect_delay_ms: number("MOTO_RECONNECT_DELAY_MS", defaults.reconnect_delay_ms),
            reconnect_delay_max_ms: number(
                "MOTO_RECONNECT_DELAY_MAX_MS",
                defaults.reconnect_delay_max_ms,
            ),
            handshake_timeout_ms: number("MOTO_HANDSHAKE_TIMEOUT_MS", defaults.handshake_timeout_ms),
        };
        log::debug!("Loaded chat config: {config:?}");
        config
    }

    pub fn transport_options(&self) -> Result<TransportOptions, TransportError> {
        let endpoint = socket_endpoint(&self.socket_url, &self.socket_path)?;
        let mut options = TransportOptions::new(endpoint);
        options.chat_event = self.chat_event.clone();
        options.reconnect_delay = Duration::from_millis(self.reconnect_delay_ms);
        options.reconnect_delay_max =
            Duration::from_millis(self.reconnect_delay_max_ms.max(self.reconnect_delay_ms));
        options.handshake_timeout = Duration::from_millis(self.handshake_timeout_ms);
        Ok(options)
    }

    pub fn history_client(&self) -> RestHistoryClient {
        RestHistoryClient::new(self.api_url.clone())
    }
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = value else {
        return default;
    };
    match value.trim().parse() {
        Ok(parsed) => parsed,
        Err(err) => {
            log::warn!("Ignoring invalid {key}='{value}': {err}");
            default
        }
    }
}
