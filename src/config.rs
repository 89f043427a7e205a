use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::ChatError;

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// STOMP-over-WebSocket endpoint of the broker.
    pub broker_url: String,
    /// Base of the REST API (history, contacts, presence).
    pub api_base_url: String,
    pub reconnect_delay_ms: u64,
    pub heartbeat_ms: u64,
    pub connect_timeout_ms: u64,
    pub presence_interval_secs: u64,
    pub typing_timeout_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            broker_url: "ws://localhost:8080/ws/websocket".to_string(),
            api_base_url: "http://localhost:8080/api".to_string(),
            reconnect_delay_ms: 5_000,
            heartbeat_ms: 4_000,
            connect_timeout_ms: 10_000,
            presence_interval_secs: 30,
            typing_timeout_ms: 3_000,
        }
    }
}

impl ChatConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn presence_interval(&self) -> Duration {
        Duration::from_secs(self.presence_interval_secs)
    }

    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        if !(self.broker_url.starts_with("ws://") || self.broker_url.starts_with("wss://")) {
            return Err(ChatError::Config(format!(
                "broker_url must start with ws:// or wss:// (got `{}`)",
                self.broker_url
            )));
        }
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            return Err(ChatError::Config(format!(
                "api_base_url must start with http:// or https:// (got `{}`)",
                self.api_base_url
            )));
        }
        let intervals = [
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            ("heartbeat_ms", self.heartbeat_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("presence_interval_secs", self.presence_interval_secs),
            ("typing_timeout_ms", self.typing_timeout_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(ChatError::Config(format!("{name} must be greater than zero")));
        }
        Ok(())
    }
}

pub fn load_config(path: &str) -> ChatConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<ChatConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                ChatConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            ChatConfig::default()
        }
    }
}

pub fn save_config(path: &str, config: &ChatConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: ChatConfig =
            serde_json::from_str(r#"{"broker_url":"wss://chat.example.com/ws/websocket"}"#)
                .unwrap();
        assert_eq!(config.broker_url, "wss://chat.example.com/ws/websocket");
        assert_eq!(config.presence_interval(), Duration::from_secs(30));
        assert_eq!(config.typing_timeout(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_intervals_and_bad_schemes() {
        let config = ChatConfig {
            heartbeat_ms: 0,
            ..ChatConfig::default()
        };
        assert!(matches!(config.validate(), Err(ChatError::Config(msg)) if msg.contains("heartbeat_ms")));

        let config = ChatConfig {
            broker_url: "http://localhost:8080/ws".into(),
            ..ChatConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_then_load_from_disk() {
        let dir = std::env::temp_dir().join(format!("billsplit-chat-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("chat.json");
        let path = path.to_str().unwrap();

        let config = ChatConfig {
            reconnect_delay_ms: 250,
            ..ChatConfig::default()
        };
        save_config(path, &config).unwrap();
        assert_eq!(load_config(path), config);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        assert_eq!(load_config("does/not/exist.json"), ChatConfig::default());
    }
}
