//! Client configuration loading and persistence.
//!
//! Values come from `<config_dir>/chat-socket/config.json` (missing fields
//! fall back to defaults), then `CHAT_SOCKET_*` environment variables
//! override individual fields.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};

use crate::constants;
use crate::health::HealthConfig;

/// File name inside the config directory.
pub const CONFIG_FILE: &str = "config.json";

/// Configuration for the socket client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base WebSocket (or HTTP) URL of the backend.
    pub ws_url: String,
    /// Application API key.
    pub api_key: String,
    /// Milliseconds between liveness checks.
    pub liveness_interval_ms: u64,
    /// Milliseconds of silence before the stream is stale.
    pub stale_threshold_ms: u64,
    /// Milliseconds between a healthy check and the keep-alive frame.
    pub ping_delay_ms: u64,
    /// Upper bound on reconnect delays in milliseconds.
    pub backoff_cap_ms: u64,
    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: constants::DEFAULT_WS_URL.to_string(),
            api_key: String::new(),
            liveness_interval_ms: constants::LIVENESS_INTERVAL.as_millis() as u64,
            stale_threshold_ms: constants::STALE_THRESHOLD.as_millis() as u64,
            ping_delay_ms: constants::PING_DELAY.as_millis() as u64,
            backoff_cap_ms: constants::BACKOFF_CAP.as_millis() as u64,
            connect_timeout_ms: constants::CONNECT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ClientConfig {
    /// Returns the configuration directory path.
    ///
    /// `CHAT_SOCKET_CONFIG_DIR` wins; otherwise the platform config dir
    /// (e.g. `~/.config/chat-socket`).
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("CHAT_SOCKET_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("chat-socket"))
    }

    /// Loads configuration from the default location, with environment
    /// variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_dir()?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `config.json` from `dir`, or defaults when the file is absent.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            log::debug!("[Config] No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid {}", path.display()))
    }

    /// Apply `CHAT_SOCKET_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Unparsable numbers are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ws_url) = lookup("CHAT_SOCKET_WS_URL") {
            self.ws_url = ws_url;
        }

        if let Some(api_key) = lookup("CHAT_SOCKET_API_KEY") {
            self.api_key = api_key;
        }

        let numeric = [
            ("CHAT_SOCKET_LIVENESS_INTERVAL_MS", &mut self.liveness_interval_ms),
            ("CHAT_SOCKET_STALE_THRESHOLD_MS", &mut self.stale_threshold_ms),
            ("CHAT_SOCKET_PING_DELAY_MS", &mut self.ping_delay_ms),
            ("CHAT_SOCKET_BACKOFF_CAP_MS", &mut self.backoff_cap_ms),
            ("CHAT_SOCKET_CONNECT_TIMEOUT_MS", &mut self.connect_timeout_ms),
        ];
        for (key, field) in numeric {
            if let Some(raw) = lookup(key) {
                match raw.parse::<u64>() {
                    Ok(value) => *field = value,
                    Err(_) => log::warn!("[Config] Ignoring {}={:?}: not a number", key, raw),
                }
            }
        }
    }

    /// Persists the configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    /// Persists the configuration into `dir`, owner read/write only.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Timing parameters for the health monitor.
    #[must_use]
    pub fn health(&self) -> HealthConfig {
        HealthConfig {
            liveness_interval: Duration::from_millis(self.liveness_interval_ms),
            stale_threshold: Duration::from_millis(self.stale_threshold_ms),
            ping_delay: Duration::from_millis(self.ping_delay_ms),
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
        }
    }

    /// Handshake timeout for the transport.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.ws_url, "wss://chat.stream-io-api.com");
        assert_eq!(config.liveness_interval_ms, 10_000);
        assert_eq!(config.stale_threshold_ms, 30_000);
        assert_eq!(config.backoff_cap_ms, 25_000);
        assert_eq!(config.health(), HealthConfig::default());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"api_key": "abc", "stale_threshold_ms": 5000}"#)
                .expect("valid json");
        assert_eq!(config.api_key, "abc");
        assert_eq!(config.stale_threshold_ms, 5000);
        assert_eq!(config.ping_delay_ms, 1000);
    }

    #[test]
    fn test_overrides_apply_and_ignore_garbage() {
        let env: HashMap<&str, &str> = [
            ("CHAT_SOCKET_WS_URL", "ws://localhost:3030"),
            ("CHAT_SOCKET_BACKOFF_CAP_MS", "5000"),
            ("CHAT_SOCKET_STALE_THRESHOLD_MS", "soon"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config.apply_overrides_from(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.ws_url, "ws://localhost:3030");
        assert_eq!(config.backoff_cap_ms, 5000);
        assert_eq!(config.stale_threshold_ms, 30_000);
    }

    #[test]
    fn test_connect_timeout_conversion() {
        let config = ClientConfig {
            connect_timeout_ms: 1500,
            ..ClientConfig::default()
        };
        assert_eq!(config.connect_timeout(), Duration::from_millis(1500));
    }
}
