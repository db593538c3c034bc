//! Session configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::hub::HubConfig;
use crate::messages::DEFAULT_TOMBSTONE_CAPACITY;

/// Tunables for one session. Every field has a default, so a partial
/// JSON document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Broadcast channel shared by all tabs of one dashboard
    pub channel_name: String,
    /// Heartbeat (`peer-update`) period in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Expiry + inactivity sweep period in milliseconds
    pub maintenance_interval_ms: u64,
    /// Peers silent for longer than this are swept
    pub inactivity_timeout_ms: u64,
    /// Composing flag auto-clears after this much silence
    pub typing_timeout_ms: u64,
    /// Observer event buffer
    pub event_capacity: usize,
    /// Deleted message ids remembered to block resurrection
    pub tombstone_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel_name: "collaborative-dashboard".to_string(),
            heartbeat_interval_ms: 30_000,
            maintenance_interval_ms: 60_000,
            inactivity_timeout_ms: 300_000,
            typing_timeout_ms: 3_000,
            event_capacity: 256,
            tombstone_capacity: DEFAULT_TOMBSTONE_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Heartbeat period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Maintenance sweep period.
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    /// Silence after which a peer is dropped.
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    /// Idle time before typing is cleared.
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    /// Strict load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_json(path.as_ref())
    }
}

/// Everything a host process needs: the hub plus the session settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub hub: HubConfig,
    pub session: SessionConfig,
}

/// Config loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Lenient load: falls back to defaults when the file is missing or broken.
pub fn load_config(path: impl AsRef<Path>) -> AppConfig {
    let path = path.as_ref();
    match read_json(path) {
        Ok(config) => config,
        Err(ConfigError::Io(err)) => {
            log::info!("Config file {} not found ({err}); using defaults", path.display());
            AppConfig::default()
        }
        Err(err) => {
            log::warn!("Failed to load config file {}: {err}", path.display());
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.channel_name, "collaborative-dashboard");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.maintenance_interval(), Duration::from_secs(60));
        assert_eq!(config.inactivity_timeout(), Duration::from_secs(300));
        assert_eq!(config.typing_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"channel_name":"lab","typing_timeout_ms":500}"#).unwrap();
        assert_eq!(config.channel_name, "lab");
        assert_eq!(config.typing_timeout_ms, 500);
        assert_eq!(config.heartbeat_interval_ms, 30_000);
    }

    #[test]
    fn test_app_config_nested() {
        let config: AppConfig =
            serde_json::from_str(r#"{"hub":{"capacity":8},"session":{"event_capacity":4}}"#).unwrap();
        assert_eq!(config.hub.capacity, 8);
        assert_eq!(config.session.event_capacity, 4);
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("tabsync-config-does-not-exist.json");
        assert!(matches!(SessionConfig::load(&path), Err(ConfigError::Io(_))));

        let fallback = load_config(&path);
        assert_eq!(fallback.session, SessionConfig::default());
    }

    #[test]
    fn test_load_broken_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        assert!(matches!(SessionConfig::load(file.path()), Err(ConfigError::Parse(_))));
        assert_eq!(load_config(file.path()).hub.capacity, 256);
    }

    #[test]
    fn test_load_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"heartbeat_interval_ms": 1000}}"#).unwrap();

        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
    }
}
