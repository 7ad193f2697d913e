//! Broker connection configuration.
//!
//! Owned by the application: the dashboard loads one [`BusConfig`] at startup
//! (usually from a TOML file under the user config directory) and hands it to
//! [`crate::BusHub::new`]. Every field has a usable default so a bare
//! `[Default::default()]` config talks to a local broker.

use std::path::PathBuf;
use std::time::Duration;

use rumqttc::{MqttOptions, Transport};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::BusError;

const CONFIG_DIR: &str = "facilitybus";
const CONFIG_FILE: &str = "bus.toml";

/// Transport the broker connection runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    Websocket,
}

/// Connection parameters for the shared broker link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Broker hostname, or a full `ws://...` URL for websocket transport.
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Client identifier presented to the broker. One per hub instance.
    pub client_id: String,
    /// MQTT keepalive interval; governs liveness detection.
    pub keep_alive_secs: u64,
    /// Delay between reconnect attempts after a transport failure.
    pub reconnect_period_ms: u64,
    /// Upper bound on a single connection handshake.
    pub connect_timeout_secs: u64,
    pub transport: TransportKind,
    /// Capacity of the request channel between the facade and the event loop.
    pub request_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: "facilitybus".to_string(),
            keep_alive_secs: 5,
            reconnect_period_ms: 2000,
            connect_timeout_secs: 5,
            transport: TransportKind::Tcp,
            request_capacity: 64,
        }
    }
}

impl BusConfig {
    /// Checks the fields a broken deployment most often gets wrong.
    pub fn validate(&self) -> Result<(), BusError> {
        if self.host.trim().is_empty() {
            return Err(BusError::ConfigInvalid("host must not be empty".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(BusError::ConfigInvalid(
                "client_id must not be empty".into(),
            ));
        }
        if self.keep_alive_secs == 0 {
            return Err(BusError::ConfigInvalid(
                "keep_alive_secs must be at least 1".into(),
            ));
        }
        if self.reconnect_period_ms == 0 {
            return Err(BusError::ConfigInvalid(
                "reconnect_period_ms must be at least 1".into(),
            ));
        }
        if self.request_capacity == 0 {
            return Err(BusError::ConfigInvalid(
                "request_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Reads and validates a config from a TOML file.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, BusError> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path)?;
        let config: BusConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Conventional config location under the user config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Loads the config from [`Self::default_path`], falling back to defaults
    /// when the file is missing or unreadable.
    pub fn load_or_default() -> Self {
        match Self::default_path() {
            Some(path) if path.is_file() => match Self::from_file(&path) {
                Ok(config) => config,
                Err(e) => {
                    warn!("ignoring config at {}: {}", path.display(), e);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    /// Maps the config onto rumqttc connection options.
    pub(crate) fn mqtt_options(&self) -> MqttOptions {
        let broker_addr = match self.transport {
            TransportKind::Tcp => self.host.clone(),
            TransportKind::Websocket => {
                if self.host.contains("://") {
                    self.host.clone()
                } else {
                    format!("ws://{}:{}/mqtt", self.host, self.port)
                }
            }
        };

        let mut options = MqttOptions::new(self.client_id.clone(), broker_addr, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
        // Subscription state is restored from the registry on every connect,
        // so a persistent broker session would only duplicate it.
        options.set_clean_session(true);
        if self.transport == TransportKind::Websocket {
            options.set_transport(Transport::Ws);
        }
        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = BusConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 1883);
        assert_eq!(config.transport, TransportKind::Tcp);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: BusConfig = toml::from_str(
            r#"
            host = "broker.plant.local"
            username = "dashboard"
            password = "secret"
            "#,
        )
        .expect("partial config should parse");

        assert_eq!(config.host, "broker.plant.local");
        assert_eq!(config.username.as_deref(), Some("dashboard"));
        assert_eq!(config.port, 1883);
        assert_eq!(config.keep_alive_secs, 5);
    }

    #[test]
    fn websocket_transport_parses() {
        let config: BusConfig = toml::from_str(
            r#"
            host = "ws://broker.plant.local:9001/mqtt"
            transport = "websocket"
            "#,
        )
        .expect("websocket config should parse");
        assert_eq!(config.transport, TransportKind::Websocket);
    }

    #[test]
    fn empty_host_is_rejected() {
        let config = BusConfig {
            host: "  ".to_string(),
            ..BusConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BusError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn zero_reconnect_period_is_rejected() {
        let config = BusConfig {
            reconnect_period_ms: 0,
            ..BusConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let path = std::env::temp_dir().join("facilitybus-broken-config.toml");
        std::fs::write(&path, "host = [not toml").expect("write temp config");
        let result = BusConfig::from_file(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(BusError::ConfigParse(_))));
    }

    #[test]
    fn config_file_round_trips() {
        let config = BusConfig {
            host: "broker.plant.local".to_string(),
            client_id: "panel-7".to_string(),
            ..BusConfig::default()
        };
        let path = std::env::temp_dir().join("facilitybus-roundtrip-config.toml");
        let serialized = toml::to_string_pretty(&config).expect("serialize config");
        std::fs::write(&path, serialized).expect("write temp config");
        let loaded = BusConfig::from_file(&path).expect("reload config");
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, config);
    }
}
