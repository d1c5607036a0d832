//! # Ground Station Configuration
//!
//! Configuration management for the broker session and telemetry pulls.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     DRONELINK_BROKER_HOST=broker.example.com                           │
//! │     DRONELINK_DEVICE_ID=drone-007                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/dronelink/dronelink.toml (Linux)                         │
//! │     ~/Library/Application Support/io.dronelink.dronelink/... (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     wss://localhost:8884/mqtt, device drone-001                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [broker]
//! host = "broker.example.com"
//! port = 8884
//! path = "/mqtt"
//! username = "ground"
//! password = "secret"
//! tls = "strict"        # strict | insecure | disabled
//!
//! [device]
//! id = "drone-001"
//!
//! [transfer]
//! timeout_secs = 16.0
//! online_window_secs = 11.0
//! preview_last = 50
//!
//! [store]
//! data_file = "drone_data.csv"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use dronelink_core::{
    DEFAULT_ONLINE_WINDOW_SECS, DEFAULT_PREVIEW_LAST, DEFAULT_TRANSFER_TIMEOUT_SECS,
};

use crate::error::{SyncError, SyncResult};
use crate::protocol::Topics;
use crate::transport::{ConnectOptions, TlsMode};

// =============================================================================
// Broker Settings
// =============================================================================

/// Where and how to reach the pub/sub broker.
#[derive(Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Websocket path on the broker.
    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default)]
    pub username: Option<String>,

    /// Never logged. Debug output redacts it.
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub tls: TlsMode,

    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// Client ids are `<prefix>-<uuid>`.
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8884
}

fn default_path() -> String {
    "/mqtt".to_string()
}

fn default_keepalive() -> u64 {
    60
}

fn default_client_id_prefix() -> String {
    "dronelink-gs".to_string()
}

impl Default for BrokerSettings {
    fn default() -> Self {
        BrokerSettings {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            username: None,
            password: None,
            tls: TlsMode::default(),
            keepalive_secs: default_keepalive(),
            client_id_prefix: default_client_id_prefix(),
        }
    }
}

impl std::fmt::Debug for BrokerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("keepalive_secs", &self.keepalive_secs)
            .field("client_id_prefix", &self.client_id_prefix)
            .finish()
    }
}

impl BrokerSettings {
    /// Builds `wss://host:port/path` (`ws://` when TLS is disabled).
    pub fn url(&self) -> SyncResult<Url> {
        let scheme = match self.tls {
            TlsMode::Disabled => "ws",
            TlsMode::Strict | TlsMode::Insecure => "wss",
        };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        let url = Url::parse(&format!("{}://{}:{}{}", scheme, self.host, self.port, path))?;
        Ok(url)
    }

    /// A fresh client id for one session.
    pub fn new_client_id(&self) -> String {
        format!("{}-{}", self.client_id_prefix, Uuid::new_v4().simple())
    }
}

// =============================================================================
// Device Settings
// =============================================================================

/// Identifies the drone whose topics we use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default = "default_device_id")]
    pub id: String,
}

fn default_device_id() -> String {
    "drone-001".to_string()
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            id: default_device_id(),
        }
    }
}

// =============================================================================
// Transfer Settings
// =============================================================================

/// Timeouts and sizes for log transfers and incremental syncs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Seconds since the request before a full transfer times out.
    #[serde(default = "default_transfer_timeout")]
    pub timeout_secs: f64,

    /// Max gap between the last two heartbeats for "online".
    #[serde(default = "default_online_window")]
    pub online_window_secs: f64,

    /// Records requested per incremental sync.
    #[serde(default = "default_preview_last")]
    pub preview_last: u32,

    /// Seconds to wait for `preview_done` before finishing a sync anyway.
    #[serde(default = "default_transfer_timeout")]
    pub sync_timeout_secs: f64,
}

fn default_transfer_timeout() -> f64 {
    DEFAULT_TRANSFER_TIMEOUT_SECS
}

fn default_online_window() -> f64 {
    DEFAULT_ONLINE_WINDOW_SECS
}

fn default_preview_last() -> u32 {
    DEFAULT_PREVIEW_LAST
}

impl Default for TransferSettings {
    fn default() -> Self {
        TransferSettings {
            timeout_secs: default_transfer_timeout(),
            online_window_secs: default_online_window(),
            preview_last: default_preview_last(),
            sync_timeout_secs: default_transfer_timeout(),
        }
    }
}

// =============================================================================
// Session Settings
// =============================================================================

/// Reconnect and scheduling behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Initial backoff duration (milliseconds) for reconnection.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (seconds) for reconnection.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Maximum reconnection attempts before giving up.
    /// Set to 0 for infinite retries.
    #[serde(default)]
    pub max_retries: u32,

    /// Bounded time slice for each transport poll (milliseconds).
    #[serde(default = "default_pump_slice")]
    pub pump_slice_ms: u64,

    /// Capacity of each handoff queue in the background worker.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    60
}

fn default_pump_slice() -> u64 {
    50
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_retries: 0,
            pump_slice_ms: default_pump_slice(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl SessionSettings {
    pub fn pump_slice(&self) -> Duration {
        Duration::from_millis(self.pump_slice_ms)
    }
}

// =============================================================================
// Store Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
}

fn default_data_file() -> PathBuf {
    PathBuf::from("drone_data.csv")
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            data_file: default_data_file(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete ground station configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DronelinkConfig {
    #[serde(default)]
    pub broker: BrokerSettings,

    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub transfer: TransferSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub store: StoreSettings,
}

impl DronelinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (dronelink.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }
        if self.device.id.contains(['/', '+', '#']) {
            return Err(SyncError::InvalidConfig(format!(
                "device id may not contain topic separators or wildcards: {}",
                self.device.id
            )));
        }
        if self.broker.host.trim().is_empty() {
            return Err(SyncError::InvalidConfig("broker host is empty".into()));
        }
        if self.broker.port == 0 {
            return Err(SyncError::InvalidConfig("broker port must be non-zero".into()));
        }
        if self.broker.password.is_some() && self.broker.username.is_none() {
            return Err(SyncError::InvalidConfig(
                "broker password set without a username".into(),
            ));
        }
        positive("transfer.timeout_secs", self.transfer.timeout_secs)?;
        positive("transfer.online_window_secs", self.transfer.online_window_secs)?;
        positive("transfer.sync_timeout_secs", self.transfer.sync_timeout_secs)?;
        if self.transfer.preview_last == 0 {
            return Err(SyncError::InvalidConfig(
                "transfer.preview_last must be greater than 0".into(),
            ));
        }
        if self.session.queue_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "session.queue_capacity must be greater than 0".into(),
            ));
        }

        self.broker.url()?;
        Ok(())
    }

    /// Applies `DRONELINK_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DRONELINK_BROKER_HOST") {
            debug!(host = %host, "Overriding broker host from environment");
            self.broker.host = host;
        }

        if let Some(port) = lookup("DRONELINK_BROKER_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.broker.port = p,
                Err(_) => warn!(port = %port, "Ignoring invalid broker port in environment"),
            }
        }

        if let Some(path) = lookup("DRONELINK_BROKER_PATH") {
            self.broker.path = path;
        }

        if let Some(user) = lookup("DRONELINK_BROKER_USERNAME") {
            self.broker.username = Some(user);
        }

        if let Some(pass) = lookup("DRONELINK_BROKER_PASSWORD") {
            debug!("Overriding broker password from environment");
            self.broker.password = Some(pass);
        }

        // Only toggles certificate checks; a plain ws:// broker stays plain.
        if let Some(flag) = lookup("DRONELINK_TLS_INSECURE") {
            let insecure = match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" => Some(true),
                "0" | "false" | "no" => Some(false),
                _ => {
                    warn!(value = %flag, "Unknown TLS flag in environment");
                    None
                }
            };
            match (insecure, self.broker.tls) {
                (Some(_), TlsMode::Disabled) => {
                    debug!("TLS is disabled, ignoring DRONELINK_TLS_INSECURE");
                }
                (Some(true), _) => self.broker.tls = TlsMode::Insecure,
                (Some(false), _) => self.broker.tls = TlsMode::Strict,
                (None, _) => {}
            }
        }

        if let Some(id) = lookup("DRONELINK_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Some(file) = lookup("DRONELINK_DATA_FILE") {
            self.store.data_file = PathBuf::from(file);
        }

        if let Some(secs) = lookup("DRONELINK_TRANSFER_TIMEOUT_SECS") {
            match secs.parse::<f64>() {
                Ok(s) => self.transfer.timeout_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid transfer timeout in environment"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "dronelink", "dronelink")
            .map(|dirs| dirs.config_dir().join("dronelink.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn topics(&self) -> Topics {
        Topics::for_device(&self.device.id)
    }

    /// Options for one connection attempt, with a new client id.
    pub fn connect_options(&self) -> SyncResult<ConnectOptions> {
        Ok(ConnectOptions {
            url: self.broker.url()?,
            client_id: self.broker.new_client_id(),
            username: self.broker.username.clone(),
            password: self.broker.password.clone(),
            keepalive: Duration::from_secs(self.broker.keepalive_secs),
            tls: self.broker.tls,
        })
    }
}

fn positive(field: &str, value: f64) -> SyncResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SyncError::InvalidConfig(format!(
            "{} must be a positive number, got {}",
            field, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = DronelinkConfig::default();
        assert_eq!(config.broker.port, 8884);
        assert_eq!(config.device.id, "drone-001");
        assert_eq!(config.transfer.timeout_secs, 16.0);
        assert_eq!(config.transfer.online_window_secs, 11.0);
        assert_eq!(config.store.data_file, PathBuf::from("drone_data.csv"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_broker_url() {
        let mut broker = BrokerSettings {
            host: "broker.example.com".into(),
            ..BrokerSettings::default()
        };
        assert_eq!(broker.url().unwrap().as_str(), "wss://broker.example.com:8884/mqtt");

        broker.tls = TlsMode::Disabled;
        broker.path = "ws".into();
        assert_eq!(broker.url().unwrap().as_str(), "ws://broker.example.com:8884/ws");
    }

    #[test]
    fn test_client_id_is_unique() {
        let broker = BrokerSettings::default();
        let a = broker.new_client_id();
        let b = broker.new_client_id();
        assert!(a.starts_with("dronelink-gs-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_config_validation() {
        let mut config = DronelinkConfig::default();

        config.device.id = String::new();
        assert!(matches!(config.validate(), Err(SyncError::MissingDeviceId)));

        config.device.id = "drone/1".into();
        assert!(config.validate().unwrap_err().is_config_error());

        config.device.id = "drone-1".into();
        config.transfer.timeout_secs = 0.0;
        assert!(config.validate().is_err());

        config.transfer.timeout_secs = 16.0;
        config.broker.password = Some("secret".into());
        assert!(config.validate().is_err());

        config.broker.username = Some("ground".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DRONELINK_BROKER_HOST", "10.0.0.5"),
            ("DRONELINK_BROKER_PORT", "9001"),
            ("DRONELINK_DEVICE_ID", "drone-042"),
            ("DRONELINK_TLS_INSECURE", "true"),
            ("DRONELINK_TRANSFER_TIMEOUT_SECS", "30"),
        ]
        .into_iter()
        .collect();

        let mut config = DronelinkConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.broker.host, "10.0.0.5");
        assert_eq!(config.broker.port, 9001);
        assert_eq!(config.device.id, "drone-042");
        assert_eq!(config.broker.tls, TlsMode::Insecure);
        assert_eq!(config.transfer.timeout_secs, 30.0);
        assert_eq!(config.topics().cmd, "drone/drone-042/cmd");
    }

    #[test]
    fn test_tls_flag_keeps_plain_websocket() {
        for flag in ["0", "true"] {
            let mut config = DronelinkConfig::default();
            config.broker.tls = TlsMode::Disabled;
            config.apply_overrides(|k| (k == "DRONELINK_TLS_INSECURE").then(|| flag.to_string()));
            assert_eq!(config.broker.tls, TlsMode::Disabled);
            assert!(config.broker.url().unwrap().as_str().starts_with("ws://"));
        }

        let mut config = DronelinkConfig::default();
        config.broker.tls = TlsMode::Insecure;
        config.apply_overrides(|k| (k == "DRONELINK_TLS_INSECURE").then(|| "no".to_string()));
        assert_eq!(config.broker.tls, TlsMode::Strict);
    }

    #[test]
    fn test_invalid_override_is_ignored() {
        let mut config = DronelinkConfig::default();
        config.apply_overrides(|k| (k == "DRONELINK_BROKER_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.broker.port, 8884);
    }

    #[test]
    fn test_password_is_redacted() {
        let broker = BrokerSettings {
            username: Some("ground".into()),
            password: Some("hunter2".into()),
            ..BrokerSettings::default()
        };
        let debug = format!("{:?}", broker);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_toml_roundtrip_and_partial_file() {
        let config = DronelinkConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[broker]"));
        assert!(toml_str.contains("[transfer]"));

        let partial: DronelinkConfig = toml::from_str("[device]\nid = \"drone-9\"\n").unwrap();
        assert_eq!(partial.device.id, "drone-9");
        assert_eq!(partial.broker.port, 8884);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dronelink.toml");
        std::fs::write(
            &path,
            "[broker]\nhost = \"broker.local\"\ntls = \"disabled\"\n[store]\ndata_file = \"log.csv\"\n",
        )
        .unwrap();

        let mut config: DronelinkConfig =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.broker.url().unwrap().scheme(), "ws");
        assert_eq!(config.store.data_file, PathBuf::from("log.csv"));

        config.device.id = "drone-2".into();
        let saved = dir.path().join("out").join("dronelink.toml");
        config.save(Some(saved.clone())).unwrap();
        assert!(std::fs::read_to_string(saved).unwrap().contains("drone-2"));
    }

    #[test]
    fn test_connect_options() {
        let config = DronelinkConfig::default();
        let opts = config.connect_options().unwrap();
        assert_eq!(opts.keepalive, Duration::from_secs(60));
        assert_eq!(opts.tls, TlsMode::Strict);
    }
}
