use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Full settings snapshot. Replaced wholesale on every detected change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub bus: BusSettings,
    pub serial: SerialSettings,
    pub behavior: BehaviorFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub enabled: bool,
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub connect_timeout_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            topic_prefix: "meshcore".to_string(),
            client_id: "meshcore_bridge".to_string(),
            keep_alive_secs: 60,
            connect_timeout_ms: 5_000,
        }
    }
}

impl BusSettings {
    /// Username and password, only when both are set and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let username = self.username.as_deref().filter(|value| !value.is_empty())?;
        let password = self.password.as_deref().filter(|value| !value.is_empty())?;
        Some((username, password))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub enabled: bool,
    pub device: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            device: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorFlags {
    pub auto_acknowledge: bool,
    pub store_packets: bool,
    pub forward_to_mqtt: bool,
}

impl Default for BehaviorFlags {
    fn default() -> Self {
        Self { auto_acknowledge: true, store_packets: true, forward_to_mqtt: true }
    }
}

impl BridgeConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Snapshot from the process environment with both channels enabled.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.serial.enabled = true;
        config.bus.enabled = true;

        if let Some(device) = lookup("SERIAL_PORT") {
            config.serial.device = device;
        }
        if let Some(baud) = lookup("SERIAL_BAUD") {
            config.serial.baud_rate = parse_number("SERIAL_BAUD", baud)?;
        }
        if let Some(broker) = lookup("MQTT_BROKER") {
            config.bus.broker = broker;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            config.bus.port = parse_number("MQTT_PORT", port)?;
        }
        config.bus.username = lookup("MQTT_USERNAME");
        config.bus.password = lookup("MQTT_PASSWORD");
        if let Some(prefix) = lookup("MQTT_TOPIC_PREFIX") {
            config.bus.topic_prefix = prefix;
        }
        Ok(config)
    }

    /// Settings that force the serial link to reconnect when they change.
    pub fn serial_settings(&self) -> &SerialSettings {
        &self.serial
    }

    /// Settings that force the bus session to reconnect when they change.
    pub fn bus_settings(&self) -> &BusSettings {
        &self.bus
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue { key, value })
}

/// Connection flags reported back to whoever manages the configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub serial_connected: bool,
    pub mqtt_connected: bool,
    #[serde(default)]
    pub updated_unix_ms: u64,
}

impl ConnectionStatus {
    fn apply(&mut self, serial_connected: Option<bool>, mqtt_connected: Option<bool>) {
        if let Some(connected) = serial_connected {
            self.serial_connected = connected;
        }
        if let Some(connected) = mqtt_connected {
            self.mqtt_connected = connected;
        }
        self.updated_unix_ms = now_unix_ms();
    }
}

/// Source of configuration snapshots and sink for connection status.
pub trait ConfigStore: Send {
    /// Current snapshot. Implementations fall back to defaults rather than fail.
    fn load(&mut self) -> BridgeConfig;

    /// Whether the persisted settings differ from the last `load`.
    fn has_changed(&mut self) -> bool;

    /// Record connection status. `None` leaves a flag untouched.
    fn update_status(&mut self, serial_connected: Option<bool>, mqtt_connected: Option<bool>);
}

impl<T: ConfigStore + ?Sized> ConfigStore for Box<T> {
    fn load(&mut self) -> BridgeConfig {
        (**self).load()
    }

    fn has_changed(&mut self) -> bool {
        (**self).has_changed()
    }

    fn update_status(&mut self, serial_connected: Option<bool>, mqtt_connected: Option<bool>) {
        (**self).update_status(serial_connected, mqtt_connected)
    }
}

/// TOML file store. The file modification time is the change fingerprint.
pub struct FileConfigStore {
    path: PathBuf,
    status_path: PathBuf,
    fingerprint: Option<SystemTime>,
    status: ConnectionStatus,
}

impl FileConfigStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let mut status_path = path.clone().into_os_string();
        status_path.push(".status.json");
        Self {
            path,
            status_path: PathBuf::from(status_path),
            fingerprint: None,
            status: ConnectionStatus::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|meta| meta.modified()).ok()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&mut self) -> BridgeConfig {
        self.fingerprint = self.modified();
        match BridgeConfig::from_path(&self.path) {
            Ok(config) => config,
            Err(err) => {
                log::error!("config: failed to load path={} err={}", self.path.display(), err);
                log::warn!("config: using default configuration");
                BridgeConfig::default()
            }
        }
    }

    fn has_changed(&mut self) -> bool {
        match self.modified() {
            Some(modified) => Some(modified) != self.fingerprint,
            None => {
                log::debug!("config: cannot stat path={}", self.path.display());
                false
            }
        }
    }

    fn update_status(&mut self, serial_connected: Option<bool>, mqtt_connected: Option<bool>) {
        if serial_connected.is_none() && mqtt_connected.is_none() {
            return;
        }
        self.status.apply(serial_connected, mqtt_connected);
        if let Err(err) = persist_status_atomically(&self.status_path, &self.status) {
            log::error!("config: failed to update connection status: {}", err);
        }
    }
}

/// Fixed snapshot, e.g. built from the environment. Never changes.
pub struct StaticConfigStore {
    config: BridgeConfig,
    status: ConnectionStatus,
}

impl StaticConfigStore {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config, status: ConnectionStatus::default() }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }
}

impl ConfigStore for StaticConfigStore {
    fn load(&mut self) -> BridgeConfig {
        self.config.clone()
    }

    fn has_changed(&mut self) -> bool {
        false
    }

    fn update_status(&mut self, serial_connected: Option<bool>, mqtt_connected: Option<bool>) {
        self.status.apply(serial_connected, mqtt_connected);
    }
}

pub fn read_status(path: &Path) -> Result<ConnectionStatus, String> {
    let bytes = fs::read(path)
        .map_err(|err| format!("failed to read status {}: {err}", path.display()))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| format!("failed to parse status {}: {err}", path.display()))
}

fn persist_status_atomically(path: &Path, status: &ConnectionStatus) -> Result<(), String> {
    let tmp_path = path.with_extension("tmp");
    let payload = serde_json::to_vec_pretty(status)
        .map_err(|err| format!("failed to serialize status {}: {err}", path.display()))?;

    let mut file = fs::File::create(&tmp_path)
        .map_err(|err| format!("failed to create tmp status {}: {err}", tmp_path.display()))?;
    file.write_all(&payload)
        .map_err(|err| format!("failed to write tmp status {}: {err}", tmp_path.display()))?;
    file.sync_all()
        .map_err(|err| format!("failed to fsync tmp status {}: {err}", tmp_path.display()))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|err| {
        format!("failed to replace status {} from {}: {err}", path.display(), tmp_path.display())
    })
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
