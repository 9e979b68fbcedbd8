//! Configuration file – reads/writes `~/.rigbridge/config.toml`.
//!
//! Precedence, lowest first: built-in defaults, the config file,
//! `RIGBRIDGE_*` environment variables, command-line flags.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rigbridge_hal::{Handshake, Parity, RadioSettings, SerialSettings};
use rigbridge_kernel::ShutdownTimings;
use rigbridge_middleware::TransportSettings;
use rigbridge_types::{RigError, TopicSet};

/// Client id that gets a random suffix so several bridges can share a
/// broker without kicking each other off.
pub const DEFAULT_CLIENT_ID: &str = "rigbridge-svr";

/// Persisted configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub radio: RadioConfig,
    pub timing: TimingConfig,
}

/// Broker connection and topic identity.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MqttConfig {
    pub broker_url: String,
    pub broker_port: u16,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    /// Stored as plain text; the file is written owner-only.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    pub client_id: String,
    /// Station callsign.
    pub station: String,
    pub radio: String,
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("broker_url", &self.broker_url)
            .field("broker_port", &self.broker_port)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("client_id", &self.client_id)
            .field("station", &self.station)
            .field("radio", &self.radio)
            .finish()
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_url: "test.mosquitto.org".to_string(),
            broker_port: 1883,
            username: String::new(),
            password: String::new(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            station: "mystation".to_string(),
            radio: "myradio".to_string(),
        }
    }
}

/// Transceiver link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RadioConfig {
    pub rig_model: u32,
    pub baudrate: u32,
    pub portname: String,
    pub databits: u8,
    pub stopbits: u8,
    pub parity: String,
    pub handshake: String,
    /// 0 disables meter polling.
    pub polling_interval_ms: u64,
    /// 0 disables full state sync.
    pub sync_interval_ms: u64,
    /// 0 = errors only ... 5 = trace.
    pub hl_debug_level: u8,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            rig_model: 1,
            baudrate: 38400,
            portname: "/dev/mhux/cat".to_string(),
            databits: 8,
            stopbits: 1,
            parity: "none".to_string(),
            handshake: "none".to_string(),
            polling_interval_ms: 100,
            sync_interval_ms: 3000,
            hl_debug_level: 0,
        }
    }
}

/// Startup and shutdown timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TimingConfig {
    pub device_start_delay_ms: u64,
    pub pre_announce_grace_us: u64,
    pub post_announce_grace_ms: u64,
    pub exit_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            device_start_delay_ms: 500,
            pre_announce_grace_us: 200,
            post_announce_grace_ms: 100,
            exit_timeout_ms: 1000,
        }
    }
}

impl Config {
    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<(), RigError> {
        for (name, value) in [("station", &self.mqtt.station), ("radio", &self.mqtt.radio)] {
            if value.is_empty() || value.contains(['/', '+', '#']) {
                return Err(RigError::Config(format!(
                    "{name} must be a non-empty topic level, got {value:?}"
                )));
            }
        }
        if self.mqtt.broker_port == 0 {
            return Err(RigError::Config("broker port must not be 0".to_string()));
        }
        if self.radio.hl_debug_level > 5 {
            return Err(RigError::Config(format!(
                "debug level {} out of range 0..=5",
                self.radio.hl_debug_level
            )));
        }
        Ok(())
    }

    pub fn topics(&self) -> TopicSet {
        TopicSet::new(&self.mqtt.station, &self.mqtt.radio)
    }

    /// Broker settings with the client id resolved.  Subscriptions and the
    /// Last-Will are added by the bridge.
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            broker_url: self.mqtt.broker_url.clone(),
            broker_port: self.mqtt.broker_port,
            client_id: resolve_client_id(&self.mqtt.client_id),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
            topics: Vec::new(),
            last_will: None,
        }
    }

    pub fn radio_settings(&self) -> RadioSettings {
        let r = &self.radio;
        RadioSettings {
            serial: SerialSettings {
                rig_model: r.rig_model,
                portname: r.portname.clone(),
                baudrate: r.baudrate,
                databits: r.databits,
                stopbits: r.stopbits,
                parity: Parity::from_name(&r.parity),
                handshake: Handshake::from_name(&r.handshake),
            },
            polling_interval: Duration::from_millis(r.polling_interval_ms),
            sync_interval: Duration::from_millis(r.sync_interval_ms),
            debug_level: r.hl_debug_level,
        }
    }

    pub fn timings(&self) -> ShutdownTimings {
        ShutdownTimings {
            pre_announce_grace: Duration::from_micros(self.timing.pre_announce_grace_us),
            post_announce_grace: Duration::from_millis(self.timing.post_announce_grace_ms),
            exit_timeout: Duration::from_millis(self.timing.exit_timeout_ms),
        }
    }

    pub fn device_start_delay(&self) -> Duration {
        Duration::from_millis(self.timing.device_start_delay_ms)
    }
}

/// The default client id gets a `-xxxxx` suffix; any other id is used as
/// given.
pub fn resolve_client_id(client_id: &str) -> String {
    if client_id != DEFAULT_CLIENT_ID {
        return client_id.to_string();
    }
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(5).collect();
    format!("{client_id}-{suffix}")
}

/// Return the path to `~/.rigbridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rigbridge").join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, RigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        RigError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| RigError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `RIGBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RIGBRIDGE_BROKER_URL` | `mqtt.broker-url` |
/// | `RIGBRIDGE_BROKER_PORT` | `mqtt.broker-port` |
/// | `RIGBRIDGE_USERNAME` | `mqtt.username` |
/// | `RIGBRIDGE_PASSWORD` | `mqtt.password` |
/// | `RIGBRIDGE_CLIENT_ID` | `mqtt.client-id` |
/// | `RIGBRIDGE_STATION` | `mqtt.station` |
/// | `RIGBRIDGE_RADIO` | `mqtt.radio` |
/// | `RIGBRIDGE_PORTNAME` | `radio.portname` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let m = &mut cfg.mqtt;
    for (key, field) in [
        ("RIGBRIDGE_BROKER_URL", &mut m.broker_url),
        ("RIGBRIDGE_USERNAME", &mut m.username),
        ("RIGBRIDGE_PASSWORD", &mut m.password),
        ("RIGBRIDGE_CLIENT_ID", &mut m.client_id),
        ("RIGBRIDGE_STATION", &mut m.station),
        ("RIGBRIDGE_RADIO", &mut m.radio),
    ] {
        if let Some(v) = lookup(key) {
            *field = v;
        }
    }
    if let Some(v) = lookup("RIGBRIDGE_BROKER_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        m.broker_port = port;
    }
    if let Some(v) = lookup("RIGBRIDGE_PORTNAME") {
        cfg.radio.portname = v;
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), RigError> {
    let io_err = |what: &str, e: std::io::Error| RigError::Config(format!("{what}: {e}"));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("failed to create config directory", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("failed to set config directory permissions", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| RigError::Config(format!("failed to serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| io_err(&format!("failed to write config at {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| io_err(&format!("failed to write config at {}", path.display()), e))?;
    Ok(())
}
