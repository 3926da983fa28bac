//! Runtime configuration of the fleet server.
//!
//! Bounded identifiers use `heapless::String`; the whole tree derives serde
//! so a deployment can be described in one JSON file. Every section has
//! defaults and `with_*` builders.
//!
//! # Example
//!
//! ```rust
//! use rs_trainz_fleet::config::{Config, MqttConfig, SupervisionConfig};
//!
//! let config = Config::default()
//!     .with_mqtt(MqttConfig::default().with_host("192.168.1.100"))
//!     .with_supervision(SupervisionConfig::default().with_max_missed_pings(5));
//!
//! assert_eq!(config.mqtt.topic("reboot/dec-1").as_str(), "/trains/reboot/dec-1");
//!
//! let parsed = Config::from_json_str(r#"{"web": {"port": 3000}}"#).unwrap();
//! assert_eq!(parsed.web.port, 3000);
//! assert_eq!(parsed.mqtt.port, 1883);
//! ```

use std::path::Path;

use heapless::String as HString;
use serde::{Deserialize, Serialize};

/// Capacity of hostnames, client ids and credentials.
pub const MAX_SHORT_STRING: usize = 64;

/// Capacity of topic roots and file paths.
pub const MAX_LONG_STRING: usize = 128;

/// Bounded string for short settings.
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Bounded string for roots and paths.
pub type LongString = HString<MAX_LONG_STRING>;

// ============================================================================
// Bounded strings
// ============================================================================

fn truncate_into<const N: usize>(s: &str) -> HString<N> {
    let mut hs = HString::new();
    let end = s
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|end| *end <= N)
        .last()
        .unwrap_or(0);
    let _ = hs.push_str(&s[..end]);
    hs
}

/// Copies `s`, cut at the last char boundary that fits.
pub fn short_string(s: &str) -> ShortString {
    truncate_into(s)
}

/// Copies `s`, cut at the last char boundary that fits.
pub fn long_string(s: &str) -> LongString {
    truncate_into(s)
}

/// Failure to load a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// The file could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid JSON for [`Config`].
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
    /// A numeric setting is outside its accepted range.
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        /// Setting name as written in the file.
        field: &'static str,
        /// Value read.
        value: u32,
        /// Smallest accepted value.
        min: u32,
        /// Largest accepted value.
        max: u32,
    },
}

// ============================================================================
// Top level
// ============================================================================

/// Everything the server reads at startup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection and topic root
    pub mqtt: MqttConfig,
    /// Decoder supervision defaults
    pub supervision: SupervisionConfig,
    /// REST server configuration
    pub web: WebConfig,
    /// Server identity and startup
    pub server: ServerConfig,
}

impl Config {
    /// Parses a JSON document; missing sections keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigLoadError> {
        let config: Self = serde_json::from_str(json)?;
        config.supervision.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Replaces the broker section
    pub fn with_mqtt(mut self, mqtt: MqttConfig) -> Self {
        self.mqtt = mqtt;
        self
    }

    /// Replaces the supervision section
    pub fn with_supervision(mut self, supervision: SupervisionConfig) -> Self {
        self.supervision = supervision;
        self
    }

    /// Replaces the REST section
    pub fn with_web(mut self, web: WebConfig) -> Self {
        self.web = web;
        self
    }

    /// Replaces the server section
    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }
}

// ============================================================================
// Broker
// ============================================================================

/// Connection to the broker the decoders talk to.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker address
    pub host: ShortString,
    /// Broker TCP port
    pub port: u16,
    /// Client ID
    pub client_id: ShortString,
    /// Root of every decoder topic (e.g., "/trains/")
    pub topic_root: LongString,
    /// Login name, empty for anonymous sessions
    pub username: ShortString,
    /// Login secret
    pub password: ShortString,
    /// Broker session keep-alive, seconds
    pub keep_alive_secs: u16,
    /// Connect at startup
    pub enabled: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: short_string("localhost"),
            port: 1883,
            client_id: short_string("rs-trainz-fleet"),
            topic_root: long_string(crate::protocol::DEFAULT_ROOT),
            username: ShortString::new(),
            password: ShortString::new(),
            keep_alive_secs: 30,
            enabled: true,
        }
    }
}

impl MqttConfig {
    /// Broker address
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = short_string(host);
        self
    }

    /// Broker TCP port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Session client id
    pub fn with_client_id(mut self, id: &str) -> Self {
        self.client_id = short_string(id);
        self
    }

    /// Prefix of every decoder topic
    pub fn with_topic_root(mut self, root: &str) -> Self {
        self.topic_root = long_string(root);
        self
    }

    /// Login credentials
    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.username = short_string(username);
        self.password = short_string(password);
        self
    }

    /// Connect at startup or not
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// `suffix` joined to the topic root
    pub fn topic(&self, suffix: &str) -> LongString {
        let mut topic = LongString::new();
        let _ = topic.push_str(self.topic_root.as_str());
        if !self.topic_root.ends_with('/') {
            let _ = topic.push('/');
        }
        let _ = topic.push_str(suffix);
        topic
    }

    /// Topic scheme for the fleet core.
    pub fn topics(&self) -> crate::protocol::Topics {
        crate::protocol::Topics::new(self.topic_root.as_str())
    }

    /// Whether a login name is set
    pub fn has_auth(&self) -> bool {
        !self.username.is_empty()
    }
}

// ============================================================================
// Supervision Config
// ============================================================================

/// Defaults seeded into newly created decoders.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisionConfig {
    /// Keep-alive period in milliseconds
    pub keep_alive_period_ms: u32,
    /// Missed pings before a decoder is considered lost
    pub max_missed_pings: u32,
    /// How often the service checks supervision deadlines
    pub poll_interval_ms: u32,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            keep_alive_period_ms: 1000,
            max_missed_pings: 3,
            poll_interval_ms: 100,
        }
    }
}

impl SupervisionConfig {
    /// Set the keep-alive period
    pub fn with_keep_alive_period_ms(mut self, ms: u32) -> Self {
        self.keep_alive_period_ms = ms;
        self
    }

    /// Set the missed ping threshold
    pub fn with_max_missed_pings(mut self, max: u32) -> Self {
        self.max_missed_pings = max;
        self
    }

    /// Set the deadline polling interval
    pub fn with_poll_interval_ms(mut self, ms: u32) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Checks each value against the range its decoder attribute accepts.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        check_range("keep_alive_period_ms", self.keep_alive_period_ms, 100, 60_000)?;
        check_range("max_missed_pings", self.max_missed_pings, 1, 100)?;
        check_range("poll_interval_ms", self.poll_interval_ms, 1, 60_000)
    }
}

fn check_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), ConfigLoadError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigLoadError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

// ============================================================================
// REST
// ============================================================================

/// Operator REST endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Listen port
    pub port: u16,
    /// Allow any origin
    pub cors_permissive: bool,
    /// Serve the API at startup
    pub enabled: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            cors_permissive: true,
            enabled: true,
        }
    }
}

impl WebConfig {
    /// Listen port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Origin policy
    pub fn with_cors(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }

    /// Serve the API or not
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

// ============================================================================
// Server Config
// ============================================================================

/// Server identity and startup options
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Human-readable server name
    pub name: ShortString,
    /// Decoder configuration document loaded at startup (empty = none)
    pub decoders_file: LongString,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: short_string("rs-trainz-fleet"),
            decoders_file: LongString::new(),
        }
    }
}

impl ServerConfig {
    /// Set the server name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = short_string(name);
        self
    }

    /// Set the startup configuration document
    pub fn with_decoders_file(mut self, path: &str) -> Self {
        self.decoders_file = long_string(path);
        self
    }

    /// Startup document path, if configured
    pub fn decoders_file(&self) -> Option<&str> {
        Some(self.decoders_file.as_str()).filter(|p| !p.is_empty())
    }
}

// ============================================================================
// Tests
// ============================================================================
