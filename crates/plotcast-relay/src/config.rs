//! Configuration loading for the relay.
//!
//! The configuration lives in `plotcast-config.yaml` (or the file named by
//! `PLOTCAST_CONFIG`). Every field has a default, so a missing file or a
//! partial one is fine.

use std::path::Path;
use std::time::Duration;

use plotcast_fanout::UnregisteredAuthPolicy;
use plotcast_server::ServerConfig;
use serde::Deserialize;

/// Config file used when `PLOTCAST_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "plotcast-config.yaml";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        #[from]
        source: serde_yml::Error,
    },

    /// An environment override had an unusable value.
    #[error("invalid value {value:?} for {var}")]
    InvalidOverride {
        /// The environment variable.
        var: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Top-level relay configuration. Mirrors `plotcast-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RelayConfig {
    /// Bus addresses and timing.
    #[serde(default)]
    pub bus: BusConfig,

    /// HTTP listen address.
    #[serde(default)]
    pub server: ServerSection,

    /// Fanout sizing and auth policy.
    #[serde(default)]
    pub fanout: FanoutConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelayConfig {
    /// Load configuration from a YAML file and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::InvalidOverride`] for a bad environment value.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string and apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Override fields from `PLOTCAST_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] for a value that does not
    /// parse.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Override fields from any variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] for a value that does not
    /// parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("PLOTCAST_BUS_INPUT") {
            self.bus.input = val;
        }
        if let Some(val) = lookup("PLOTCAST_BUS_OUTPUT") {
            self.bus.output = val;
        }
        if let Some(val) = lookup("PLOTCAST_PORT") {
            self.server.port = val.parse().map_err(|_invalid| ConfigError::InvalidOverride {
                var: "PLOTCAST_PORT",
                value: val.clone(),
            })?;
        }
        if let Some(val) = lookup("PLOTCAST_UNREGISTERED_AUTH") {
            self.fanout.unregistered_auth =
                val.parse().map_err(|_invalid| ConfigError::InvalidOverride {
                    var: "PLOTCAST_UNREGISTERED_AUTH",
                    value: val.clone(),
                })?;
        }
        Ok(())
    }
}

/// Bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BusConfig {
    /// Forwarder input address publishers connect to.
    #[serde(default = "default_bus_input")]
    pub input: String,

    /// Forwarder output address subscribers connect to.
    #[serde(default = "default_bus_output")]
    pub output: String,

    /// Run the forwarder in this process. When false, another process
    /// owns the forwarder and this one only subscribes.
    #[serde(default = "default_true")]
    pub run_forwarder: bool,

    /// Extra forwarder outputs to subscribe to besides `output`.
    #[serde(default)]
    pub extra_outputs: Vec<String>,

    /// How often the subscriber checks its stop flag.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay between bus reconnect attempts.
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_ms: u64,
}

impl BusConfig {
    /// Every address the subscriber connects to.
    pub fn subscribe_addrs(&self) -> Vec<String> {
        std::iter::once(self.output.clone())
            .chain(self.extra_outputs.iter().cloned())
            .collect()
    }

    /// [`poll_interval_ms`](Self::poll_interval_ms) as a duration.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// [`reconnect_ms`](Self::reconnect_ms) as a duration.
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            input: default_bus_input(),
            output: default_bus_output(),
            run_forwarder: true,
            extra_outputs: Vec::new(),
            poll_interval_ms: default_poll_interval_ms(),
            reconnect_ms: default_reconnect_ms(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSection {
    /// Host to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerSection {
    /// The server crate's view of this section.
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Fanout configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FanoutConfig {
    /// Commands queued for the fanout task.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,

    /// Outbound frames buffered per client.
    #[serde(default = "default_connection_buffer")]
    pub connection_buffer: usize,

    /// Decision for topics whose auth type has no registered function.
    #[serde(default)]
    pub unregistered_auth: UnregisteredAuthPolicy,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            command_buffer: default_command_buffer(),
            connection_buffer: default_connection_buffer(),
            unregistered_auth: UnregisteredAuthPolicy::default(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level when `RUST_LOG` is unset (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_bus_input() -> String {
    "127.0.0.1:5557".to_owned()
}

fn default_bus_output() -> String {
    "127.0.0.1:5558".to_owned()
}

const fn default_true() -> bool {
    true
}

const fn default_poll_interval_ms() -> u64 {
    100
}

const fn default_reconnect_ms() -> u64 {
    500
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_port() -> u16 {
    5006
}

const fn default_command_buffer() -> usize {
    1024
}

const fn default_connection_buffer() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse_without_env(yaml: &str) -> RelayConfig {
        serde_yml::from_str(yaml).unwrap()
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = parse_without_env("{}");
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.bus.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.server.port, 5006);
        assert_eq!(config.fanout.unregistered_auth, UnregisteredAuthPolicy::Allow);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
bus:
  input: "10.0.0.1:7000"
  output: "10.0.0.1:7001"
  run_forwarder: false
  extra_outputs: ["10.0.0.2:7001"]
  poll_interval_ms: 50
  reconnect_ms: 250
server:
  host: "127.0.0.1"
  port: 9000
fanout:
  command_buffer: 64
  connection_buffer: 8
  unregistered_auth: deny
logging:
  level: debug
  json: true
"#;
        let config = parse_without_env(yaml);
        assert!(!config.bus.run_forwarder);
        assert_eq!(
            config.bus.subscribe_addrs(),
            vec!["10.0.0.1:7001".to_owned(), "10.0.0.2:7001".to_owned()]
        );
        assert_eq!(config.bus.reconnect_delay(), Duration::from_millis(250));
        assert_eq!(config.server.to_server_config().port, 9000);
        assert_eq!(config.fanout.connection_buffer, 8);
        assert_eq!(config.fanout.unregistered_auth, UnregisteredAuthPolicy::Deny);
        assert!(config.logging.json);
    }

    #[test]
    fn overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PLOTCAST_BUS_INPUT", "0.0.0.0:1"),
            ("PLOTCAST_PORT", "8081"),
            ("PLOTCAST_UNREGISTERED_AUTH", "deny"),
        ]);
        let mut config = RelayConfig::default();
        config
            .apply_overrides(|var| vars.get(var).map(|val| (*val).to_owned()))
            .unwrap();
        assert_eq!(config.bus.input, "0.0.0.0:1");
        assert_eq!(config.bus.output, "127.0.0.1:5558");
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.fanout.unregistered_auth, UnregisteredAuthPolicy::Deny);
    }

    #[test]
    fn bad_port_override_is_rejected() {
        let mut config = RelayConfig::default();
        let result = config.apply_overrides(|var| {
            (var == "PLOTCAST_PORT").then(|| "not-a-port".to_owned())
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidOverride { var: "PLOTCAST_PORT", .. })
        ));
    }
}
